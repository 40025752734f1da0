//! Spawns the `rhai-runner` binary and talks to it like a sandbox manager.

use std::collections::BTreeMap;
use std::io::Write;
use std::time::{Duration, Instant};

use fnrunner::host::{RunError, RunnerCommand, RunnerProcess};
use fnrunner::{Outcome, Request};

const RUNNER: &str = env!("CARGO_BIN_EXE_rhai-runner");

const SCRIPT: &str = r#"
let greeting = "hello";

fn Main(req) {
    let args = if "args" in req { req.args } else { #{} };
    if "fail" in args {
        throw "asked to fail";
    }
    if "n" in args {
        let s = "";
        s.pad(parse_int(args.n), 'a');
        return s;
    }
    if "status" in args {
        return respond(#{ code: args.status }, parse_int(args.status));
    }
    if "say" in args {
        print(args.say);
    }
    if "claims" in req {
        return req.claims;
    }
    if "b" in req {
        return req.b;
    }
    #{ status: "ok" }
}
"#;

fn script_file(source: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".rhai")
        .tempfile()
        .unwrap();
    file.write_all(source.as_bytes()).unwrap();
    file
}

fn spawn(script: &tempfile::NamedTempFile) -> RunnerProcess {
    let command = RunnerCommand::new(RUNNER, script.path().to_str().unwrap())
        .timeout(Duration::from_secs(20))
        .env("RUNNER_LOG", "debug");
    RunnerProcess::spawn(&command).unwrap()
}

fn with_args(pairs: &[(&str, &str)]) -> Request {
    Request {
        args: Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        ),
        ..Default::default()
    }
}

fn ret_json(outcome: &Outcome) -> serde_json::Value {
    match outcome {
        Outcome::Success { ret, .. } => serde_json::from_str(ret).unwrap(),
        other => panic!("expected success, got {other:?}"),
    }
}

#[test]
fn plain_value_has_no_status() {
    let script = script_file(SCRIPT);
    let mut runner = spawn(&script);

    let output = runner.run(&with_args(&[("k", "v")])).unwrap();
    insta::assert_json_snapshot!(ret_json(&output.outcome), @r#"
    {
      "status": "ok"
    }
    "#);
    assert!(matches!(output.outcome, Outcome::Success { status: None, .. }));
}

#[test]
fn respond_attaches_status() {
    let script = script_file(SCRIPT);
    let mut runner = spawn(&script);

    let output = runner.run(&with_args(&[("status", "404")])).unwrap();
    assert!(matches!(
        output.outcome,
        Outcome::Success {
            status: Some(404),
            ..
        }
    ));
    assert_eq!(ret_json(&output.outcome), serde_json::json!({"code": "404"}));
}

#[test]
fn exception_then_recovery() {
    let script = script_file(SCRIPT);
    let mut runner = spawn(&script);

    let failed = runner.run(&with_args(&[("fail", "1")])).unwrap();
    assert_eq!(failed.outcome, Outcome::InvocationFailure);

    let malformed = runner.run_raw(b"{\"args\":").unwrap();
    assert_eq!(malformed.outcome, Outcome::InvocationFailure);

    let ok = runner.run(&Request::default()).unwrap();
    assert_eq!(ret_json(&ok.outcome), serde_json::json!({"status": "ok"}));
}

#[test]
fn response_of_exactly_one_chunk() {
    let script = script_file(SCRIPT);
    let mut runner = spawn(&script);

    // {"res":0,"ret":"\"<n>\""} is n + 22 bytes.
    for n in [1002, 2026, 5000] {
        let output = runner.run(&with_args(&[("n", n.to_string().as_str())])).unwrap();
        assert_eq!(ret_json(&output.outcome), serde_json::json!("a".repeat(n)));
    }
}

#[test]
fn json_body_is_parsed() {
    let script = script_file(SCRIPT);
    let mut runner = spawn(&script);

    let request = Request {
        body: Some(br#"{"items":[1,2,3]}"#.to_vec()),
        content: Some("application/json".to_string()),
        ..Default::default()
    };
    let output = runner.run(&request).unwrap();
    assert_eq!(ret_json(&output.outcome), serde_json::json!({"items": [1, 2, 3]}));
}

#[test]
fn host_shaped_claims_and_body_are_accepted() {
    let script = script_file(SCRIPT);
    let mut runner = spawn(&script);

    let output = runner
        .run_raw(br#"{"claims":{"sub":"u1","exp":1700000000,"admin":true}}"#)
        .unwrap();
    assert_eq!(
        ret_json(&output.outcome),
        serde_json::json!({"admin": "true", "exp": "1700000000", "sub": "u1"})
    );

    let output = runner
        .run_raw(br#"{"body":{"x":1},"content":"application/json"}"#)
        .unwrap();
    assert_eq!(ret_json(&output.outcome), serde_json::json!({"x": 1}));
}

#[test]
fn pipelined_requests_are_answered_in_order() {
    let script = script_file(SCRIPT);
    let mut runner = spawn(&script);

    for n in ["3", "1500", "7"] {
        let message = serde_json::to_vec(&with_args(&[("n", n)])).unwrap();
        runner.send_raw(&message).unwrap();
    }
    for n in [3, 1500, 7] {
        let outcome = runner.receive().unwrap();
        assert_eq!(ret_json(&outcome), serde_json::json!("a".repeat(n)));
    }
}

#[test]
fn guest_output_is_captured() {
    let script = script_file(SCRIPT);
    let mut runner = spawn(&script);

    runner.run(&with_args(&[("say", "from the guest")])).unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut stdout = String::new();
    while !stdout.contains("from the guest") && Instant::now() < deadline {
        stdout.push_str(&runner.take_output().0);
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(stdout.contains("from the guest"), "stdout was {stdout:?}");
}

#[test]
fn load_failure_is_sticky() {
    let script = script_file("fn Main(req) { ");
    let mut runner = spawn(&script);

    for _ in 0..3 {
        let output = runner.run(&with_args(&[("k", "v")])).unwrap();
        assert_eq!(output.outcome, Outcome::LoadFailure);
    }
}

#[test]
fn missing_script_is_a_load_failure() {
    let command = RunnerCommand::new(RUNNER, "/nonexistent/guest.rhai")
        .timeout(Duration::from_secs(20));
    let mut runner = RunnerProcess::spawn(&command).unwrap();

    let output = runner.run(&Request::default()).unwrap();
    assert_eq!(output.outcome, Outcome::LoadFailure);
}

#[test]
fn closing_the_channel_stops_the_runner() {
    let script = script_file(SCRIPT);
    let mut runner = spawn(&script);
    runner.run(&Request::default()).unwrap();

    let status = runner.shutdown().unwrap();
    assert_eq!(status.code(), Some(1));
    assert!(matches!(
        runner.run(&Request::default()),
        Err(RunError::Exited)
    ));
}

#[test]
fn bad_arguments_exit_with_usage_error() {
    let status = std::process::Command::new(RUNNER)
        .arg("script-only")
        .stderr(std::process::Stdio::null())
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(2));
}

#[test]
fn version_is_json() {
    let output = std::process::Command::new(RUNNER)
        .arg("--version")
        .output()
        .unwrap();
    assert!(output.status.success());
    let info: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(info["guest"], "rhai");
    assert_eq!(info["protocol"], 1);
}
