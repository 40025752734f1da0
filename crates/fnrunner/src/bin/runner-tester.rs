//! Drive a runner binary by hand: spawn it, send requests, print responses.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::Context;

use fnrunner::host::{RunnerCommand, RunnerProcess};
use fnrunner::{Outcome, Request};

/// Host variables with this prefix are not passed to the runner.
const HOST_ENV_PREFIX: &str = "RUNNER_TESTER_";

struct Args {
    runner: PathBuf,
    script: String,
    requests: Vec<String>,
    timeout: Option<Duration>,
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let args = match parse_args(&args) {
        Ok(v) => v,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("error: {msg}");
                eprintln!();
            }
            eprintln!("Usage: runner-tester [--timeout <secs>] <runner> <script> [<request-json>...]");
            eprintln!();
            eprintln!("Arguments:");
            eprintln!("  <runner>          Runner binary to spawn");
            eprintln!("  <script>          Guest script passed to the runner");
            eprintln!("  <request-json>    Request envelopes to send [default: two sample requests]");
            eprintln!();
            eprintln!("Options:");
            eprintln!("  --timeout <secs>  Give up on a response after this long");
            process::exit(2);
        }
    };

    fnrunner::logging::init_tracing("runner_tester");

    if let Err(e) = run(args) {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut positional = Vec::new();
    let mut timeout = None;

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        match args[i].as_str() {
            "--timeout" => {
                i += 1;
                let secs: f64 = args
                    .get(i)
                    .ok_or("--timeout requires a value")?
                    .parse()
                    .map_err(|_| "--timeout expects seconds")?;
                timeout = Some(Duration::from_secs_f64(secs));
            }
            "--help" | "-h" => return Err(String::new()),
            arg if arg.starts_with('-') => return Err(format!("unknown flag: {arg}")),
            arg => positional.push(arg.to_string()),
        }
        i += 1;
    }

    let mut positional = positional.into_iter();
    let runner = positional.next().ok_or("missing required argument: <runner>")?;
    let script = positional.next().ok_or("missing required argument: <script>")?;
    Ok(Args {
        runner: PathBuf::from(runner),
        script,
        requests: positional.collect(),
        timeout,
    })
}

fn sample_requests() -> Vec<Request> {
    let args = |pairs: &[(&str, &str)]| {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        )
    };
    vec![
        Request {
            args: args(&[("foo", "bar"), ("xxx", "1")]),
            ..Default::default()
        },
        Request {
            args: args(&[("fooz", "baz")]),
            ..Default::default()
        },
    ]
}

fn run(args: Args) -> anyhow::Result<()> {
    let requests = if args.requests.is_empty() {
        sample_requests()
    } else {
        args.requests
            .iter()
            .map(|json| {
                serde_json::from_str::<Request>(json)
                    .with_context(|| format!("invalid request JSON: {json}"))
            })
            .collect::<anyhow::Result<_>>()?
    };

    let mut command =
        RunnerCommand::new(&args.runner, &args.script).strip_env_prefix(HOST_ENV_PREFIX);
    if let Some(timeout) = args.timeout {
        command = command.timeout(timeout);
    }

    let mut runner = RunnerProcess::spawn(&command)
        .with_context(|| format!("failed to start {}", args.runner.display()))?;

    for request in &requests {
        let output = runner.run(request).context("runner did not answer")?;
        match &output.outcome {
            Outcome::Success { ret, status } => {
                println!("Ret[{:?}]: {ret} (status {status:?})", output.elapsed)
            }
            other => println!("Ret[{:?}]: {:?} ({other:?})", output.elapsed, other.code()),
        }
        println!("Out: {}", output.stdout);
        println!("Err: {}", output.stderr);
    }

    let status = runner.shutdown()?;
    tracing::info!(%status, "Runner exited");
    Ok(())
}
