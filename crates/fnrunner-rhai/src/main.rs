//! rhai-runner: serves a Rhai guest script over the runner channel.

use std::process;

use anyhow::Context;

use fnrunner::launch::{self, Command, LaunchArgs};
use fnrunner::{Runner, VersionInfo, fd_redirect, logging};
use fnrunner_rhai::{RhaiLimits, RhaiLoader, SCRIPT_EXTENSION};

const PROGRAM: &str = "rhai-runner";

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let launch = match launch::parse_args(&args) {
        Ok(Command::Run(launch)) => launch,
        Ok(Command::Help) => {
            print!("{}", launch::usage(PROGRAM));
            return;
        }
        Ok(Command::Version) => {
            let info = VersionInfo::new().with_guest("rhai");
            match serde_json::to_string(&info) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("error: {e}");
                    process::exit(1);
                }
            }
            return;
        }
        Err(e) => {
            eprintln!("error: {e}");
            eprintln!();
            eprint!("{}", launch::usage(PROGRAM));
            process::exit(2);
        }
    };

    logging::init_tracing("rhai_runner");

    if let Err(e) = run(launch) {
        tracing::error!(error = ?e, "Runner stopped");
        process::exit(1);
    }
}

fn run(launch: LaunchArgs) -> anyhow::Result<()> {
    fd_redirect::redirect_stdio(launch.stdout, launch.stderr)
        .context("failed to redirect guest stdio")?;

    let mut transport = launch.channel.open()?;

    let script = launch.script_path(SCRIPT_EXTENSION);
    tracing::info!(script = %script.display(), "Loading guest");
    let runner = Runner::load(RhaiLoader::new(script, RhaiLimits::from_env()));

    match runner.serve(&mut transport) {
        Ok(never) => match never {},
        Err(e) => Err(e).context("runner channel failed"),
    }
}
