//! Tracing setup shared by every runner binary.
//!
//! Logs go to stderr. Set up before stdio redirection: the writer looks up
//! stderr on every write, so once fd 2 points at the guest's stderr
//! descriptor the host collects runner logs together with guest output.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Base level for the runner's own targets: `debug`, `info`, `warn`, `error`.
pub const LOG_LEVEL_ENV: &str = "RUNNER_LOG";
/// `json` switches to structured JSON lines.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Initialize tracing with RUNNER_LOG and LOG_FORMAT support.
///
/// `RUST_LOG`, when set, takes over filtering entirely. `binary_target` is
/// the crate name of the calling binary so its own events are included.
pub fn init_tracing(binary_target: &str) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(filter_directives(
            std::env::var(LOG_LEVEL_ENV).ok().as_deref(),
            binary_target,
        ))
    };

    let use_json = std::env::var(LOG_FORMAT_ENV).as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_ansi(false).with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

fn filter_directives(level: Option<&str>, binary_target: &str) -> String {
    let level = match level {
        Some("trace") => "trace",
        Some("debug") => "debug",
        Some("warn") | Some("warning") => "warn",
        Some("error") => "error",
        _ => "info",
    };
    format!("fnrunner={level},fnrunner_rhai={level},{binary_target}={level}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_defaults_to_info() {
        assert_eq!(
            filter_directives(None, "rhai_runner"),
            "fnrunner=info,fnrunner_rhai=info,rhai_runner=info"
        );
        assert_eq!(
            filter_directives(Some("loud"), "x"),
            "fnrunner=info,fnrunner_rhai=info,x=info"
        );
    }

    #[test]
    fn warning_is_an_alias() {
        assert!(filter_directives(Some("warning"), "x").starts_with("fnrunner=warn,"));
    }
}
