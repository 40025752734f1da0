//! Runner command line and environment.
//!
//! ```text
//! <runner> [--stdout <fd>] [--stderr <fd>] [--dir <path>] <script> <fd> [<out-fd>]
//! <runner> --version | --help
//! ```
//!
//! One channel descriptor is a bidirectional queue; two are an inbound and an
//! outbound pipe.

use std::fs::File;
use std::os::fd::RawFd;
use std::path::{Path, PathBuf};

use crate::bridge::chunk::ChunkTransport;
use crate::fd_redirect;

/// Directory bare script names are resolved against.
pub const FUNCTION_DIR_ENV: &str = "RUNNER_FUNCTION_DIR";
pub const DEFAULT_FUNCTION_DIR: &str = "/function";

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("{0}")]
    Usage(String),

    #[error("invalid descriptor '{value}' for {what}")]
    BadDescriptor { what: &'static str, value: String },

    #[error("cannot open {what} descriptor {fd}: {source}")]
    Open {
        what: &'static str,
        fd: RawFd,
        #[source]
        source: std::io::Error,
    },
}

/// How the host wired the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Queue(RawFd),
    Pipes { input: RawFd, output: RawFd },
}

impl Channel {
    /// Take ownership of the descriptors and build the transport.
    pub fn open(self) -> Result<ChunkTransport<File, File>, LaunchError> {
        match self {
            Self::Queue(fd) => {
                let owned = fd_redirect::adopt_fd(fd).map_err(|source| LaunchError::Open {
                    what: "queue",
                    fd,
                    source,
                })?;
                ChunkTransport::from_queue(owned).map_err(|source| LaunchError::Open {
                    what: "queue",
                    fd,
                    source,
                })
            }
            Self::Pipes { input, output } => {
                let input_fd =
                    fd_redirect::adopt_fd(input).map_err(|source| LaunchError::Open {
                        what: "input",
                        fd: input,
                        source,
                    })?;
                let output_fd =
                    fd_redirect::adopt_fd(output).map_err(|source| LaunchError::Open {
                        what: "output",
                        fd: output,
                        source,
                    })?;
                Ok(ChunkTransport::from_pipes(input_fd, output_fd))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchArgs {
    pub script: String,
    pub function_dir: PathBuf,
    pub channel: Channel,
    pub stdout: Option<RawFd>,
    pub stderr: Option<RawFd>,
}

impl LaunchArgs {
    /// Resolve the guest script path.
    ///
    /// A bare name (no extension, no directory) becomes
    /// `<function_dir>/<name>.<extension>`; anything else is taken as a path,
    /// relative ones under `function_dir`.
    pub fn script_path(&self, extension: &str) -> PathBuf {
        let script = Path::new(&self.script);
        if script.is_absolute() {
            return script.to_path_buf();
        }
        let is_bare = script.extension().is_none() && script.components().count() == 1;
        if is_bare {
            self.function_dir
                .join(format!("{}.{}", self.script, extension))
        } else {
            self.function_dir.join(script)
        }
    }
}

/// What the command line asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run(LaunchArgs),
    Version,
    Help,
}

pub fn usage(program: &str) -> String {
    format!(
        "Usage: {program} [--stdout <fd>] [--stderr <fd>] [--dir <path>] <script> <fd> [<out-fd>]\n\
         \n\
         Arguments:\n\
         \x20 <script>         Guest script path, or a bare name under the function directory\n\
         \x20 <fd>             Channel descriptor (bidirectional queue, or inbound pipe with <out-fd>)\n\
         \x20 <out-fd>         Outbound pipe descriptor\n\
         \n\
         Options:\n\
         \x20 --stdout <fd>    Redirect the guest's stdout to <fd> before loading\n\
         \x20 --stderr <fd>    Redirect the guest's stderr to <fd> before loading\n\
         \x20 --dir <path>     Function directory [env: {FUNCTION_DIR_ENV}] [default: {DEFAULT_FUNCTION_DIR}]\n\
         \x20 --version        Print version information as JSON\n"
    )
}

/// Parse `std::env::args()`-style arguments (argv[0] included).
pub fn parse_args(args: &[String]) -> Result<Command, LaunchError> {
    let function_dir = std::env::var_os(FUNCTION_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_FUNCTION_DIR));
    parse_args_with_dir(args, function_dir)
}

fn parse_args_with_dir(args: &[String], mut function_dir: PathBuf) -> Result<Command, LaunchError> {
    let mut stdout = None;
    let mut stderr = None;
    let mut positional: Vec<&str> = Vec::new();

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        match args[i].as_str() {
            "--stdout" => {
                i += 1;
                stdout = Some(parse_fd("--stdout", args.get(i))?);
            }
            "--stderr" => {
                i += 1;
                stderr = Some(parse_fd("--stderr", args.get(i))?);
            }
            "--dir" => {
                i += 1;
                let dir = args
                    .get(i)
                    .ok_or_else(|| LaunchError::Usage("--dir requires a value".to_string()))?;
                function_dir = PathBuf::from(dir);
            }
            "--version" | "-V" => return Ok(Command::Version),
            "--help" | "-h" => return Ok(Command::Help),
            arg if arg.starts_with('-') => {
                return Err(LaunchError::Usage(format!("unknown flag: {arg}")));
            }
            arg => positional.push(arg),
        }
        i += 1;
    }

    let (script, channel) = match positional.as_slice() {
        [script, fd] => (*script, Channel::Queue(parse_channel_fd("<fd>", fd)?)),
        [script, input, output] => (
            *script,
            Channel::Pipes {
                input: parse_channel_fd("<fd>", input)?,
                output: parse_channel_fd("<out-fd>", output)?,
            },
        ),
        [] | [_] => {
            return Err(LaunchError::Usage(
                "missing required arguments: <script> <fd>".to_string(),
            ));
        }
        [_, _, _, extra, ..] => {
            return Err(LaunchError::Usage(format!("unexpected argument: {extra}")));
        }
    };

    Ok(Command::Run(LaunchArgs {
        script: script.to_string(),
        function_dir,
        channel,
        stdout,
        stderr,
    }))
}

fn parse_fd(what: &'static str, value: Option<&String>) -> Result<RawFd, LaunchError> {
    let value = value.ok_or_else(|| LaunchError::Usage(format!("{what} requires a value")))?;
    parse_channel_fd(what, value)
}

fn parse_channel_fd(what: &'static str, value: &str) -> Result<RawFd, LaunchError> {
    match value.parse::<RawFd>() {
        Ok(fd) if fd > 2 => Ok(fd),
        _ => Err(LaunchError::BadDescriptor {
            what,
            value: value.to_string(),
        }),
    }
}
