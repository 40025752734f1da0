//! Host side of the runner channel.
//!
//! Spawns a runner the way a sandbox manager does: a `SOCK_SEQPACKET`
//! socketpair for the queue, two pipes for the guest's stdout/stderr, and only
//! the runner's ends inherited by the child. Used by `runner-tester` and by
//! end-to-end tests of the guest bindings.

use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::io::{self, PipeReader, Read};
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use nix::sys::socket::{AddressFamily, SockFlag, SockType, setsockopt, socketpair, sockopt};
use nix::sys::time::{TimeVal, TimeValLike};
use nix::unistd::dup;

use crate::bridge::chunk::{ChunkTransport, TransportError};
use crate::bridge::codec::{self, CodecError};
use crate::bridge::envelope::{Outcome, Request};

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The runner closed the channel (it exited or crashed).
    #[error("runner exited")]
    Exited,

    #[error("timed out waiting for the runner")]
    Timeout,

    /// An earlier call timed out; its response may still be in flight.
    #[error("channel abandoned after a timeout")]
    Abandoned,

    #[error(transparent)]
    Transport(TransportError),

    #[error("bad response: {0}")]
    Codec(#[from] CodecError),
}

impl From<TransportError> for RunError {
    fn from(e: TransportError) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if matches!(e, TransportError::Closed) {
            Self::Exited
        } else {
            Self::Transport(e)
        }
    }
}

/// Result of one call as seen by the host.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub outcome: Outcome,
    pub elapsed: Duration,
    /// Guest stdout that arrived by the time the response did.
    pub stdout: String,
    pub stderr: String,
}

/// How to start a runner.
#[derive(Debug, Clone)]
pub struct RunnerCommand {
    program: PathBuf,
    script: String,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
    strip_env_prefix: Option<String>,
    timeout: Option<Duration>,
}

impl RunnerCommand {
    pub fn new(program: impl Into<PathBuf>, script: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            script: script.into(),
            args: Vec::new(),
            envs: Vec::new(),
            strip_env_prefix: None,
            timeout: None,
        }
    }

    /// Extra option placed before the positional arguments.
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.envs
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    /// Do not pass host variables starting with `prefix` to the runner.
    pub fn strip_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.strip_env_prefix = Some(prefix.into());
        self
    }

    /// Receive timeout for each call. `None` waits forever.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Collects one output stream of the runner on a background thread.
struct Capture {
    rx: mpsc::Receiver<String>,
}

impl Capture {
    fn spawn(mut reader: PipeReader) -> Self {
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        let data = String::from_utf8_lossy(&buf[..n]).into_owned();
                        if tx.send(data).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
        });
        Self { rx }
    }

    fn drain(&self) -> String {
        self.rx.try_iter().collect()
    }
}

/// A running runner process and the host end of its channel.
pub struct RunnerProcess {
    child: Child,
    transport: Option<ChunkTransport<File, File>>,
    timed_out: bool,
    stdout: Capture,
    stderr: Capture,
}

impl RunnerProcess {
    pub fn spawn(command: &RunnerCommand) -> io::Result<Self> {
        let (host_end, runner_end) = socketpair(
            AddressFamily::Unix,
            SockType::SeqPacket,
            None,
            SockFlag::SOCK_CLOEXEC,
        )
        .map_err(io::Error::from)?;

        if let Some(timeout) = command.timeout {
            let tv = TimeVal::microseconds(timeout.as_micros() as i64);
            setsockopt(&host_end, sockopt::ReceiveTimeout, &tv).map_err(io::Error::from)?;
        }

        let transport = ChunkTransport::from_queue(host_end)?;

        let (out_reader, out_writer) = io::pipe()?;
        let (err_reader, err_writer) = io::pipe()?;

        // dup() drops close-on-exec: these three are what the child inherits.
        let child_queue = dup(&runner_end).map_err(io::Error::from)?;
        let child_out = dup(&out_writer).map_err(io::Error::from)?;
        let child_err = dup(&err_writer).map_err(io::Error::from)?;
        drop((runner_end, out_writer, err_writer));

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .arg("--stdout")
            .arg(child_out.as_raw_fd().to_string())
            .arg("--stderr")
            .arg(child_err.as_raw_fd().to_string())
            .arg(&command.script)
            .arg(child_queue.as_raw_fd().to_string())
            .stdin(Stdio::null());

        if let Some(prefix) = &command.strip_env_prefix {
            cmd.env_clear().envs(
                std::env::vars_os()
                    .filter(|(key, _)| !key.to_string_lossy().starts_with(prefix.as_str())),
            );
        }
        cmd.envs(command.envs.iter().map(|(k, v)| (k, v)));

        let child = cmd.spawn()?;
        tracing::debug!(
            pid = child.id(),
            program = %command.program.display(),
            queue = child_queue.as_raw_fd(),
            "Started runner"
        );

        // The child holds its own copies now.
        drop((child_queue, child_out, child_err));

        Ok(Self {
            child,
            transport: Some(transport),
            timed_out: false,
            stdout: Capture::spawn(out_reader),
            stderr: Capture::spawn(err_reader),
        })
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Send one request and wait for its response.
    pub fn run(&mut self, request: &Request) -> Result<RunOutput, RunError> {
        let message = codec::encode_request(request)?;
        self.run_raw(&message)
    }

    /// Send raw bytes as one message and wait for the response.
    pub fn run_raw(&mut self, message: &[u8]) -> Result<RunOutput, RunError> {
        let start = Instant::now();
        self.transport()?.send(message)?;
        let response = self.receive_message()?;
        let elapsed = start.elapsed();

        Ok(RunOutput {
            outcome: codec::decode_response(&response)?,
            elapsed,
            stdout: self.stdout.drain(),
            stderr: self.stderr.drain(),
        })
    }

    /// Send without waiting, for pipelining tests.
    pub fn send_raw(&mut self, message: &[u8]) -> Result<(), RunError> {
        Ok(self.transport()?.send(message)?)
    }

    /// Wait for the next response.
    pub fn receive(&mut self) -> Result<Outcome, RunError> {
        let response = self.receive_message()?;
        Ok(codec::decode_response(&response)?)
    }

    fn transport(&mut self) -> Result<&mut ChunkTransport<File, File>, RunError> {
        match self.transport.as_mut() {
            Some(transport) => Ok(transport),
            None if self.timed_out => Err(RunError::Abandoned),
            None => Err(RunError::Exited),
        }
    }

    /// A timeout may leave part of a response buffered, so the channel is
    /// dropped rather than reused.
    fn receive_message(&mut self) -> Result<Vec<u8>, RunError> {
        let received = self.transport()?.receive();
        match received {
            Ok(message) => Ok(message),
            Err(e) => {
                let e = RunError::from(e);
                if matches!(e, RunError::Timeout) {
                    tracing::warn!(pid = self.child.id(), "Runner timed out, abandoning channel");
                    self.transport = None;
                    self.timed_out = true;
                }
                Err(e)
            }
        }
    }

    /// Output captured since the last call.
    pub fn take_output(&self) -> (String, String) {
        (self.stdout.drain(), self.stderr.drain())
    }

    /// Close the channel and wait for the runner to exit.
    pub fn shutdown(&mut self) -> io::Result<ExitStatus> {
        self.transport = None;
        self.child.wait()
    }

    pub fn kill(&mut self) -> io::Result<()> {
        self.child.kill()?;
        self.child.wait()?;
        Ok(())
    }
}

impl Drop for RunnerProcess {
    fn drop(&mut self) {
        if !matches!(self.child.try_wait(), Ok(None)) {
            return;
        }
        if let Err(e) = self.kill() {
            tracing::warn!(error = %e, "Failed to kill runner");
        }
    }
}
