//! Descriptor plumbing for the runner process.
//!
//! The sandbox manager hands the runner a channel descriptor (or two) and,
//! optionally, descriptors that should become the guest's stdout and stderr.
//! Redirection has to happen before the guest is loaded so that anything the
//! guest prints during load already goes to the right place.
//!
//! ## Safety contracts
//!
//! The `unsafe` blocks below rely on:
//! 1. Descriptor numbers come from the command line of a process that was
//!    started with them open; `dup` on a descriptor that is not open fails
//!    with `EBADF` and nothing else is touched.
//! 2. Standard fds (0, 1, 2) are open at process start.
//! 3. Called on the main thread before any guest code runs.

use std::io;
use std::os::fd::{BorrowedFd, FromRawFd, OwnedFd, RawFd};

use nix::unistd::{dup, dup2};

const STDOUT_FD: RawFd = 1;
const STDERR_FD: RawFd = 2;

/// Take ownership of an inherited descriptor.
///
/// The descriptor is duplicated to a fresh number and the original is closed,
/// so a bad number fails here rather than on first use. Standard streams are
/// refused.
pub fn adopt_fd(fd: RawFd) -> io::Result<OwnedFd> {
    if fd <= STDERR_FD {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("descriptor {fd} is a standard stream"),
        ));
    }

    let copy = unsafe {
        let borrowed = BorrowedFd::borrow_raw(fd);
        dup(borrowed)
    }
    .map_err(|e| io::Error::other(format!("dup({fd}) failed: {e}")))?;

    // Safety: dup succeeded, so fd is open and nothing else in this process owns it.
    drop(unsafe { OwnedFd::from_raw_fd(fd) });

    tracing::trace!(from = fd, to = ?copy, "Adopted descriptor");
    Ok(copy)
}

/// Point fd 1 and/or fd 2 at the given descriptors, closing the originals.
pub fn redirect_stdio(stdout: Option<RawFd>, stderr: Option<RawFd>) -> io::Result<()> {
    if let Some(fd) = stdout {
        redirect_onto(fd, STDOUT_FD)?;
    }
    if let Some(fd) = stderr {
        redirect_onto(fd, STDERR_FD)?;
    }
    Ok(())
}

fn redirect_onto(fd: RawFd, target: RawFd) -> io::Result<()> {
    let source = adopt_fd(fd)?;

    let mut target_fd = unsafe { OwnedFd::from_raw_fd(target) };
    let result = dup2(&source, &mut target_fd)
        .map_err(|e| io::Error::other(format!("dup2({fd} -> {target}) failed: {e}")));
    std::mem::forget(target_fd); // fd 1/2 stay open for the life of the process
    result?;

    tracing::debug!(from = fd, to = target, "Redirected standard stream");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::{Read, Write};
    use std::os::fd::{AsRawFd, IntoRawFd};

    #[test]
    fn standard_streams_are_refused() {
        for fd in 0..=2 {
            let err = adopt_fd(fd).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        }
    }

    #[test]
    fn adopted_descriptor_still_works() {
        let (mut reader, writer) = std::io::pipe().unwrap();
        let raw = OwnedFd::from(writer).into_raw_fd();

        let adopted = adopt_fd(raw).unwrap();
        assert_ne!(adopted.as_raw_fd(), raw);

        let mut file = File::from(adopted);
        file.write_all(b"hello").unwrap();
        drop(file);

        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello");
    }
}
