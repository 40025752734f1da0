//! fnrunner: runner side of the sandboxed function wire protocol.
//!
//! A runner is a long-lived process that loads one guest function and then
//! answers invocation requests over an inherited descriptor, one at a time.
//! Guest language bindings implement [`GuestLoader`] and [`Guest`] and hand
//! the loader to [`Runner::load`].

pub mod adapter;
pub mod bridge;
pub mod fd_redirect;
pub mod host;
pub mod launch;
pub mod logging;
pub mod native;
pub mod serve;
mod version;

pub use adapter::{
    Adapter, ENTRY_POINT, Guest, GuestLoader, InvokeError, LoadError, Reply, ResponseMeta,
};
pub use bridge::chunk::{CHUNK, ChunkTransport, TransportError};
pub use bridge::envelope::{Outcome, Request, ResultCode};
pub use native::FnGuest;
pub use serve::Runner;
pub use version::{PROTOCOL_VERSION, RUNNER_VERSION, VersionInfo};
