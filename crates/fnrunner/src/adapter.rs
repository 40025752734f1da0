//! Invocation adapter: binds decoded requests to the guest entry point.
//!
//! The guest is loaded once. A load failure is kept as a value and turns the
//! adapter into a degraded state that answers every call with a load failure.
//! During a call, anything the guest does wrong (an error, a panic, an
//! unserializable return value) becomes an invocation failure here and never
//! reaches the serve loop.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use serde::Serialize;

use crate::bridge::codec;
use crate::bridge::envelope::{Outcome, Request};

/// Name of the entry point every guest exposes.
pub const ENTRY_POINT: &str = "Main";

/// Load phase errors.
///
/// These occur before any call is attempted and put the adapter in degraded
/// mode for the rest of the process lifetime.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The guest script or module does not exist.
    #[error("guest not found: {path}")]
    Missing { path: String },

    /// The guest failed to parse or compile.
    #[error("failed to compile guest: {message}")]
    Compile { message: String },

    /// Module-level initialization raised.
    #[error("guest initialization failed: {message}")]
    Init { message: String },

    /// The guest has no usable entry point.
    #[error("guest does not define {name}(req)")]
    MissingEntryPoint { name: String },
}

impl LoadError {
    pub fn missing(path: impl Into<String>) -> Self {
        Self::Missing { path: path.into() }
    }

    pub fn compile(message: impl Into<String>) -> Self {
        Self::Compile {
            message: message.into(),
        }
    }

    pub fn init(message: impl Into<String>) -> Self {
        Self::Init {
            message: message.into(),
        }
    }

    pub fn missing_entry_point() -> Self {
        Self::MissingEntryPoint {
            name: ENTRY_POINT.to_string(),
        }
    }
}

/// Call phase errors. Logged, never put on the wire.
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("guest raised: {0}")]
    Raised(String),

    #[error("return value is not serializable: {0}")]
    Unserializable(String),

    #[error("guest panicked: {0}")]
    Panicked(String),
}

impl InvokeError {
    pub fn raised(message: impl std::fmt::Display) -> Self {
        Self::Raised(message.to_string())
    }
}

/// Side-channel metadata a guest may return along with its value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponseMeta {
    pub status: Option<i32>,
}

/// What a guest call produced: a value, optionally paired with metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub value: serde_json::Value,
    pub meta: Option<ResponseMeta>,
}

impl Reply {
    /// Plain return value, no metadata.
    pub fn new(value: serde_json::Value) -> Self {
        Self { value, meta: None }
    }

    /// Serialize any value as the return value.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, InvokeError> {
        serde_json::to_value(value)
            .map(Self::new)
            .map_err(|e| InvokeError::Unserializable(e.to_string()))
    }

    pub fn with_meta(mut self, meta: ResponseMeta) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn with_status(self, status: i32) -> Self {
        self.with_meta(ResponseMeta {
            status: Some(status),
        })
    }

    pub fn status(&self) -> Option<i32> {
        self.meta.and_then(|m| m.status)
    }
}

/// A loaded guest: the `Main` capability.
pub trait Guest {
    fn invoke(&mut self, request: Request) -> Result<Reply, InvokeError>;
}

/// Produces a guest. Runs exactly once, before serving.
pub trait GuestLoader {
    type Guest: Guest;

    fn load(self) -> Result<Self::Guest, LoadError>;
}

impl<G, F> GuestLoader for F
where
    G: Guest,
    F: FnOnce() -> Result<G, LoadError>,
{
    type Guest = G;

    fn load(self) -> Result<G, LoadError> {
        self()
    }
}

enum GuestState<G> {
    Ready(G),
    Degraded(LoadError),
}

pub struct Adapter<G> {
    state: GuestState<G>,
}

impl<G: Guest> Adapter<G> {
    /// Run the load phase.
    pub fn load<L>(loader: L) -> Self
    where
        L: GuestLoader<Guest = G>,
    {
        let state = match panic::catch_unwind(AssertUnwindSafe(|| loader.load())) {
            Ok(Ok(guest)) => {
                tracing::info!("Guest loaded");
                GuestState::Ready(guest)
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Guest failed to load, answering every call with a load failure");
                GuestState::Degraded(e)
            }
            Err(payload) => {
                let e = LoadError::init(panic_message(payload.as_ref()));
                tracing::error!(error = %e, "Guest loader panicked, answering every call with a load failure");
                GuestState::Degraded(e)
            }
        };
        Self { state }
    }

    /// The load error, if the adapter is degraded.
    pub fn load_error(&self) -> Option<&LoadError> {
        match &self.state {
            GuestState::Ready(_) => None,
            GuestState::Degraded(e) => Some(e),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.load_error().is_some()
    }

    /// Handle one raw message: decode, invoke, normalize.
    ///
    /// A degraded adapter does not look at the message at all.
    pub fn handle(&mut self, message: &[u8]) -> Outcome {
        if let Some(e) = self.load_error() {
            tracing::warn!(error = %e, "Guest not loaded, answering with a load failure");
            return Outcome::LoadFailure;
        }
        match codec::decode_request(message) {
            Ok(request) => self.invoke(request),
            Err(e) => {
                tracing::warn!(error = %e, bytes = message.len(), "Malformed request");
                Outcome::InvocationFailure
            }
        }
    }

    /// Call the guest with a decoded request.
    pub fn invoke(&mut self, request: Request) -> Outcome {
        let guest = match &mut self.state {
            GuestState::Ready(guest) => guest,
            GuestState::Degraded(_) => return Outcome::LoadFailure,
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| guest.invoke(request)))
            .unwrap_or_else(|payload| Err(InvokeError::Panicked(panic_message(payload.as_ref()))))
            .and_then(|reply| {
                let ret = serde_json::to_string(&reply.value)
                    .map_err(|e| InvokeError::Unserializable(e.to_string()))?;
                Ok(Outcome::success(ret, reply.status()))
            });

        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "Exception running function");
                Outcome::InvocationFailure
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
