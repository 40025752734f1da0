//! Wire bridge between the host and a runner process.
//!
//! This module provides the framing and the envelope schema spoken on the
//! inherited channel descriptors.
//!
//! # Architecture
//!
//! - **chunk**: fixed-size chunk framing over any Read/Write pair
//! - **envelope**: Request/Response envelope types and the result-code taxonomy
//! - **codec**: JSON encoding of the envelopes

pub mod chunk;
pub mod codec;
pub mod envelope;
