//! JSON codec for the envelopes.
//!
//! Runner side decodes requests and encodes responses; the host side does
//! the reverse. Framing is handled separately by [`super::chunk`].

use super::envelope::{Outcome, Request, Response};

/// Pre-encoded internal failure, written if a response cannot be encoded.
pub const INVOCATION_FAILURE_FRAME: &[u8] = br#"{"res":1,"ret":"Exception"}"#;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("invalid envelope JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn decode_request(message: &[u8]) -> Result<Request, CodecError> {
    Ok(serde_json::from_slice(message)?)
}

pub fn encode_response(outcome: Outcome) -> Result<Vec<u8>, CodecError> {
    let response = Response::from(outcome);
    let json = serde_json::to_vec(&response)?;
    tracing::trace!(json_size_bytes = json.len(), "Encoded response");
    Ok(json)
}

pub fn encode_request(request: &Request) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(request)?)
}

/// Host side: decode a response back into its [`Outcome`].
///
/// Unknown result codes are rejected.
pub fn decode_response(message: &[u8]) -> Result<Outcome, CodecError> {
    let response: Response = serde_json::from_slice(message)?;
    Ok(response.into_outcome())
}
