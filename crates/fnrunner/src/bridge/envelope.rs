//! Envelope types exchanged on the runner channel.
//!
//! - **Request**: one invocation, decoded from host JSON
//! - **Outcome**: what happened, as a sum type
//! - **Response**: the wire shape of an Outcome (`res`, `ret`, `status`)

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

/// Fixed `ret` for a guest function that raised.
pub const INVOCATION_FAILURE_RET: &str = "Exception";

/// Fixed `ret` for a guest script that failed to load.
pub const LOAD_FAILURE_RET: &str = "Error loading script";

/// Content type that makes the request body available as parsed JSON.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// One invocation request.
///
/// Every field is optional; a field missing on the wire stays `None`, so
/// "no body" and "empty body" remain distinguishable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<BTreeMap<String, String>>,

    /// Raw payload. Accepts a byte array or a string on the wire; any other
    /// JSON value is kept as its JSON text.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_body"
    )]
    pub body: Option<Vec<u8>>,

    /// Caller identity attributes. Non-string claim values (`exp`, `iat`,
    /// audience lists) arrive as their JSON text.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_claims"
    )]
    pub claims: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Content type of `body`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

impl Request {
    /// The body parsed as JSON, when the content type says it is JSON.
    ///
    /// A body that fails to parse yields `None`; it is not an error.
    pub fn json_body(&self) -> Option<serde_json::Value> {
        if self.content.as_deref() != Some(JSON_CONTENT_TYPE) {
            return None;
        }
        serde_json::from_slice(self.body.as_deref()?).ok()
    }

    pub fn arg(&self, key: &str) -> Option<&str> {
        self.args.as_ref()?.get(key).map(String::as_str)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireBody {
    Bytes(Vec<u8>),
    Text(String),
    Json(serde_json::Value),
}

fn deserialize_body<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(
        Option::<WireBody>::deserialize(deserializer)?.map(|body| match body {
            WireBody::Bytes(bytes) => bytes,
            WireBody::Text(text) => text.into_bytes(),
            WireBody::Json(value) => value.to_string().into_bytes(),
        }),
    )
}

fn deserialize_claims<'de, D>(deserializer: D) -> Result<Option<BTreeMap<String, String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let claims = Option::<BTreeMap<String, serde_json::Value>>::deserialize(deserializer)?;
    Ok(claims.map(|claims| {
        claims
            .into_iter()
            .map(|(name, value)| {
                let text = match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (name, text)
            })
            .collect()
    }))
}

/// Numeric result code carried in `res`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ResultCode {
    Success = 0,
    InvocationFailure = 1,
    LoadFailure = 2,
}

impl From<ResultCode> for u8 {
    fn from(code: ResultCode) -> Self {
        code as u8
    }
}

impl TryFrom<u8> for ResultCode {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Success),
            1 => Ok(Self::InvocationFailure),
            2 => Ok(Self::LoadFailure),
            other => Err(format!("unknown result code {other}")),
        }
    }
}

/// Result of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// `ret` holds the return value already serialized as JSON text.
    Success { ret: String, status: Option<i32> },
    InvocationFailure,
    LoadFailure,
}

impl Outcome {
    pub fn success(ret: impl Into<String>, status: Option<i32>) -> Self {
        Self::Success {
            ret: ret.into(),
            status,
        }
    }

    pub fn code(&self) -> ResultCode {
        match self {
            Self::Success { .. } => ResultCode::Success,
            Self::InvocationFailure => ResultCode::InvocationFailure,
            Self::LoadFailure => ResultCode::LoadFailure,
        }
    }
}

/// Wire form of an [`Outcome`].
///
/// Only constructed from an `Outcome`, so `res` and `ret` cannot disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    res: ResultCode,
    ret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<i32>,
}

impl Response {
    pub fn code(&self) -> ResultCode {
        self.res
    }

    pub fn ret(&self) -> &str {
        &self.ret
    }

    pub fn status(&self) -> Option<i32> {
        self.status
    }

    pub fn into_outcome(self) -> Outcome {
        match self.res {
            ResultCode::Success => Outcome::Success {
                ret: self.ret,
                status: self.status,
            },
            ResultCode::InvocationFailure => Outcome::InvocationFailure,
            ResultCode::LoadFailure => Outcome::LoadFailure,
        }
    }
}

impl From<Outcome> for Response {
    fn from(outcome: Outcome) -> Self {
        let res = outcome.code();
        match outcome {
            Outcome::Success { ret, status } => Self { res, ret, status },
            Outcome::InvocationFailure => Self {
                res,
                ret: INVOCATION_FAILURE_RET.to_string(),
                status: None,
            },
            Outcome::LoadFailure => Self {
                res,
                ret: LOAD_FAILURE_RET.to_string(),
                status: None,
            },
        }
    }
}
