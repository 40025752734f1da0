//! Conversions between envelope values and Rhai values.

use std::collections::BTreeMap;

use fnrunner::Request;
use rhai::{Dynamic, Map};

/// Builds the `req` map passed to `Main`.
///
/// Only fields present in the request become keys, so scripts can test for
/// them with `"body" in req`. A JSON body (per `content`) is also exposed
/// parsed, as `b`.
pub fn build_request_map(request: Request) -> Map {
    let mut map = Map::new();

    let parsed_body = request.json_body().and_then(|value| {
        rhai::serde::to_dynamic(value)
            .inspect_err(|e| tracing::debug!(error = %e, "JSON body not representable"))
            .ok()
    });

    if let Some(args) = request.args {
        map.insert("args".into(), string_map(args).into());
    }
    if let Some(claims) = request.claims {
        map.insert("claims".into(), string_map(claims).into());
    }
    if let Some(body) = request.body {
        map.insert("body".into(), Dynamic::from_blob(body));
    }
    if let Some(b) = parsed_body {
        map.insert("b".into(), b);
    }

    let strings = [
        ("event", request.event),
        ("request", request.request),
        ("path", request.path),
        ("content", request.content),
        ("method", request.method),
    ];
    for (key, value) in strings {
        if let Some(value) = value {
            map.insert(key.into(), value.into());
        }
    }

    map
}

fn string_map(pairs: BTreeMap<String, String>) -> Map {
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Converts a script value to JSON.
///
/// Unit becomes `null`; blobs become arrays of byte values.
pub fn dynamic_to_json(value: &Dynamic) -> Result<serde_json::Value, serde_json::Error> {
    serde_json::to_value(value)
}
