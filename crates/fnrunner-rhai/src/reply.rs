//! The `respond(value, meta)` function scripts use to attach a status code.

use rhai::{Dynamic, Engine, INT, Map};

/// Value returned by `respond(...)`: the result plus an optional status.
#[derive(Debug, Clone)]
pub struct ScriptReply {
    pub value: Dynamic,
    pub status: Option<i32>,
}

impl ScriptReply {
    fn with_status(value: Dynamic, status: INT) -> Self {
        let status = i32::try_from(status)
            .inspect_err(|_| tracing::warn!(status, "Status out of range, ignored"))
            .ok();
        Self { value, status }
    }

    fn with_meta(value: Dynamic, meta: Map) -> Self {
        let Some(status) = meta.get("status") else {
            return Self { value, status: None };
        };
        if let Ok(status) = status.as_int() {
            return Self::with_status(value, status);
        }
        // Integer strings such as "404" are accepted too.
        match status.clone().into_string().ok().and_then(|s| s.trim().parse::<INT>().ok()) {
            Some(status) => Self::with_status(value, status),
            None => {
                tracing::warn!(
                    type_name = status.type_name(),
                    "Non-integer status in response metadata, ignored"
                );
                Self { value, status: None }
            }
        }
    }
}

pub fn register_reply(engine: &mut Engine) {
    engine.register_type_with_name::<ScriptReply>("Reply");
    engine.register_fn("respond", ScriptReply::with_status);
    engine.register_fn("respond", ScriptReply::with_meta);
    engine.register_get("value", |reply: &mut ScriptReply| reply.value.clone());
    engine.register_get("status", |reply: &mut ScriptReply| -> Dynamic {
        reply.status.map_or(Dynamic::UNIT, |s| Dynamic::from(s as INT))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(script: &str) -> ScriptReply {
        let mut engine = Engine::new();
        register_reply(&mut engine);
        engine.eval::<ScriptReply>(script).unwrap()
    }

    #[test]
    fn respond_with_integer_status() {
        let reply = eval(r#"respond("created", 201)"#);
        assert_eq!(reply.status, Some(201));
        assert_eq!(reply.value.into_string().unwrap(), "created");
    }

    #[test]
    fn respond_with_metadata_map() {
        let reply = eval(r#"respond(#{ ok: true }, #{ status: 404 })"#);
        assert_eq!(reply.status, Some(404));
        assert!(reply.value.is_map());
    }

    #[test]
    fn integer_string_status_is_parsed() {
        assert_eq!(eval(r#"respond(1, #{ status: "404" })"#).status, Some(404));
        assert_eq!(eval(r#"respond(1, #{ status: " 201 " })"#).status, Some(201));
    }

    #[test]
    fn non_integer_status_is_ignored() {
        assert_eq!(eval(r#"respond(1, #{ status: "not found" })"#).status, None);
        assert_eq!(eval(r#"respond(1, #{ status: 4.5 })"#).status, None);
        assert_eq!(eval(r#"respond(1, #{})"#).status, None);
        assert_eq!(eval("respond(1, 99999999999)").status, None);
    }

    #[test]
    fn getters_are_available_to_scripts() {
        let mut engine = Engine::new();
        register_reply(&mut engine);
        let status = engine.eval::<INT>("respond(1, 418).status").unwrap();
        assert_eq!(status, 418);
    }
}
