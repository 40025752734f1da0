//! Loading a `.rhai` guest script and calling its `Main(req)`.

use std::path::PathBuf;

use fnrunner::{ENTRY_POINT, Guest, GuestLoader, InvokeError, LoadError, Reply, Request};
use rhai::{AST, CallFnOptions, Dynamic, Engine, Scope};

use crate::convert::{build_request_map, dynamic_to_json};
use crate::limits::RhaiLimits;
use crate::reply::{ScriptReply, register_reply};

/// File extension for bare script names.
pub const SCRIPT_EXTENSION: &str = "rhai";

/// Creates the engine scripts run in.
pub fn create_engine(limits: &RhaiLimits) -> Engine {
    let mut engine = Engine::new();
    limits.apply(&mut engine);
    register_reply(&mut engine);

    // print/debug go to the guest's stdout, as in other guest languages.
    engine.on_print(|text| println!("{text}"));
    engine.on_debug(|text, source, pos| match source {
        Some(source) => eprintln!("{source} @ {pos:?} | {text}"),
        None => eprintln!("{pos:?} | {text}"),
    });

    engine
}

/// Loads a script file once: compile, check for `Main(req)`, run top level.
#[derive(Debug, Clone)]
pub struct RhaiLoader {
    path: PathBuf,
    limits: RhaiLimits,
}

impl RhaiLoader {
    pub fn new(path: impl Into<PathBuf>, limits: RhaiLimits) -> Self {
        Self {
            path: path.into(),
            limits,
        }
    }
}

impl GuestLoader for RhaiLoader {
    type Guest = RhaiGuest;

    fn load(self) -> Result<RhaiGuest, LoadError> {
        let source = std::fs::read_to_string(&self.path).map_err(|e| {
            tracing::debug!(error = %e, path = %self.path.display(), "Cannot read script");
            LoadError::missing(self.path.display().to_string())
        })?;

        let engine = create_engine(&self.limits);
        let ast = engine
            .compile(&source)
            .map_err(|e| LoadError::compile(e.to_string()))?;

        let has_entry_point = ast
            .iter_functions()
            .any(|f| f.name == ENTRY_POINT && f.params.len() == 1);
        if !has_entry_point {
            return Err(LoadError::missing_entry_point());
        }

        let mut scope = Scope::new();
        engine
            .run_ast_with_scope(&mut scope, &ast)
            .map_err(|e| LoadError::init(e.to_string()))?;

        tracing::info!(
            path = %self.path.display(),
            functions = ast.iter_functions().count(),
            "Script loaded"
        );
        Ok(RhaiGuest { engine, ast, scope })
    }
}

/// A loaded script. Top-level statements have already run.
pub struct RhaiGuest {
    engine: Engine,
    ast: AST,
    scope: Scope<'static>,
}

impl Guest for RhaiGuest {
    fn invoke(&mut self, request: Request) -> Result<Reply, InvokeError> {
        let req = build_request_map(request);
        let options = CallFnOptions::new().eval_ast(false).rewind_scope(true);

        let result: Dynamic = self
            .engine
            .call_fn_with_options(options, &mut self.scope, &self.ast, ENTRY_POINT, (req,))
            .map_err(InvokeError::raised)?;

        let (value, status) = if result.is::<ScriptReply>() {
            let reply = result.cast::<ScriptReply>();
            (reply.value, reply.status)
        } else {
            (result, None)
        };

        let json =
            dynamic_to_json(&value).map_err(|e| InvokeError::Unserializable(e.to_string()))?;
        let reply = Reply::new(json);
        Ok(match status {
            Some(status) => reply.with_status(status),
            None => reply,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn script_file(source: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".rhai")
            .tempfile()
            .unwrap();
        file.write_all(source.as_bytes()).unwrap();
        file
    }

    fn load(source: &str) -> Result<RhaiGuest, LoadError> {
        let file = script_file(source);
        RhaiLoader::new(file.path(), RhaiLimits::default()).load()
    }

    fn request(json: &str) -> Request {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn main_receives_args() {
        let mut guest = load(r#"fn Main(req) { #{ got: req.args.k } }"#).unwrap();
        let reply = guest.invoke(request(r#"{"args":{"k":"v"}}"#)).unwrap();
        assert_eq!(reply, Reply::new(json!({"got": "v"})));
    }

    #[test]
    fn respond_sets_status() {
        let mut guest = load(r#"fn Main(req) { respond("gone", #{ status: 410 }) }"#).unwrap();
        let reply = guest.invoke(Request::default()).unwrap();
        assert_eq!(reply.value, json!("gone"));
        assert_eq!(reply.status(), Some(410));
    }

    #[test]
    fn missing_fields_are_absent_keys() {
        let mut guest = load(r#"fn Main(req) { ["body" in req, "path" in req] }"#).unwrap();
        let reply = guest.invoke(request(r#"{"path":"/p"}"#)).unwrap();
        assert_eq!(reply.value, json!([false, true]));
    }

    #[test]
    fn runtime_error_is_raised() {
        let mut guest = load(r#"fn Main(req) { throw "nope"; }"#).unwrap();
        let err = guest.invoke(Request::default()).unwrap_err();
        assert!(matches!(err, InvokeError::Raised(_)));
    }

    #[test]
    fn script_without_main_fails_to_load() {
        let err = load("fn main(req) { 1 }").err().unwrap();
        assert!(matches!(err, LoadError::MissingEntryPoint { .. }));

        let err = load("fn Main() { 1 }").err().unwrap();
        assert!(matches!(err, LoadError::MissingEntryPoint { .. }));
    }

    #[test]
    fn syntax_error_fails_to_load() {
        let err = load("fn Main(req) { ").err().unwrap();
        assert!(matches!(err, LoadError::Compile { .. }));
    }

    #[test]
    fn failing_top_level_fails_to_load() {
        let err = load(r#"throw "init"; fn Main(req) { 1 }"#).err().unwrap();
        assert!(matches!(err, LoadError::Init { .. }));
    }

    #[test]
    fn missing_file_fails_to_load() {
        let err = RhaiLoader::new("/nonexistent/fn.rhai", RhaiLimits::default())
            .load()
            .err()
            .unwrap();
        assert!(matches!(err, LoadError::Missing { .. }));
    }

    #[test]
    fn operation_limit_is_per_call() {
        let file = script_file(
            r#"
            fn Main(req) {
                if "spin" in req.args { loop {} }
                "done"
            }
            "#,
        );
        let limits = RhaiLimits {
            max_operations: Some(10_000),
            ..Default::default()
        };
        let mut guest = RhaiLoader::new(file.path(), limits).load().unwrap();

        assert!(guest.invoke(request(r#"{"args":{"spin":"1"}}"#)).is_err());
        let reply = guest.invoke(request(r#"{"args":{}}"#)).unwrap();
        assert_eq!(reply.value, json!("done"));
    }
}
