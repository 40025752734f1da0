//! Engine safety limits, configured from the environment.

use rhai::Engine;

pub const MAX_OPERATIONS_ENV: &str = "RHAI_MAX_OPERATIONS";
pub const MAX_CALL_LEVELS_ENV: &str = "RHAI_MAX_CALL_LEVELS";
pub const MAX_STRING_SIZE_ENV: &str = "RHAI_MAX_STRING_SIZE";
pub const MAX_ARRAY_SIZE_ENV: &str = "RHAI_MAX_ARRAY_SIZE";
pub const MAX_MAP_SIZE_ENV: &str = "RHAI_MAX_MAP_SIZE";

/// Limits applied to the script engine. `None` keeps the engine default.
///
/// Hitting a limit inside `Main` aborts that call only; it is answered as
/// an invocation failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RhaiLimits {
    /// Maximum number of operations per call
    pub max_operations: Option<u64>,
    /// Maximum function call nesting depth
    pub max_call_levels: Option<usize>,
    /// Maximum size of strings in characters
    pub max_string_size: Option<usize>,
    pub max_array_size: Option<usize>,
    pub max_map_size: Option<usize>,
}

impl RhaiLimits {
    /// Read limits from `RHAI_MAX_*`. Values that do not parse are logged
    /// and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            max_operations: parse_limit(MAX_OPERATIONS_ENV, &lookup),
            max_call_levels: parse_limit(MAX_CALL_LEVELS_ENV, &lookup),
            max_string_size: parse_limit(MAX_STRING_SIZE_ENV, &lookup),
            max_array_size: parse_limit(MAX_ARRAY_SIZE_ENV, &lookup),
            max_map_size: parse_limit(MAX_MAP_SIZE_ENV, &lookup),
        }
    }

    pub fn apply(&self, engine: &mut Engine) {
        if let Some(n) = self.max_operations {
            engine.set_max_operations(n);
        }
        if let Some(n) = self.max_call_levels {
            engine.set_max_call_levels(n);
        }
        if let Some(n) = self.max_string_size {
            engine.set_max_string_size(n);
        }
        if let Some(n) = self.max_array_size {
            engine.set_max_array_size(n);
        }
        if let Some(n) = self.max_map_size {
            engine.set_max_map_size(n);
        }
    }
}

fn parse_limit<T: std::str::FromStr>(
    key: &str,
    lookup: &impl Fn(&str) -> Option<String>,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!(variable = key, value = %raw, "Ignoring invalid engine limit");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn limits_from(vars: &[(&str, &str)]) -> RhaiLimits {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RhaiLimits::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn unset_keeps_engine_defaults() {
        assert_eq!(limits_from(&[]), RhaiLimits::default());
    }

    #[test]
    fn parses_set_values_and_skips_garbage() {
        let limits = limits_from(&[
            (MAX_OPERATIONS_ENV, "5000"),
            (MAX_CALL_LEVELS_ENV, "many"),
            (MAX_MAP_SIZE_ENV, " 16 "),
        ]);
        assert_eq!(limits.max_operations, Some(5000));
        assert_eq!(limits.max_call_levels, None);
        assert_eq!(limits.max_map_size, Some(16));
    }

    #[test]
    fn operation_limit_stops_runaway_scripts() {
        let mut engine = Engine::new();
        RhaiLimits {
            max_operations: Some(1_000),
            ..Default::default()
        }
        .apply(&mut engine);

        let result = engine.run("let x = 0; loop { x += 1; }");
        assert!(result.is_err());
    }
}
