//! Post-parse substitution of environment references embedded in string
//! values: `env("NAME")`, `env('NAME')`, and `${NAME}`.
//!
//! Expansion recurses into nested maps and lists; non-string leaves pass
//! through unchanged. Unset names produce empty strings, never failures.
//! Expansion is single-pass: expanded output is not re-scanned, so nested
//! forms stay as-is.

use super::EnvLookup;
use crate::plugins::PluginConfig;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::OnceLock;

fn env_call_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"env\((?:"([A-Za-z_][A-Za-z0-9_]*)"|'([A-Za-z_][A-Za-z0-9_]*)')\)"#).unwrap())
}

fn brace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap())
}

/// Expand both substitution forms in a single string.
pub fn expand_string(input: &str, env: &dyn EnvLookup) -> String {
    let pass_one = env_call_re().replace_all(input, |caps: &regex::Captures<'_>| {
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or_default();
        env.get(name).unwrap_or_default()
    });

    brace_re()
        .replace_all(&pass_one, |caps: &regex::Captures<'_>| {
            env.get(&caps[1]).unwrap_or_default()
        })
        .to_string()
}

/// Expand every string leaf of a JSON-like value tree.
pub fn expand_value(value: &mut Value, env: &dyn EnvLookup) {
    match value {
        Value::String(s) => *s = expand_string(s, env),
        Value::Array(items) => {
            for item in items {
                expand_value(item, env);
            }
        }
        Value::Object(map) => {
            for (_, entry) in map.iter_mut() {
                expand_value(entry, env);
            }
        }
        _ => {}
    }
}

/// Expand every value of a plugin config map.
pub fn expand_config_map(map: &mut PluginConfig, env: &dyn EnvLookup) {
    for (_, value) in map.iter_mut() {
        expand_value(value, env);
    }
}

/// Expand a plain string-to-string environment map.
pub fn expand_env_map(map: &mut BTreeMap<String, String>, env: &dyn EnvLookup) {
    for (_, value) in map.iter_mut() {
        *value = expand_string(value, env);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn env() -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("DATABASE_URL".to_string(), "postgres://db:5432".to_string());
        map.insert("REGION".to_string(), "eu-west-1".to_string());
        map
    }

    #[test]
    fn test_double_and_single_quoted_env_calls() {
        let env = env();
        assert_eq!(
            expand_string(r#"env("DATABASE_URL")"#, &env),
            "postgres://db:5432"
        );
        assert_eq!(
            expand_string("env('DATABASE_URL')", &env),
            "postgres://db:5432"
        );
    }

    #[test]
    fn test_brace_form() {
        let env = env();
        assert_eq!(expand_string("region-${REGION}", &env), "region-eu-west-1");
    }

    #[test]
    fn test_unset_names_become_empty() {
        let env = env();
        assert_eq!(expand_string("x=${NOT_SET}", &env), "x=");
        assert_eq!(expand_string(r#"env("NOT_SET")"#, &env), "");
    }

    #[test]
    fn test_recursive_expansion() {
        let env = env();
        let mut value = json!({
            "database": "env('DATABASE_URL')",
            "nested": {"region": "${REGION}"},
            "list": ["${REGION}", 42, true],
            "count": 3
        });
        expand_value(&mut value, &env);
        assert_eq!(value["database"], "postgres://db:5432");
        assert_eq!(value["nested"]["region"], "eu-west-1");
        assert_eq!(value["list"][0], "eu-west-1");
        assert_eq!(value["list"][1], 42);
        assert_eq!(value["count"], 3);
    }

    #[test]
    fn test_single_pass_no_rescan() {
        let mut env = HashMap::new();
        env.insert("INNER".to_string(), "${OUTER}".to_string());
        env.insert("OUTER".to_string(), "surprise".to_string());
        // The inserted text is not expanded again.
        assert_eq!(expand_string("${INNER}", &env), "${OUTER}");
    }
}
