//! Variable declaration discovery and resolution.
//!
//! Declarations are collected during the first, unbound decoding pass.
//! Attribute expressions that need the bound context (anything referencing
//! `var.*`) simply fail literal evaluation and are skipped; only the
//! declarations themselves are retained from pass one.

use super::model::Variable;
use super::EnvLookup;
use hcl::eval::{Context, Evaluate};
use hcl::{Block, Body, Expression};
use std::collections::BTreeMap;

/// Evaluate an expression that is expected to be a literal. Failures are
/// tolerated (returns `None`); this is what makes pass one silent.
fn eval_literal(expr: &Expression) -> Option<hcl::Value> {
    expr.evaluate(&Context::new()).ok()
}

fn as_string(value: &hcl::Value) -> Option<String> {
    match value {
        hcl::Value::String(s) => Some(s.clone()),
        hcl::Value::Number(n) => Some(n.to_string()),
        hcl::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn decode_declaration(block: &Block) -> Option<Variable> {
    let name = block.labels().first()?.as_str().to_string();
    let mut variable = Variable {
        name,
        ..Variable::default()
    };

    for attr in block.body().attributes() {
        let value = eval_literal(attr.expr());
        match attr.key() {
            "type" => variable.var_type = value.as_ref().and_then(as_string),
            "sensitive" => {
                variable.sensitive = value.as_ref().and_then(hcl::Value::as_bool).unwrap_or(false)
            }
            "default" => variable.default = value.as_ref().and_then(as_string),
            "env" => {
                if let Some(hcl::Value::Array(items)) = value {
                    variable.env = items.iter().filter_map(as_string).collect();
                }
            }
            "description" => variable.description = value.as_ref().and_then(as_string),
            _ => {}
        }
    }

    Some(variable)
}

/// Collect every `variable "<name>"` block from the raw document.
pub fn collect_declarations(body: &Body) -> Vec<Variable> {
    body.blocks()
        .filter(|block| block.identifier() == "variable")
        .filter_map(decode_declaration)
        .collect()
}

/// Resolve declarations against the environment: the first env entry with a
/// non-empty value wins, then the default, then the empty string.
pub fn resolve(declarations: &[Variable], env: &dyn EnvLookup) -> BTreeMap<String, String> {
    let mut resolved = BTreeMap::new();
    for decl in declarations {
        let from_env = decl
            .env
            .iter()
            .filter_map(|name| env.get(name))
            .find(|value| !value.is_empty());

        let value = from_env
            .or_else(|| decl.default.clone())
            .unwrap_or_default();

        resolved.insert(decl.name.clone(), value);
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn decls(src: &str) -> Vec<Variable> {
        let body = hcl::parse(src).unwrap();
        collect_declarations(&body)
    }

    #[test]
    fn test_collects_declarations() {
        let vars = decls(
            r#"
            variable "registry_username" {
                type = "string"
                sensitive = true
                default = ""
                env = ["REGISTRY_USERNAME"]
            }
            variable "region" {
                default = "eu-west-1"
                description = "target region"
            }
            "#,
        );
        assert_eq!(vars.len(), 2);
        assert_eq!(vars[0].name, "registry_username");
        assert!(vars[0].sensitive);
        assert_eq!(vars[0].env, vec!["REGISTRY_USERNAME"]);
        assert_eq!(vars[1].default.as_deref(), Some("eu-west-1"));
        assert_eq!(vars[1].description.as_deref(), Some("target region"));
    }

    #[test]
    fn test_env_list_resolution_order() {
        let vars = decls(
            r#"
            variable "token" {
                env = ["PRIMARY_TOKEN", "FALLBACK_TOKEN"]
                default = "from-default"
            }
            "#,
        );

        let mut env = HashMap::new();
        env.insert("PRIMARY_TOKEN".to_string(), "first".to_string());
        env.insert("FALLBACK_TOKEN".to_string(), "second".to_string());
        let resolved = resolve(&vars, &env);
        assert_eq!(resolved["token"], "first");

        // Empty first entry falls through to the next.
        let mut env = HashMap::new();
        env.insert("PRIMARY_TOKEN".to_string(), String::new());
        env.insert("FALLBACK_TOKEN".to_string(), "second".to_string());
        let resolved = resolve(&vars, &env);
        assert_eq!(resolved["token"], "second");

        // Neither set: default wins.
        let env: HashMap<String, String> = HashMap::new();
        let resolved = resolve(&vars, &env);
        assert_eq!(resolved["token"], "from-default");
    }

    #[test]
    fn test_no_default_resolves_to_empty() {
        let vars = decls(r#"variable "missing" { env = ["NOT_SET_ANYWHERE"] }"#);
        let env: HashMap<String, String> = HashMap::new();
        let resolved = resolve(&vars, &env);
        assert_eq!(resolved["missing"], "");
    }

    #[test]
    fn test_bound_expressions_are_tolerated() {
        // A declaration attribute referencing var.* cannot evaluate during
        // pass one; the declaration itself must still be collected.
        let vars = decls(
            r#"
            variable "derived" {
                default = var.other
            }
            "#,
        );
        assert_eq!(vars.len(), 1);
        assert_eq!(vars[0].default, None);
    }
}
