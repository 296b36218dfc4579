//! Evaluation context for the second (bound) decoding pass.
//!
//! The context exposes the resolved variables under the `var` namespace and
//! a small fixed set of helper functions: `env(name)`, `lower`, `upper`,
//! `concat`. Bare type keywords (`string`, `number`, `bool`) are declared so
//! unquoted `type =` attributes in variable blocks evaluate cleanly.

use hcl::eval::{Context, FuncArgs, FuncDef, ParamType};
use hcl::Value;
use std::collections::BTreeMap;

fn env_func(args: FuncArgs) -> Result<Value, String> {
    let name = args[0]
        .as_str()
        .ok_or_else(|| "env() expects a string argument".to_string())?;
    Ok(Value::from(std::env::var(name).unwrap_or_default()))
}

fn lower_func(args: FuncArgs) -> Result<Value, String> {
    let value = args[0]
        .as_str()
        .ok_or_else(|| "lower() expects a string argument".to_string())?;
    Ok(Value::from(value.to_lowercase()))
}

fn upper_func(args: FuncArgs) -> Result<Value, String> {
    let value = args[0]
        .as_str()
        .ok_or_else(|| "upper() expects a string argument".to_string())?;
    Ok(Value::from(value.to_uppercase()))
}

fn concat_func(args: FuncArgs) -> Result<Value, String> {
    let mut out = String::new();
    for arg in args.iter() {
        match arg.as_str() {
            Some(s) => out.push_str(s),
            None => return Err("concat() expects string arguments".to_string()),
        }
    }
    Ok(Value::from(out))
}

/// Build the bound-pass context from the resolved variable values.
pub fn bound_context(variables: &BTreeMap<String, String>) -> Context<'static> {
    let mut ctx = Context::new();

    let var_object: hcl::value::Map<String, Value> = variables
        .iter()
        .map(|(name, value)| (name.clone(), Value::from(value.clone())))
        .collect();
    ctx.declare_var("var", Value::Object(var_object));

    // Unquoted type keywords in variable blocks.
    ctx.declare_var("string", Value::from("string"));
    ctx.declare_var("number", Value::from("number"));
    ctx.declare_var("bool", Value::from("bool"));

    ctx.declare_func(
        "env",
        FuncDef::builder().param(ParamType::String).build(env_func),
    );
    ctx.declare_func(
        "lower",
        FuncDef::builder().param(ParamType::String).build(lower_func),
    );
    ctx.declare_func(
        "upper",
        FuncDef::builder().param(ParamType::String).build(upper_func),
    );
    ctx.declare_func(
        "concat",
        FuncDef::builder()
            .variadic_param(ParamType::String)
            .build(concat_func),
    );

    ctx
}
