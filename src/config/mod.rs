//! # Declarative Configuration
//!
//! Parses the `cloudstation.hcl` document into [`Config`].
//!
//! Variables may be referenced inside plugin config (`var.NAME`), but their
//! values depend on the process environment, so decoding runs twice:
//!
//! 1. **Skeleton pass** — parse the document and collect the `variable`
//!    declarations. Expressions that need the bound context fail literal
//!    evaluation and are silently skipped.
//! 2. **Bound pass** — evaluate the whole document against a context that
//!    exposes the resolved variables under `var` plus the helper functions
//!    `env`, `lower`, `upper`, `concat`, then decode it.
//!
//! After decoding, literal `env("NAME")` / `${NAME}` references inside
//! string values are expanded against the environment.

mod eval;
mod expand;
mod model;
mod variable;

pub use model::{Application, Config, PluginBlock, RunnerBlock, Variable};

use crate::error::ConfigError;
use crate::plugins::{PluginConfig, PluginRegistry};
use hcl::eval::{Context, Evaluate};
use hcl::{Block, Body, Expression};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::OnceLock;

/// Environment access, injectable so tests never touch process env.
pub trait EnvLookup {
    fn get(&self, name: &str) -> Option<String>;
}

/// Reads the real process environment.
pub struct ProcessEnv;

impl EnvLookup for ProcessEnv {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl EnvLookup for HashMap<String, String> {
    fn get(&self, name: &str) -> Option<String> {
        HashMap::get(self, name).cloned()
    }
}

impl EnvLookup for BTreeMap<String, String> {
    fn get(&self, name: &str) -> Option<String> {
        BTreeMap::get(self, name).cloned()
    }
}

fn name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap())
}

/// Parse a document from disk.
pub fn parse_file(path: &Path, env: &dyn EnvLookup) -> Result<Config, ConfigError> {
    let source = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    parse_str(&source, env)
}

/// Parse a document from memory.
pub fn parse_str(source: &str, env: &dyn EnvLookup) -> Result<Config, ConfigError> {
    // Skeleton pass: syntax check plus variable-declaration discovery.
    let body = hcl::parse(source).map_err(|e| ConfigError::Syntax(e.to_string()))?;
    let declarations = variable::collect_declarations(&body);
    let resolved = variable::resolve(&declarations, env);

    // Bound pass: evaluate everything with variables and helpers in scope.
    let ctx = eval::bound_context(&resolved);
    let mut bound = body;
    bound
        .evaluate_in_place(&ctx)
        .map_err(|errors| ConfigError::Bind(errors.to_string()))?;

    let mut config = decode_document(&bound)?;
    config.variables = declarations;

    expand_config(&mut config, env);
    validate(&config)?;
    Ok(config)
}

fn expand_config(config: &mut Config, env: &dyn EnvLookup) {
    for app in &mut config.applications {
        expand::expand_config_map(&mut app.build.config, env);
        expand::expand_config_map(&mut app.deploy.config, env);
        if let Some(registry) = &mut app.registry {
            expand::expand_config_map(&mut registry.config, env);
        }
        if let Some(release) = &mut app.release {
            expand::expand_config_map(&mut release.config, env);
        }
        expand::expand_config_map(&mut app.config, env);
    }
    if let Some(runner) = &mut config.runner {
        expand::expand_env_map(&mut runner.env, env);
    }
}

// Decoding helpers. Expressions were already evaluated in place, so literal
// evaluation against an empty context is sufficient here.

fn literal(expr: &Expression) -> Option<hcl::Value> {
    expr.evaluate(&Context::new()).ok()
}

fn literal_string(expr: &Expression) -> Option<String> {
    match literal(expr)? {
        hcl::Value::String(s) => Some(s),
        hcl::Value::Number(n) => Some(n.to_string()),
        hcl::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn literal_bool(expr: &Expression) -> Option<bool> {
    literal(expr).and_then(|v| v.as_bool())
}

fn json_of(expr: &Expression) -> serde_json::Value {
    literal(expr)
        .and_then(|v| serde_json::to_value(&v).ok())
        .unwrap_or(serde_json::Value::Null)
}

fn string_map_of(expr: &Expression) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    if let Some(hcl::Value::Object(map)) = literal(expr) {
        for (key, value) in map {
            match value {
                hcl::Value::String(s) => {
                    out.insert(key, s);
                }
                hcl::Value::Number(n) => {
                    out.insert(key, n.to_string());
                }
                hcl::Value::Bool(b) => {
                    out.insert(key, b.to_string());
                }
                _ => {}
            }
        }
    }
    out
}

fn body_to_json(body: &Body) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for attr in body.attributes() {
        map.insert(attr.key().to_string(), json_of(attr.expr()));
    }
    for block in body.blocks() {
        map.insert(block.identifier().to_string(), body_to_json(block.body()));
    }
    serde_json::Value::Object(map)
}

fn decode_plugin_block(block: &Block) -> PluginBlock {
    let mut plugin = PluginBlock::default();
    for attr in block.body().attributes() {
        if attr.key() == "use" {
            plugin.use_name = literal_string(attr.expr()).unwrap_or_default();
        } else {
            plugin
                .config
                .insert(attr.key().to_string(), json_of(attr.expr()));
        }
    }
    for inner in block.body().blocks() {
        plugin
            .config
            .insert(inner.identifier().to_string(), body_to_json(inner.body()));
    }
    plugin
}

fn decode_runner(block: &Block) -> RunnerBlock {
    let mut runner = RunnerBlock::default();
    for attr in block.body().attributes() {
        match attr.key() {
            "enabled" => runner.enabled = literal_bool(attr.expr()).unwrap_or(false),
            "profile" => runner.profile = literal_string(attr.expr()),
            "data_source" => runner.data_source = literal_string(attr.expr()),
            "env" => runner.env = string_map_of(attr.expr()),
            _ => {}
        }
    }
    runner
}

fn decode_application(block: &Block) -> Result<Application, ConfigError> {
    let name = block
        .labels()
        .first()
        .map(|label| label.as_str().to_string())
        .unwrap_or_default();

    let mut path = None;
    let mut url = None;
    let mut labels = BTreeMap::new();
    let mut config = PluginConfig::new();
    let mut build = None;
    let mut registry = None;
    let mut deploy = None;
    let mut release = None;

    for attr in block.body().attributes() {
        match attr.key() {
            "path" => path = literal_string(attr.expr()),
            "url" => url = literal_string(attr.expr()),
            "labels" => labels = string_map_of(attr.expr()),
            "config" => {
                if let serde_json::Value::Object(map) = json_of(attr.expr()) {
                    config = map.into_iter().collect();
                }
            }
            _ => {}
        }
    }

    for inner in block.body().blocks() {
        match inner.identifier() {
            "build" => build = Some(decode_plugin_block(inner)),
            "registry" => registry = Some(decode_plugin_block(inner)),
            "deploy" => deploy = Some(decode_plugin_block(inner)),
            "release" => release = Some(decode_plugin_block(inner)),
            "config" => {
                if let serde_json::Value::Object(map) = body_to_json(inner.body()) {
                    config = map.into_iter().collect();
                }
            }
            _ => {}
        }
    }

    let build = build.ok_or_else(|| {
        ConfigError::validation(format!("app.{}.build", name), "block is required")
    })?;
    let deploy = deploy.ok_or_else(|| {
        ConfigError::validation(format!("app.{}.deploy", name), "block is required")
    })?;

    Ok(Application {
        name,
        path,
        labels,
        build,
        registry,
        deploy,
        release,
        url,
        config,
    })
}

fn decode_document(body: &Body) -> Result<Config, ConfigError> {
    let mut config = Config::default();

    for attr in body.attributes() {
        if attr.key() == "project" {
            config.project = literal_string(attr.expr()).unwrap_or_default();
        }
    }

    for block in body.blocks() {
        match block.identifier() {
            "runner" => config.runner = Some(decode_runner(block)),
            "app" => config.applications.push(decode_application(block)?),
            _ => {}
        }
    }

    Ok(config)
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.project.is_empty() || !name_re().is_match(&config.project) {
        return Err(ConfigError::validation(
            "project",
            format!("'{}' must match [A-Za-z0-9_-]+", config.project),
        ));
    }

    if config.applications.is_empty() {
        return Err(ConfigError::validation(
            "app",
            "at least one application is required",
        ));
    }

    let mut seen = std::collections::HashSet::new();
    for app in &config.applications {
        if app.name.is_empty() || !name_re().is_match(&app.name) {
            return Err(ConfigError::validation(
                "app.name",
                format!("'{}' must match [A-Za-z0-9_-]+", app.name),
            ));
        }
        if !seen.insert(app.name.as_str()) {
            return Err(ConfigError::validation(
                "app.name",
                format!("duplicate application '{}'", app.name),
            ));
        }

        for (field, block) in [
            ("build", Some(&app.build)),
            ("deploy", Some(&app.deploy)),
            ("registry", app.registry.as_ref()),
            ("release", app.release.as_ref()),
        ] {
            if let Some(block) = block {
                if block.use_name.is_empty() || !name_re().is_match(&block.use_name) {
                    return Err(ConfigError::validation(
                        format!("app.{}.{}.use", app.name, field),
                        format!("'{}' must match [A-Za-z0-9_-]+", block.use_name),
                    ));
                }
            }
        }
    }

    Ok(())
}

/// Post-parse plugin check: every stage's `use` must resolve to a plugin
/// registered under the matching capability. The release stage is exempt;
/// a missing release manager surfaces at execution time only.
pub fn check_plugins(config: &Config, plugins: &PluginRegistry) -> Result<(), ConfigError> {
    for app in &config.applications {
        if !plugins.has_builder(&app.build.use_name) {
            return Err(ConfigError::validation(
                format!("app.{}.build.use", app.name),
                format!("no builder plugin registered under '{}'", app.build.use_name),
            ));
        }
        if let Some(registry) = &app.registry {
            if !plugins.has_registry(&registry.use_name) {
                return Err(ConfigError::validation(
                    format!("app.{}.registry.use", app.name),
                    format!("no registry plugin registered under '{}'", registry.use_name),
                ));
            }
        }
        if !plugins.has_platform(&app.deploy.use_name) {
            return Err(ConfigError::validation(
                format!("app.{}.deploy.use", app.name),
                format!("no platform plugin registered under '{}'", app.deploy.use_name),
            ));
        }
    }
    Ok(())
}
