//! Deployment-descriptor generation.
//!
//! Two textual documents are produced per deployment: `cloudstation.hcl`,
//! the declarative config the runner itself parses back, and `vars.hcl`,
//! the flat variable file the downstream packaging tool templates from.
//! Both renderings are deterministic; the vars file's field order is part of
//! the external contract.

mod config_doc;
mod vars_doc;

pub use config_doc::render_config_doc;
pub use vars_doc::render_vars_doc;

use crate::domain::{Artifact, DeployParams};
use crate::error::RunnerError;
use anyhow::Context as _;
use std::path::Path;

pub const CONFIG_FILE_NAME: &str = "cloudstation.hcl";
pub const VARS_FILE_NAME: &str = "vars.hcl";

/// The deploy plugin every generated config targets.
pub const DEPLOY_USE: &str = "nomad-pack";

/// Everything both documents are rendered from.
pub struct DescriptorContext<'a> {
    pub params: &'a DeployParams,
    /// Builder selected for this attempt; `"noop"` for pre-built images.
    pub builder: &'a str,
    /// Present once a build has produced one; `network` tier two keys off it.
    pub artifact: Option<&'a Artifact>,
}

impl<'a> DescriptorContext<'a> {
    pub fn new(params: &'a DeployParams, builder: &'a str) -> Self {
        Self {
            params,
            builder,
            artifact: None,
        }
    }

    pub fn with_artifact(mut self, artifact: &'a Artifact) -> Self {
        self.artifact = Some(artifact);
        self
    }

    /// Canonical builder name: `docker` is an alias for `csdocker`, and an
    /// empty selection falls back to `railpack`.
    pub fn normalized_builder(&self) -> &str {
        match self.builder {
            "docker" => "csdocker",
            "" => "railpack",
            other => other,
        }
    }

    /// Registry block (and its credential variables) are emitted only when
    /// there is something to push.
    pub fn push_enabled(&self) -> bool {
        !self.params.disable_push && self.normalized_builder() != "noop"
    }

    /// The image reference the descriptor advertises.
    pub fn image_reference(&self) -> String {
        if let Some(artifact) = self.artifact {
            return artifact.full_image();
        }
        if !self.params.image_name.is_empty() {
            let tag = if self.params.image_tag.is_empty() {
                "latest"
            } else {
                &self.params.image_tag
            };
            return format!("{}:{}", self.params.image_name, tag);
        }
        String::new()
    }

    /// Write both documents under `dir`, creating it if missing. Single-shot
    /// writes; the orchestrator restarts from scratch on a crash.
    pub fn write_files(&self, dir: &Path) -> Result<(), RunnerError> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating descriptor directory {}", dir.display()))?;

        std::fs::write(dir.join(CONFIG_FILE_NAME), render_config_doc(self))
            .with_context(|| format!("writing {}", CONFIG_FILE_NAME))?;
        std::fs::write(dir.join(VARS_FILE_NAME), render_vars_doc(self))
            .with_context(|| format!("writing {}", VARS_FILE_NAME))?;
        Ok(())
    }
}

/// Quote a string as an HCL literal. Interpolation openers are escaped so
/// the text survives a parse round trip verbatim.
pub(crate) fn quote(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '"' => escaped.push_str("\\\""),
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            _ => escaped.push(ch),
        }
    }
    let escaped = escaped.replace("${", "$${").replace("%{", "%%{");
    format!("\"{}\"", escaped)
}

/// Render a string list as an HCL literal.
pub(crate) fn quote_list(values: &[String]) -> String {
    let items: Vec<String> = values.iter().map(|v| quote(v)).collect();
    format!("[{}]", items.join(", "))
}

/// Render an opaque JSON value as an HCL literal. Object keys are emitted in
/// map order, which is stable for a given input.
pub(crate) fn json_to_hcl(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "null".to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => quote(s),
        serde_json::Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(json_to_hcl).collect();
            format!("[{}]", rendered.join(", "))
        }
        serde_json::Value::Object(map) => {
            let rendered: Vec<String> = map
                .iter()
                .map(|(key, entry)| {
                    let key = if key
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
                        && !key.is_empty()
                    {
                        key.clone()
                    } else {
                        quote(key)
                    };
                    format!("{} = {}", key, json_to_hcl(entry))
                })
                .collect();
            format!("{{{}}}", rendered.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FlexString;

    #[test]
    fn test_builder_normalization() {
        let params = DeployParams::default();
        assert_eq!(DescriptorContext::new(&params, "docker").normalized_builder(), "csdocker");
        assert_eq!(DescriptorContext::new(&params, "").normalized_builder(), "railpack");
        assert_eq!(DescriptorContext::new(&params, "nixpacks").normalized_builder(), "nixpacks");
        assert_eq!(DescriptorContext::new(&params, "noop").normalized_builder(), "noop");
    }

    #[test]
    fn test_push_enabled_gating() {
        let mut params = DeployParams::default();
        assert!(DescriptorContext::new(&params, "railpack").push_enabled());
        assert!(!DescriptorContext::new(&params, "noop").push_enabled());

        params.disable_push = true;
        assert!(!DescriptorContext::new(&params, "railpack").push_enabled());
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("plain"), "\"plain\"");
        assert_eq!(quote("a\"b"), "\"a\\\"b\"");
        assert_eq!(quote("a\\b"), "\"a\\\\b\"");
        assert_eq!(quote("${HOME}"), "\"$${HOME}\"");
    }

    #[test]
    fn test_json_to_hcl() {
        let value = serde_json::json!({
            "max_parallel": 1,
            "stagger": "30s",
            "auto_revert": true,
            "canary weights": [1, 2]
        });
        assert_eq!(
            json_to_hcl(&value),
            r#"{auto_revert = true, "canary weights" = [1, 2], max_parallel = 1, stagger = "30s"}"#
        );
    }

    #[test]
    fn test_write_files_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("descriptors");
        let params = DeployParams {
            job_id: FlexString::from("job-1"),
            deployment_id: FlexString::from("d-1"),
            service_id: FlexString::from("s-1"),
            ..DeployParams::default()
        };
        let ctx = DescriptorContext::new(&params, "railpack");
        ctx.write_files(&target).unwrap();
        assert!(target.join(CONFIG_FILE_NAME).is_file());
        assert!(target.join(VARS_FILE_NAME).is_file());
    }
}
