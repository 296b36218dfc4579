//! Generation of `cloudstation.hcl`, the declarative config the runner
//! parses back before driving the registry/deploy/release stages.
//!
//! Registry credentials are never inlined: the registry block references
//! `var.registry_username` / `var.registry_password`, and matching sensitive
//! variable declarations bound to `REGISTRY_USERNAME` / `REGISTRY_PASSWORD`
//! are appended at the end of the document.

use super::{quote, DescriptorContext, DEPLOY_USE, VARS_FILE_NAME};
use std::fmt::Write as _;

pub fn render_config_doc(ctx: &DescriptorContext<'_>) -> String {
    let params = ctx.params;
    let builder = ctx.normalized_builder();
    let job_id = params.job_id.as_str();

    let mut doc = String::new();

    writeln!(doc, "project = {}", quote(job_id)).unwrap();
    doc.push('\n');
    doc.push_str("runner {\n  enabled = true\n}\n");
    doc.push('\n');

    writeln!(doc, "app {} {{", quote(job_id)).unwrap();

    // build
    doc.push_str("  build {\n");
    writeln!(doc, "    use = {}", quote(builder)).unwrap();
    match builder {
        "csdocker" => {
            let dockerfile = if params.dockerfile.is_empty() {
                "Dockerfile"
            } else {
                &params.dockerfile
            };
            writeln!(doc, "    dockerfile = {}", quote(dockerfile)).unwrap();
        }
        "noop" => {
            writeln!(doc, "    image = {}", quote(&params.image_name)).unwrap();
            let tag = if params.image_tag.is_empty() {
                "latest"
            } else {
                &params.image_tag
            };
            writeln!(doc, "    tag = {}", quote(tag)).unwrap();
        }
        _ => {
            if !params.start_command.is_empty() {
                writeln!(doc, "    start_command = {}", quote(&params.start_command)).unwrap();
            }
        }
    }
    doc.push_str("  }\n");

    // registry, only when there is something to push
    if ctx.push_enabled() {
        let (image, tag) = registry_image(ctx);
        doc.push('\n');
        doc.push_str("  registry {\n");
        doc.push_str("    use = \"docker\"\n");
        writeln!(doc, "    image = {}", quote(&image)).unwrap();
        writeln!(doc, "    tag = {}", quote(&tag)).unwrap();
        doc.push_str("    username = var.registry_username\n");
        doc.push_str("    password = var.registry_password\n");
        doc.push_str("  }\n");
    }

    // deploy
    doc.push('\n');
    doc.push_str("  deploy {\n");
    writeln!(doc, "    use = {}", quote(DEPLOY_USE)).unwrap();
    writeln!(doc, "    variable_files = [{}]", quote(VARS_FILE_NAME)).unwrap();
    doc.push_str("  }\n");

    doc.push_str("}\n");

    if ctx.push_enabled() {
        doc.push('\n');
        doc.push_str(credential_variable("registry_username", "REGISTRY_USERNAME").as_str());
        doc.push('\n');
        doc.push_str(credential_variable("registry_password", "REGISTRY_PASSWORD").as_str());
    }

    doc
}

fn registry_image(ctx: &DescriptorContext<'_>) -> (String, String) {
    if let Some(artifact) = ctx.artifact {
        return (artifact.image.clone(), artifact.tag.clone());
    }
    let params = ctx.params;
    let image = if params.private_registry.is_empty() {
        params.job_id.as_str().to_string()
    } else {
        format!("{}/{}", params.private_registry, params.job_id)
    };
    (image, params.deployment_id.as_str().to_string())
}

fn credential_variable(name: &str, env: &str) -> String {
    format!(
        "variable {} {{\n  type = \"string\"\n  sensitive = true\n  default = \"\"\n  env = [{}]\n}}\n",
        quote(name),
        quote(env)
    )
}
