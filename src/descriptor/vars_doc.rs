//! Generation of `vars.hcl`, the flat variable file consumed by the
//! downstream packaging tool.
//!
//! Field order is byte-stable and part of the external contract: the pack
//! template binds fields positionally, so emission order never varies, and
//! a handful of fields are written even when empty.

use super::{json_to_hcl, quote, quote_list, DescriptorContext};
use crate::domain::{HealthCheck, NetworkPort};
use std::fmt::Write as _;

const DEFAULT_RESTART_ATTEMPTS: i64 = 3;
const MEMORY_MAX_FLOOR: i64 = 512;

pub fn render_vars_doc(ctx: &DescriptorContext<'_>) -> String {
    let params = ctx.params;
    let mut doc = String::new();
    let mut field = |line: String| {
        doc.push_str(&line);
        doc.push('\n');
    };

    field(format!("job_name = {}", quote(params.job_id.as_str())));
    field(format!("count = {}", replica_count(params.replica_count.value())));
    field(format!("secret_path = {}", quote(&params.secret_path)));
    field(format!(
        "restart_attempts = {}",
        restart_attempts(&params.restart_mode, params.restart_attempts.value())
    ));
    field(format!(
        "restart_mode = {}",
        quote(restart_mode(&params.restart_mode))
    ));

    let memory = params.ram.value();
    field(format!(
        "resources = {{cpu = {}, memory = {}, memory_max = {}, gpu = {}}}",
        params.cpu.value(),
        memory,
        (memory * 2).max(MEMORY_MAX_FLOOR),
        params.gpu.value()
    ));

    if params.gpu.value() > 0 {
        field(format!("gpu_type = {}", quote(&params.gpu_model)));
    }

    field(format!("node_pool = {}", quote(&params.node_pool)));
    field(format!("user_id = {}", params.user_id.value()));
    field(format!("alloc_id = {}", quote(params.alloc_id.as_str())));
    field(format!("project_id = {}", quote(params.project_id.as_str())));
    field(format!("service_id = {}", quote(params.service_id.as_str())));
    field(format!(
        "shared_secret_path = {}",
        quote(&params.shared_secret_path)
    ));
    field(format!("uses_kv_engine = {}", params.uses_kv_engine));
    field(format!(
        "owner_uses_kv_engine = {}",
        params.owner_uses_kv_engine
    ));
    field(format!("regions = {}", quote_list(&params.regions)));
    field(format!(
        "private_registry = {}",
        quote(&params.private_registry)
    ));
    field(format!(
        "private_registry_provider = {}",
        quote(&params.private_registry_provider)
    ));
    field(format!("user = {}", quote(&params.docker_user)));
    field(format!("command = {}", quote(&params.command)));
    field(format!("image = {}", quote(&ctx.image_reference())));
    field(format!("use_csi_volume = {}", params.use_csi_volume));
    field(format!("volume_name = {}", quote(&params.volume_name)));
    field(format!(
        "volume_mount_destination = {}",
        quote(&params.volume_mount_destination)
    ));
    field(format!("config_files = {}", quote_list(&params.config_files)));

    if let Some(consul) = &params.consul {
        field(format!(
            "consul_service_name = {}",
            quote(&consul.service_name)
        ));
        field(format!(
            "consul_linked_services = {}",
            quote_list(&consul.linked_services)
        ));
    }

    field(format!("entrypoint = {}", quote(&params.entrypoint)));
    field(format!("template = {}", quote(&params.template)));

    if !params.cluster_domain.is_empty() {
        field(format!("cluster_domain = {}", quote(&params.cluster_domain)));
    }

    field(render_network(ctx));
    field(format!("use_tls = {}", params.use_tls));

    if let Some(tls) = &params.tls {
        field(format!("tls = {}", json_to_hcl(tls)));
    }

    field(format!(
        "vault_linked_secrets = {}",
        quote_list(&params.vault_linked_secrets)
    ));

    if let Some(update) = &params.update {
        field(format!("update = {}", json_to_hcl(update)));
    }
    if let Some(job_config) = &params.job_config {
        field(format!("job_config = {}", json_to_hcl(job_config)));
    }

    if let Some(args) = render_args(ctx) {
        field(args);
    }

    doc
}

fn replica_count(value: i64) -> i64 {
    if value > 0 {
        value
    } else {
        1
    }
}

fn restart_mode(mode: &str) -> &'static str {
    match mode {
        "delay" => "delay",
        _ => "fail",
    }
}

fn restart_attempts(mode: &str, requested: i64) -> i64 {
    if mode == "never" {
        return 0;
    }
    if requested > 0 {
        requested
    } else {
        DEFAULT_RESTART_ATTEMPTS
    }
}

/// Container argument vector. Emitted when vault-linked secrets are set, or
/// when a start command is set and the builder does not consume it itself.
fn render_args(ctx: &DescriptorContext<'_>) -> Option<String> {
    let params = ctx.params;
    let builder = ctx.normalized_builder();
    let builder_owns_start = matches!(builder, "nixpacks" | "railpack");

    let start_driven = !params.start_command.is_empty() && !builder_owns_start;
    if !start_driven && params.vault_linked_secrets.is_empty() {
        return None;
    }

    let args = if start_driven {
        vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            params.start_command.clone(),
        ]
    } else {
        Vec::new()
    };
    Some(format!("args = {}", quote_list(&args)))
}

/// Per-builder default port when neither the user nor the artifact named one.
fn default_port(builder: &str) -> i64 {
    match builder {
        "nixpacks" | "railpack" => 3000,
        "csdocker" => 8000,
        _ => 3000,
    }
}

/// Three-tier network resolution: user entries, then the artifact's first
/// exposed port, then the builder default. Ports equal to 0 are dropped.
fn render_network(ctx: &DescriptorContext<'_>) -> String {
    let params = ctx.params;

    let entries: Vec<String> = if !params.networks.is_empty() {
        params
            .networks
            .iter()
            .filter(|entry| entry.port() != 0)
            .map(format_user_entry)
            .collect()
    } else {
        let port = ctx
            .artifact
            .and_then(|artifact| artifact.exposed_ports.first().copied())
            .map(i64::from)
            .unwrap_or_else(|| default_port(ctx.normalized_builder()));
        vec![format_synthesized_entry(port)]
    };

    if entries.is_empty() {
        return "network = []".to_string();
    }

    let mut out = String::from("network = [\n");
    for entry in entries {
        writeln!(out, "  {},", entry).unwrap();
    }
    out.push(']');
    out
}

fn format_entry(port: i64, port_type: &str, public: bool, domain: &str, custom_domain: &str, has_health_check: &str, check: &HealthCheck) -> String {
    format!(
        "{{name = {name}, port = {port}, type = {ptype}, public = {public}, domain = {domain}, custom_domain = {custom}, has_health_check = {hc}, health_check = {{type = {ct}, interval = {interval}, path = {path}, timeout = {timeout}, port = {cport}}}}}",
        name = quote(&port.to_string()),
        port = port,
        ptype = quote(port_type),
        public = public,
        domain = quote(domain),
        custom = quote(custom_domain),
        hc = quote(has_health_check),
        ct = quote(&check.check_type),
        interval = quote(&check.interval),
        path = quote(&check.path),
        timeout = quote(&check.timeout),
        cport = check.port.value(),
    )
}

fn format_user_entry(entry: &NetworkPort) -> String {
    let port = entry.port();
    let check = entry.health_check.normalized(port);
    format_entry(
        port,
        &entry.port_type,
        entry.public,
        &entry.domain,
        &entry.custom_domain,
        &entry.has_health_check,
        &check,
    )
}

fn format_synthesized_entry(port: i64) -> String {
    let check = HealthCheck {
        check_type: "tcp".to_string(),
        path: "/".to_string(),
        interval: "30s".to_string(),
        timeout: "30s".to_string(),
        port: crate::domain::FlexInt(port),
    };
    format_entry(port, "http", false, "", "", "", &check)
}
