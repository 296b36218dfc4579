//! Scheduler-provided task parameters.
//!
//! The scheduler hands the runner a task type tag and a base64-encoded JSON
//! payload. Control planes serialize numeric ids either as numbers or as
//! strings, so every id-like or counter-like field goes through the flexible
//! decoders in [`super::flex`].

use super::flex::{FlexInt, FlexString};
use super::network::NetworkPort;
use crate::error::ParamsError;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Task-type tag, read from the scheduler environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    DeployRepository,
    RedeployRepository,
    DeployImage,
    DestroyJobPack,
}

impl TaskKind {
    pub fn parse(task: &str) -> Result<Self, ParamsError> {
        match task {
            "deploy-repository" => Ok(TaskKind::DeployRepository),
            "redeploy-repository" => Ok(TaskKind::RedeployRepository),
            "deploy-image" => Ok(TaskKind::DeployImage),
            "destroy-job-pack" => Ok(TaskKind::DestroyJobPack),
            other => Err(ParamsError::UnknownTask {
                task: other.to_string(),
            }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::DeployRepository => "deploy-repository",
            TaskKind::RedeployRepository => "redeploy-repository",
            TaskKind::DeployImage => "deploy-image",
            TaskKind::DestroyJobPack => "destroy-job-pack",
        }
    }
}

/// Consul service wiring, forwarded to the descriptor when present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ConsulParams {
    #[serde(alias = "serviceName", default)]
    pub service_name: String,

    #[serde(alias = "linkedServices", default)]
    pub linked_services: Vec<String>,
}

/// Parameters shared by the repository and image deployment tasks.
///
/// Repository-only fields (`repository`, `branch`, `source_url`, ...) stay
/// empty for image deployments, and vice versa.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DeployParams {
    // Identifiers
    #[serde(alias = "jobId", default)]
    pub job_id: FlexString,
    #[serde(alias = "deploymentId", default)]
    pub deployment_id: FlexString,
    #[serde(alias = "serviceId", default)]
    pub service_id: FlexString,
    #[serde(alias = "teamId", default)]
    pub team_id: FlexString,
    #[serde(alias = "userId", default)]
    pub user_id: FlexInt,
    #[serde(alias = "ownerId", default)]
    pub owner_id: FlexString,
    #[serde(alias = "projectId", default)]
    pub project_id: FlexString,
    #[serde(alias = "allocId", default)]
    pub alloc_id: FlexString,

    // Resource allocation
    #[serde(default)]
    pub cpu: FlexInt,
    #[serde(default)]
    pub ram: FlexInt,
    #[serde(default)]
    pub gpu: FlexInt,
    #[serde(alias = "gpuModel", default)]
    pub gpu_model: String,
    #[serde(alias = "replicaCount", default)]
    pub replica_count: FlexInt,
    #[serde(alias = "nodePool", default)]
    pub node_pool: String,
    #[serde(default)]
    pub regions: Vec<String>,

    // Networking
    #[serde(default)]
    pub networks: Vec<NetworkPort>,
    #[serde(alias = "clusterDomain", default)]
    pub cluster_domain: String,
    #[serde(alias = "useTls", default)]
    pub use_tls: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consul: Option<ConsulParams>,

    // Secret-store coordinates
    #[serde(alias = "secretPath", default)]
    pub secret_path: String,
    #[serde(alias = "sharedSecretPath", default)]
    pub shared_secret_path: String,
    #[serde(alias = "usesKvEngine", default)]
    pub uses_kv_engine: bool,
    #[serde(alias = "ownerUsesKvEngine", default)]
    pub owner_uses_kv_engine: bool,
    #[serde(alias = "vaultLinkedSecrets", default)]
    pub vault_linked_secrets: Vec<String>,

    // Registry coordinates
    #[serde(alias = "privateRegistry", default)]
    pub private_registry: String,
    #[serde(alias = "privateRegistryProvider", default)]
    pub private_registry_provider: String,
    #[serde(alias = "disablePush", default)]
    pub disable_push: bool,

    // Container execution
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub entrypoint: String,
    #[serde(alias = "dockerUser", default)]
    pub docker_user: String,
    #[serde(alias = "startCommand", default)]
    pub start_command: String,

    // Restart policy
    #[serde(alias = "restartMode", default)]
    pub restart_mode: String,
    #[serde(alias = "restartAttempts", default)]
    pub restart_attempts: FlexInt,

    // Update policy / raw job overrides, forwarded opaquely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<Value>,
    #[serde(alias = "jobConfig", default, skip_serializing_if = "Option::is_none")]
    pub job_config: Option<Value>,

    // Volumes
    #[serde(alias = "useCsiVolume", default)]
    pub use_csi_volume: bool,
    #[serde(alias = "volumeName", default)]
    pub volume_name: String,
    #[serde(alias = "volumeMountDestination", default)]
    pub volume_mount_destination: String,

    #[serde(alias = "configFiles", default)]
    pub config_files: Vec<String>,
    #[serde(default)]
    pub template: String,

    // Build selection
    #[serde(default)]
    pub builder: String,
    #[serde(default)]
    pub dockerfile: String,

    // Repository source
    #[serde(default)]
    pub repository: String,
    #[serde(default)]
    pub branch: String,
    #[serde(alias = "gitToken", alias = "token", default)]
    pub git_token: String,
    #[serde(default)]
    pub provider: String,
    #[serde(alias = "sourceType", default)]
    pub source_type: String,
    #[serde(alias = "sourceUrl", default)]
    pub source_url: String,
    #[serde(alias = "uploadId", default)]
    pub upload_id: String,

    // Pre-built image source
    #[serde(alias = "imageName", default)]
    pub image_name: String,
    #[serde(alias = "imageTag", default)]
    pub image_tag: String,

    // Control plane
    #[serde(alias = "backendUrl", default)]
    pub backend_url: String,
    #[serde(alias = "accessToken", default)]
    pub access_token: String,
}

impl DeployParams {
    /// True when the source is a signed-URL tarball rather than a git repo.
    pub fn is_local_upload(&self) -> bool {
        self.source_type == "local_upload"
    }
}

/// One job slated for teardown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DestroyTarget {
    #[serde(alias = "jobId", default)]
    pub job_id: FlexString,
    #[serde(alias = "serviceId", default)]
    pub service_id: FlexString,
    #[serde(alias = "platformAddress", default)]
    pub platform_address: String,
    #[serde(alias = "platformToken", default)]
    pub platform_token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DestroyParams {
    #[serde(default)]
    pub jobs: Vec<DestroyTarget>,
    #[serde(default)]
    pub reason: String,
}

/// Decoded task parameters, one shape per task family.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskParams {
    Deploy(Box<DeployParams>),
    Destroy(DestroyParams),
}

/// Decode the base64 JSON payload into the shape `kind` expects.
pub fn decode(kind: TaskKind, encoded: &str) -> Result<TaskParams, ParamsError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| ParamsError::Base64(e.to_string()))?;

    let raw: Value =
        serde_json::from_slice(&bytes).map_err(|e| ParamsError::Json(e.to_string()))?;

    match kind {
        TaskKind::DestroyJobPack => {
            let params: DestroyParams = serde_json::from_value(raw.clone())
                .map_err(|e| ParamsError::Json(e.to_string()))?;
            validate_destroy(&params, &raw)?;
            Ok(TaskParams::Destroy(params))
        }
        _ => {
            let params: DeployParams = serde_json::from_value(raw.clone())
                .map_err(|e| ParamsError::Json(e.to_string()))?;
            validate_deploy(kind, &params, &raw)?;
            Ok(TaskParams::Deploy(Box::new(params)))
        }
    }
}

fn validate_deploy(kind: TaskKind, params: &DeployParams, raw: &Value) -> Result<(), ParamsError> {
    let missing = |field: &str| ParamsError::MissingField {
        task: kind.as_str().to_string(),
        field: field.to_string(),
        summary: summarize(raw),
    };

    if params.job_id.is_empty() {
        return Err(missing("job_id"));
    }
    if params.deployment_id.is_empty() {
        return Err(missing("deployment_id"));
    }
    if params.service_id.is_empty() {
        return Err(missing("service_id"));
    }

    match kind {
        TaskKind::DeployImage => {
            if params.image_name.is_empty() {
                return Err(missing("image_name"));
            }
        }
        TaskKind::DeployRepository | TaskKind::RedeployRepository => {
            if params.is_local_upload() {
                if params.source_url.is_empty() {
                    return Err(missing("source_url"));
                }
            } else {
                if params.repository.is_empty() {
                    return Err(missing("repository"));
                }
                if params.branch.is_empty() {
                    return Err(missing("branch"));
                }
            }
        }
        TaskKind::DestroyJobPack => unreachable!("destroy parameters validated separately"),
    }

    Ok(())
}

fn validate_destroy(params: &DestroyParams, raw: &Value) -> Result<(), ParamsError> {
    let missing = |field: &str| ParamsError::MissingField {
        task: TaskKind::DestroyJobPack.as_str().to_string(),
        field: field.to_string(),
        summary: summarize(raw),
    };

    if params.jobs.is_empty() {
        return Err(missing("jobs"));
    }
    if params.reason.is_empty() {
        return Err(missing("reason"));
    }
    Ok(())
}

/// Compact, secret-free rendering of the received payload for diagnostics.
fn summarize(raw: &Value) -> String {
    let mut copy = raw.clone();
    scrub(&mut copy);
    serde_json::to_string(&copy).unwrap_or_else(|_| "<unrenderable>".to_string())
}

fn scrub(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, entry) in map.iter_mut() {
                let lowered = key.to_ascii_lowercase();
                if lowered.contains("token") || lowered.contains("password") {
                    *entry = Value::String("***".to_string());
                } else {
                    scrub(entry);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                scrub(item);
            }
        }
        _ => {}
    }
}
