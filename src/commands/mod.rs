//! Task dispatch.
//!
//! The scheduler invokes the runner with a task type in `NOMAD_META_TASK`
//! and base64-encoded JSON parameters in `NOMAD_META_PARAMS`. The dispatcher
//! decodes and validates both, injects control-plane coordinates from the
//! environment where the payload left them out, and routes to the task
//! handler. Exit codes encode the failure class.

pub mod deploy_image;
pub mod deploy_repository;
pub mod destroy;

use crate::domain::{params, TaskKind, TaskParams};
use crate::error::{ParamsError, RunnerError};
use crate::infrastructure::backend::{BackendClient, BackendReporter};
use crate::infrastructure::events::EventBus;
use crate::plugins::{PluginRegistry, PortDetector};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub const TASK_ENV: &str = "NOMAD_META_TASK";
pub const PARAMS_ENV: &str = "NOMAD_META_PARAMS";
pub const BACKEND_URL_ENV: &str = "BACKEND_URL";
pub const ACCESS_TOKEN_ENV: &str = "ACCESS_TOKEN";
pub const TIMEOUT_ENV: &str = "TASK_TIMEOUT_SECONDS";

/// Everything the handlers need from the process, bundled so tests can
/// substitute fakes.
pub struct Dependencies {
    pub plugins: Arc<PluginRegistry>,
    pub bus: Option<Arc<dyn EventBus>>,
    pub port_detector: Option<Arc<dyn PortDetector>>,
    pub http: reqwest::Client,
    pub cancel: CancellationToken,
    pub deadline_fired: Arc<AtomicBool>,
}

impl Dependencies {
    pub fn new(plugins: Arc<PluginRegistry>) -> Self {
        Self {
            plugins,
            bus: None,
            port_detector: None,
            http: reqwest::Client::new(),
            cancel: CancellationToken::new(),
            deadline_fired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Arm the deadline from `TASK_TIMEOUT_SECONDS`, when set.
    pub fn arm_deadline(&self) {
        let Some(seconds) = std::env::var(TIMEOUT_ENV)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&v| v > 0)
        else {
            return;
        };

        let cancel = self.cancel.clone();
        let fired = self.deadline_fired.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(seconds)).await;
            fired.store(true, Ordering::SeqCst);
            cancel.cancel();
        });
    }

    pub fn cancelled_error(&self) -> RunnerError {
        if self.deadline_fired.load(Ordering::SeqCst) {
            RunnerError::cancelled("task deadline exceeded", true)
        } else {
            RunnerError::cancelled("cancelled by signal", false)
        }
    }

    /// Stage-boundary cancellation check.
    pub fn ensure_active(&self) -> Result<(), RunnerError> {
        if self.cancel.is_cancelled() {
            Err(self.cancelled_error())
        } else {
            Ok(())
        }
    }

    /// Best-effort control-plane reporter for the given coordinates.
    pub fn reporter(&self, backend_url: &str, access_token: &str) -> BackendReporter {
        match BackendClient::new(backend_url, access_token) {
            Some(client) => BackendReporter::new(Some(Arc::new(client))),
            None => BackendReporter::disabled(),
        }
    }
}

/// Entry point for scheduler invocations: read the environment, decode,
/// route.
pub async fn dispatch(deps: &Dependencies) -> Result<(), RunnerError> {
    let task = std::env::var(TASK_ENV).unwrap_or_default();
    let encoded = std::env::var(PARAMS_ENV).unwrap_or_default();
    dispatch_with(deps, &task, &encoded).await
}

/// Dispatch with explicit inputs. Control-plane URL and access token are
/// injected from the environment when the payload lacks them.
pub async fn dispatch_with(
    deps: &Dependencies,
    task: &str,
    encoded_params: &str,
) -> Result<(), RunnerError> {
    let kind = TaskKind::parse(task)?;
    info!("🧭 Dispatching task {}", kind.as_str());

    let decoded = params::decode(kind, encoded_params)?;

    match decoded {
        TaskParams::Deploy(mut deploy) => {
            if deploy.backend_url.is_empty() {
                deploy.backend_url = std::env::var(BACKEND_URL_ENV).unwrap_or_default();
            }
            if deploy.access_token.is_empty() {
                deploy.access_token = std::env::var(ACCESS_TOKEN_ENV).unwrap_or_default();
            }

            match kind {
                TaskKind::DeployRepository | TaskKind::RedeployRepository => {
                    deploy_repository::run(deps, *deploy, kind).await
                }
                TaskKind::DeployImage => deploy_image::run(deps, *deploy).await,
                TaskKind::DestroyJobPack => unreachable!("destroy decodes to DestroyParams"),
            }
        }
        TaskParams::Destroy(destroy_params) => destroy::run(deps, destroy_params).await,
    }
}

/// Missing task env is an unknown-task validation failure, kept separate so
/// `main` can surface the env name.
pub fn task_error_for_missing_env() -> RunnerError {
    ParamsError::UnknownTask {
        task: format!("<{} unset>", TASK_ENV),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_task_is_a_validation_error() {
        let deps = Dependencies::new(Arc::new(PluginRegistry::new()));
        let err = dispatch_with(&deps, "deploy-function", "e30=").await.unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[tokio::test]
    async fn test_undecodable_params_exit_code() {
        let deps = Dependencies::new(Arc::new(PluginRegistry::new()));
        let err = dispatch_with(&deps, "deploy-image", "!!!").await.unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_missing_mandatory_field_exit_code() {
        let deps = Dependencies::new(Arc::new(PluginRegistry::new()));
        // {} decodes but carries none of the mandatory identifiers.
        let err = dispatch_with(&deps, "deploy-image", "e30=").await.unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_cancelled_error_reflects_deadline() {
        let deps = Dependencies::new(Arc::new(PluginRegistry::new()));
        deps.cancel.cancel();
        assert!(matches!(
            deps.cancelled_error(),
            RunnerError::Cancelled { deadline: false, .. }
        ));

        deps.deadline_fired.store(true, Ordering::SeqCst);
        let err = deps.cancelled_error();
        assert!(matches!(err, RunnerError::Cancelled { deadline: true, .. }));
        assert_eq!(err.exit_code(), 4);
    }
}
