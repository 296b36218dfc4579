//! Control-plane client
//!
//! The backend owns deployment step tracking, subdomain allocation, and the
//! service record the UI renders. Everything here is best-effort from the
//! pipeline's point of view: the [`BackendReporter`] wrapper logs failures
//! at warn level and carries on.
//!
//! ## Configuration
//!
//! The base URL and access token normally arrive in the task parameters;
//! `BACKEND_URL` / `ACCESS_TOKEN` environment variables fill the gaps.

use crate::domain::NetworkPort;
use crate::error::BackendError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Deployment lifecycle steps the backend tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Clone,
    Build,
    Registry,
    Deploy,
    Release,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Step::Clone => "clone",
            Step::Build => "build",
            Step::Registry => "registry",
            Step::Deploy => "deploy",
            Step::Release => "release",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    InProgress,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::InProgress => "in_progress",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
        }
    }
}

/// Service record pushed after network reconciliation so the UI reflects
/// actual ports and domains.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateServiceRequest {
    pub service_id: String,
    pub networks: Vec<NetworkPort>,
}

#[derive(Debug, Clone, Serialize)]
struct UpdateStepRequest<'a> {
    deployment_id: &'a str,
    deployment_type: &'a str,
    step: &'a str,
    status: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

#[derive(Debug, Clone, Deserialize)]
struct AskDomainResponse {
    subdomain: String,
}

/// The control-plane operations the pipeline consumes. Object-safe so tests
/// can substitute recording fakes.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Ask the backend to allocate a subdomain for a service. Idempotent per
    /// call; the backend owns uniqueness.
    async fn ask_domain(&self, service_id: &str) -> Result<String, BackendError>;

    async fn update_service(&self, request: UpdateServiceRequest) -> Result<(), BackendError>;

    async fn update_deployment_step(
        &self,
        deployment_id: &str,
        deployment_type: &str,
        step: Step,
        status: StepStatus,
        error: Option<&str>,
    ) -> Result<(), BackendError>;
}

/// Concrete HTTP client for the control plane.
pub struct BackendClient {
    client: Client,
    base_url: String,
    access_token: String,
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>, access_token: impl Into<String>) -> Option<Self> {
        let base_url = base_url.into();
        if base_url.is_empty() {
            return None;
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .ok()?;

        Some(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.into(),
        })
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<reqwest::Response, BackendError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(body)
            .send()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status { status, body });
        }
        Ok(response)
    }
}

#[async_trait]
impl ControlPlane for BackendClient {
    async fn ask_domain(&self, service_id: &str) -> Result<String, BackendError> {
        let response = self
            .post(
                "/api/domains/allocate",
                &serde_json::json!({ "service_id": service_id }),
            )
            .await?;

        let allocated: AskDomainResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;
        Ok(allocated.subdomain)
    }

    async fn update_service(&self, request: UpdateServiceRequest) -> Result<(), BackendError> {
        self.post("/api/services/update", &request).await?;
        Ok(())
    }

    async fn update_deployment_step(
        &self,
        deployment_id: &str,
        deployment_type: &str,
        step: Step,
        status: StepStatus,
        error: Option<&str>,
    ) -> Result<(), BackendError> {
        let request = UpdateStepRequest {
            deployment_id,
            deployment_type,
            step: step.as_str(),
            status: status.as_str(),
            error,
        };
        self.post("/api/deployments/step", &request).await?;
        Ok(())
    }
}

/// Best-effort wrapper around the control plane.
///
/// When no backend is configured, every operation is a no-op; when a call
/// fails, the failure is logged and swallowed.
#[derive(Clone)]
pub struct BackendReporter {
    plane: Option<Arc<dyn ControlPlane>>,
}

impl BackendReporter {
    pub fn new(plane: Option<Arc<dyn ControlPlane>>) -> Self {
        Self { plane }
    }

    pub fn disabled() -> Self {
        Self { plane: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.plane.is_some()
    }

    /// Domain allocation is the one call whose result the pipeline consumes,
    /// so the error propagates to the caller for per-port handling.
    pub async fn ask_domain(&self, service_id: &str) -> Option<String> {
        let plane = self.plane.as_ref()?;
        match plane.ask_domain(service_id).await {
            Ok(subdomain) => Some(subdomain),
            Err(e) => {
                warn!(service_id = %service_id, error = %e, "Domain allocation failed");
                None
            }
        }
    }

    pub async fn update_service(&self, request: UpdateServiceRequest) {
        if let Some(plane) = &self.plane {
            if let Err(e) = plane.update_service(request).await {
                warn!(error = %e, "Failed to sync service record");
            } else {
                debug!("Synced service record");
            }
        }
    }

    pub async fn report_step(
        &self,
        deployment_id: &str,
        deployment_type: &str,
        step: Step,
        status: StepStatus,
        error: Option<&str>,
    ) {
        if let Some(plane) = &self.plane {
            if let Err(e) = plane
                .update_deployment_step(deployment_id, deployment_type, step, status, error)
                .await
            {
                warn!(
                    step = step.as_str(),
                    status = status.as_str(),
                    error = %e,
                    "Failed to report deployment step"
                );
            } else {
                debug!(
                    step = step.as_str(),
                    status = status.as_str(),
                    "Reported deployment step"
                );
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reporter_without_backend_is_disabled() {
        let reporter = BackendReporter::disabled();
        assert!(!reporter.is_enabled());
    }

    #[tokio::test]
    async fn test_disabled_reporter_is_a_noop() {
        let reporter = BackendReporter::disabled();
        assert_eq!(reporter.ask_domain("svc-1").await, None);
        reporter
            .report_step("d-1", "deploy-repository", Step::Clone, StepStatus::InProgress, None)
            .await;
    }

    #[tokio::test]
    async fn test_failed_allocation_degrades_to_none() {
        let plane = testing::RecordingPlane {
            fail_ask: true,
            ..Default::default()
        };
        let reporter = BackendReporter::new(Some(Arc::new(plane)));
        assert_eq!(reporter.ask_domain("svc-1").await, None);
    }

    #[test]
    fn test_empty_base_url_yields_no_client() {
        assert!(BackendClient::new("", "token").is_none());
    }

    #[test]
    fn test_step_names_match_contract() {
        assert_eq!(Step::Clone.as_str(), "clone");
        assert_eq!(Step::Build.as_str(), "build");
        assert_eq!(Step::Registry.as_str(), "registry");
        assert_eq!(Step::Deploy.as_str(), "deploy");
        assert_eq!(Step::Release.as_str(), "release");
        assert_eq!(StepStatus::InProgress.as_str(), "in_progress");
    }
}
