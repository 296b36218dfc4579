//! Deployment lifecycle events and live log streaming to the message bus.
//!
//! The runner tolerates running without a bus: [`EventPublisher`] wraps an
//! optional sink and degrades to silent no-ops. A thin webhook publisher is
//! provided so the binary is complete; the production bus client satisfies
//! the same trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Identifiers common to every deployment event.
#[derive(Debug, Clone, Serialize, Default)]
pub struct DeploymentIds {
    pub job_id: String,
    pub deployment_id: String,
    pub service_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeploymentEvent {
    #[serde(flatten)]
    pub ids: DeploymentIds,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildLogEndEvent {
    pub deployment_id: String,
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobDestroyedEvent {
    pub job_id: String,
    pub service_id: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogLineEvent {
    pub deployment_id: String,
    pub phase: String,
    pub stream: String,
    pub line: String,
}

/// The bus operations the runner emits. The bus client owns ordering; the
/// runner never reorders events it has handed over.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish_deployment_started(&self, event: DeploymentEvent) -> anyhow::Result<()>;
    async fn publish_deployment_succeeded(&self, event: DeploymentEvent) -> anyhow::Result<()>;
    async fn publish_deployment_failed(&self, event: DeploymentEvent) -> anyhow::Result<()>;
    async fn publish_build_log_end(&self, event: BuildLogEndEvent) -> anyhow::Result<()>;
    async fn publish_job_destroyed(&self, event: JobDestroyedEvent) -> anyhow::Result<()>;
    async fn publish_log_line(&self, event: LogLineEvent) -> anyhow::Result<()>;
}

/// Optional-bus wrapper. Publish failures are logged and swallowed; a
/// missing bus is silent.
#[derive(Clone)]
pub struct EventPublisher {
    bus: Option<Arc<dyn EventBus>>,
    ids: DeploymentIds,
}

impl EventPublisher {
    pub fn new(bus: Option<Arc<dyn EventBus>>, ids: DeploymentIds) -> Self {
        Self { bus, ids }
    }

    pub fn disabled() -> Self {
        Self {
            bus: None,
            ids: DeploymentIds::default(),
        }
    }

    pub fn bus(&self) -> Option<Arc<dyn EventBus>> {
        self.bus.clone()
    }

    pub fn ids(&self) -> &DeploymentIds {
        &self.ids
    }

    fn event(&self, status: &str, error: Option<String>, duration_secs: Option<f64>) -> DeploymentEvent {
        DeploymentEvent {
            ids: self.ids.clone(),
            status: status.to_string(),
            error,
            duration_secs,
            timestamp: Utc::now(),
        }
    }

    pub async fn deployment_started(&self) {
        if let Some(bus) = &self.bus {
            if let Err(e) = bus
                .publish_deployment_started(self.event("started", None, None))
                .await
            {
                warn!(error = %e, "Failed to publish deployment-started event");
            }
        }
    }

    pub async fn deployment_succeeded(&self, duration_secs: f64) {
        if let Some(bus) = &self.bus {
            if let Err(e) = bus
                .publish_deployment_succeeded(self.event("succeeded", None, Some(duration_secs)))
                .await
            {
                warn!(error = %e, "Failed to publish deployment-succeeded event");
            }
        }
    }

    pub async fn deployment_failed(&self, error: &str) {
        if let Some(bus) = &self.bus {
            if let Err(e) = bus
                .publish_deployment_failed(self.event("failed", Some(error.to_string()), None))
                .await
            {
                warn!(error = %e, "Failed to publish deployment-failed event");
            }
        }
    }

    pub async fn build_log_end(&self, status: &str) {
        if let Some(bus) = &self.bus {
            let event = BuildLogEndEvent {
                deployment_id: self.ids.deployment_id.clone(),
                status: status.to_string(),
                timestamp: Utc::now(),
            };
            if let Err(e) = bus.publish_build_log_end(event).await {
                warn!(error = %e, "Failed to publish build-log-end event");
            }
        }
    }

    pub async fn job_destroyed(&self, job_id: &str, service_id: &str, reason: &str) {
        if let Some(bus) = &self.bus {
            let event = JobDestroyedEvent {
                job_id: job_id.to_string(),
                service_id: service_id.to_string(),
                reason: reason.to_string(),
                timestamp: Utc::now(),
            };
            if let Err(e) = bus.publish_job_destroyed(event).await {
                warn!(error = %e, "Failed to publish job-destroyed event");
            } else {
                debug!(job_id = %job_id, "Published job-destroyed event");
            }
        }
    }
}

/// Webhook-style bus publisher, enabled by `EVENT_BUS_URL`.
pub struct WebhookEventBus {
    client: Client,
    base_url: String,
}

impl WebhookEventBus {
    pub fn from_env() -> Option<Arc<dyn EventBus>> {
        let base_url = std::env::var("EVENT_BUS_URL").ok()?;
        if base_url.is_empty() {
            return None;
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .ok()?;

        Some(Arc::new(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }))
    }

    async fn post<B: Serialize>(&self, topic: &str, body: &B) -> anyhow::Result<()> {
        let url = format!("{}/events/{}", self.base_url, topic);
        let response = self.client.post(&url).json(body).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("bus returned status {}", response.status());
        }
        Ok(())
    }
}

#[async_trait]
impl EventBus for WebhookEventBus {
    async fn publish_deployment_started(&self, event: DeploymentEvent) -> anyhow::Result<()> {
        self.post("deployment.started", &event).await
    }

    async fn publish_deployment_succeeded(&self, event: DeploymentEvent) -> anyhow::Result<()> {
        self.post("deployment.succeeded", &event).await
    }

    async fn publish_deployment_failed(&self, event: DeploymentEvent) -> anyhow::Result<()> {
        self.post("deployment.failed", &event).await
    }

    async fn publish_build_log_end(&self, event: BuildLogEndEvent) -> anyhow::Result<()> {
        self.post("build-log.end", &event).await
    }

    async fn publish_job_destroyed(&self, event: JobDestroyedEvent) -> anyhow::Result<()> {
        self.post("job.destroyed", &event).await
    }

    async fn publish_log_line(&self, event: LogLineEvent) -> anyhow::Result<()> {
        self.post("build-log.line", &event).await
    }
}

#[cfg(test)]
pub mod testing {
    //! In-memory bus recording every published event, in order.

    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct RecordingBus {
        pub published: Mutex<Vec<String>>,
    }

    impl RecordingBus {
        pub fn topics(&self) -> Vec<String> {
            self.published.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventBus for RecordingBus {
        async fn publish_deployment_started(&self, _: DeploymentEvent) -> anyhow::Result<()> {
            self.published.lock().unwrap().push("deployment.started".into());
            Ok(())
        }

        async fn publish_deployment_succeeded(&self, _: DeploymentEvent) -> anyhow::Result<()> {
            self.published
                .lock()
                .unwrap()
                .push("deployment.succeeded".into());
            Ok(())
        }

        async fn publish_deployment_failed(&self, event: DeploymentEvent) -> anyhow::Result<()> {
            self.published
                .lock()
                .unwrap()
                .push(format!("deployment.failed:{}", event.error.unwrap_or_default()));
            Ok(())
        }

        async fn publish_build_log_end(&self, event: BuildLogEndEvent) -> anyhow::Result<()> {
            self.published
                .lock()
                .unwrap()
                .push(format!("build-log.end:{}", event.status));
            Ok(())
        }

        async fn publish_job_destroyed(&self, event: JobDestroyedEvent) -> anyhow::Result<()> {
            self.published
                .lock()
                .unwrap()
                .push(format!("job.destroyed:{}", event.job_id));
            Ok(())
        }

        async fn publish_log_line(&self, event: LogLineEvent) -> anyhow::Result<()> {
            self.published
                .lock()
                .unwrap()
                .push(format!("log:{}:{}", event.phase, event.line));
            Ok(())
        }
    }
}
