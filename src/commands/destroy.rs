//! Job teardown flow. Each job in the pack is handed to the platform
//! plugin; a job-destroyed event is emitted per job whether or not its
//! teardown succeeded, so the control plane always learns the outcome.

use super::Dependencies;
use crate::domain::DestroyParams;
use crate::error::{DeployError, RunnerError};
use crate::infrastructure::events::{DeploymentIds, EventPublisher};
use crate::plugins::StageContext;
use crate::{redact, ui};
use tracing::{info, warn};

/// The platform capability that owns job teardown.
const PLATFORM_PLUGIN: &str = "nomad";

pub async fn run(deps: &Dependencies, params: DestroyParams) -> Result<(), RunnerError> {
    let publisher = EventPublisher::new(deps.bus.clone(), DeploymentIds::default());

    ui::print_phase("destroy");
    info!(
        "🗑️  Destroying {} job(s), reason: {}",
        params.jobs.len(),
        params.reason
    );

    let mut last_failure: Option<DeployError> = None;

    for target in &params.jobs {
        deps.ensure_active()?;

        let ctx = StageContext::new(target.job_id.as_str(), std::env::temp_dir())
            .with_cancel(deps.cancel.clone());

        let teardown = match deps.plugins.platform(PLATFORM_PLUGIN) {
            Ok(platform) => platform.destroy(&ctx, target).await,
            Err(e) => Err(e),
        };

        match teardown {
            Ok(()) => info!("✅ Destroyed job {}", target.job_id),
            Err(e) => {
                let message =
                    redact::redact_all(&e.to_string(), [target.platform_token.as_str()].as_slice());
                ui::print_phase_error("destroy", &message);
                warn!(job_id = %target.job_id, "Teardown failed: {}", message);
                last_failure = Some(DeployError::DestroyFailed {
                    job_id: target.job_id.to_string(),
                    message,
                });
            }
        }

        // The event goes out regardless so the control plane can reconcile.
        publisher
            .job_destroyed(
                target.job_id.as_str(),
                target.service_id.as_str(),
                &params.reason,
            )
            .await;
    }

    match last_failure {
        Some(failure) => Err(failure.into()),
        None => Ok(()),
    }
}
