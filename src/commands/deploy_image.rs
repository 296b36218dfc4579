//! Pre-built image deployment flow. No source fetch and no build: the
//! builder is pinned to `noop`, and a port-detection stage replaces the
//! clone. Detected ports feed the same reconciliation and descriptor
//! machinery as repository deployments.

use super::Dependencies;
use crate::config;
use crate::descriptor::{DescriptorContext, CONFIG_FILE_NAME};
use crate::domain::{Artifact, DeployParams};
use crate::error::RunnerError;
use crate::infrastructure::backend::{BackendReporter, Step, StepStatus};
use crate::infrastructure::events::{DeploymentIds, EventPublisher};
use crate::infrastructure::logs::LogMultiplexer;
use crate::plugins::StageContext;
use crate::services::lifecycle::LifecycleExecutor;
use crate::services::reconcile::Reconciler;
use crate::workdir::WorkDir;
use crate::{redact, ui};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

const DEPLOYMENT_TYPE: &str = "deploy-image";
const FALLBACK_PORT: u16 = 3000;

pub async fn run(deps: &Dependencies, params: DeployParams) -> Result<(), RunnerError> {
    let ids = DeploymentIds {
        job_id: params.job_id.to_string(),
        deployment_id: params.deployment_id.to_string(),
        service_id: params.service_id.to_string(),
    };
    let publisher = EventPublisher::new(deps.bus.clone(), ids);
    let logs = Arc::new(LogMultiplexer::new(
        deps.bus.clone(),
        params.deployment_id.as_str(),
    ));
    let reporter = deps.reporter(&params.backend_url, &params.access_token);
    let started = Instant::now();

    publisher.deployment_started().await;

    let result = drive(deps, &params, &reporter, &logs).await;

    match &result {
        Ok(()) => {
            ui::print_success(&format!(
                "Deployment {} completed in {:.1}s",
                params.deployment_id,
                started.elapsed().as_secs_f64()
            ));
            publisher
                .deployment_succeeded(started.elapsed().as_secs_f64())
                .await;
            publisher.build_log_end("succeeded").await;
        }
        Err(e) => {
            let message = redact::redact_all(&e.to_string(), [params.access_token.as_str()].as_slice());
            publisher.deployment_failed(&message).await;
            publisher.build_log_end("failed").await;
        }
    }

    logs.shutdown().await;
    result
}

async fn drive(
    deps: &Dependencies,
    params: &DeployParams,
    reporter: &BackendReporter,
    logs: &Arc<LogMultiplexer>,
) -> Result<(), RunnerError> {
    let mut workdir = WorkDir::create(params.job_id.as_str())?;
    let result = stages(deps, params, reporter, logs, workdir.path()).await;
    if result.is_err() {
        workdir.preserve();
    }
    result
}

async fn stages(
    deps: &Dependencies,
    params: &DeployParams,
    reporter: &BackendReporter,
    logs: &Arc<LogMultiplexer>,
    work_dir: &Path,
) -> Result<(), RunnerError> {
    let job_id = params.job_id.as_str();
    let deployment_id = params.deployment_id.as_str();

    let tag = if params.image_tag.is_empty() {
        "latest"
    } else {
        &params.image_tag
    };
    let image_reference = format!("{}:{}", params.image_name, tag);

    let ctx = StageContext::new(job_id, work_dir)
        .with_cancel(deps.cancel.clone())
        .with_logs(logs.clone());

    // -- port detection (in place of source fetch) ---------------------
    ui::print_phase("ports");
    logs.set_phase("ports");
    deps.ensure_active()?;

    let exposed_ports = match &deps.port_detector {
        Some(detector) => match detector.detect(&ctx, &image_reference).await {
            Ok(ports) => {
                info!("🔎 Detected exposed ports: {:?}", ports);
                ports
            }
            Err(e) => {
                warn!(error = %e, "Port detection failed; defaulting to {}", FALLBACK_PORT);
                vec![FALLBACK_PORT]
            }
        },
        None => vec![FALLBACK_PORT],
    };

    // -- reconcile and synthesize the descriptor -----------------------
    deps.ensure_active()?;
    let mut final_params = params.clone();
    let reconciler = Reconciler::new(reporter.clone(), params.cluster_domain.clone());
    reconciler
        .reconcile(
            &mut final_params.networks,
            &exposed_ports,
            params.service_id.as_str(),
        )
        .await;
    reconciler
        .sync_service(params.service_id.as_str(), &final_params.networks)
        .await;

    let mut artifact = Artifact::new(params.image_name.clone(), tag);
    artifact.exposed_ports = exposed_ports;

    let descriptor =
        DescriptorContext::new(&final_params, "noop").with_artifact(&artifact);
    descriptor.write_files(work_dir)?;

    let env = config::ProcessEnv;
    let parsed = config::parse_file(&work_dir.join(CONFIG_FILE_NAME), &env)?;
    let app = parsed.application(job_id).cloned().ok_or_else(|| {
        RunnerError::Runtime(anyhow::anyhow!(
            "application '{}' missing from generated config",
            job_id
        ))
    })?;

    let executor = LifecycleExecutor::new(deps.plugins.clone());

    // -- deploy --------------------------------------------------------
    ui::print_phase("deploy");
    logs.set_phase("deploy");
    deps.ensure_active()?;
    reporter
        .report_step(deployment_id, DEPLOYMENT_TYPE, Step::Deploy, StepStatus::InProgress, None)
        .await;

    let deployed = tokio::select! {
        result = executor.execute_deploy(&ctx, &app, &artifact) => {
            result.map_err(RunnerError::from)
        }
        _ = deps.cancel.cancelled() => Err(deps.cancelled_error()),
    };

    let deployment = match deployed {
        Ok(deployment) => deployment,
        Err(e) => {
            let message = redact::redact_all(&e.to_string(), [params.access_token.as_str()].as_slice());
            ui::print_phase_error("deploy", &message);
            reporter
                .report_step(
                    deployment_id,
                    DEPLOYMENT_TYPE,
                    Step::Deploy,
                    StepStatus::Failed,
                    Some(&message),
                )
                .await;
            return Err(e);
        }
    };
    reporter
        .report_step(deployment_id, DEPLOYMENT_TYPE, Step::Deploy, StepStatus::Completed, None)
        .await;

    // -- release -------------------------------------------------------
    if app.release.is_some() {
        ui::print_phase("release");
        logs.set_phase("release");
        deps.ensure_active()?;
        reporter
            .report_step(
                deployment_id,
                DEPLOYMENT_TYPE,
                Step::Release,
                StepStatus::InProgress,
                None,
            )
            .await;

        let released = tokio::select! {
            result = executor.execute_release(&ctx, &app, &deployment) => {
                result.map_err(RunnerError::from)
            }
            _ = deps.cancel.cancelled() => Err(deps.cancelled_error()),
        };

        if let Err(e) = released {
            let message = redact::redact_all(&e.to_string(), [params.access_token.as_str()].as_slice());
            ui::print_phase_error("release", &message);
            reporter
                .report_step(
                    deployment_id,
                    DEPLOYMENT_TYPE,
                    Step::Release,
                    StepStatus::Failed,
                    Some(&message),
                )
                .await;
            return Err(e);
        }
        reporter
            .report_step(
                deployment_id,
                DEPLOYMENT_TYPE,
                Step::Release,
                StepStatus::Completed,
                None,
            )
            .await;
    }

    Ok(())
}
