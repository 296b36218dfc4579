//! Repository deployment flow: fetch the sources, build with fallback,
//! reconcile networking, synthesize the descriptor, then drive the
//! registry, deploy, and release stages from the parsed-back config.
//!
//! Every stage failure aborts the flow; the failure event is always
//! emitted and the work directory is preserved for post-mortem.

use crate::config;
use crate::descriptor::{DescriptorContext, CONFIG_FILE_NAME};
use crate::domain::{DeployParams, TaskKind};
use crate::error::RunnerError;
use crate::infrastructure::archive;
use crate::infrastructure::backend::{BackendReporter, Step, StepStatus};
use crate::infrastructure::events::{DeploymentIds, EventPublisher};
use crate::infrastructure::git::GitClient;
use crate::infrastructure::logs::LogMultiplexer;
use crate::plugins::StageContext;
use crate::services::fallback::{self, BuildOutcome};
use crate::services::lifecycle::LifecycleExecutor;
use crate::services::reconcile::Reconciler;
use crate::services::detect;
use crate::workdir::WorkDir;
use crate::{redact, ui};
use super::Dependencies;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

pub async fn run(
    deps: &Dependencies,
    params: DeployParams,
    kind: TaskKind,
) -> Result<(), RunnerError> {
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

    let result = drive(deps, &params, kind, &reporter, &logs).await;

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
            let message = redacted(e, &params);
            publisher.deployment_failed(&message).await;
            publisher.build_log_end("failed").await;
        }
    }

    logs.shutdown().await;
    result
}

fn redacted(error: &RunnerError, params: &DeployParams) -> String {
    redact::redact_all(
        &error.to_string(),
        &[params.access_token.as_str(), params.git_token.as_str()],
    )
}

async fn drive(
    deps: &Dependencies,
    params: &DeployParams,
    kind: TaskKind,
    reporter: &BackendReporter,
    logs: &Arc<LogMultiplexer>,
) -> Result<(), RunnerError> {
    let mut workdir = WorkDir::create(params.job_id.as_str())?;
    let result = stages(deps, params, kind, reporter, logs, workdir.path()).await;
    if result.is_err() {
        workdir.preserve();
    }
    result
}

async fn stages(
    deps: &Dependencies,
    params: &DeployParams,
    kind: TaskKind,
    reporter: &BackendReporter,
    logs: &Arc<LogMultiplexer>,
    work_dir: &Path,
) -> Result<(), RunnerError> {
    let job_id = params.job_id.as_str();
    let deployment_id = params.deployment_id.as_str();
    let deployment_type = kind.as_str();

    // -- clone --------------------------------------------------------
    ui::print_phase("clone");
    logs.set_phase("clone");
    deps.ensure_active()?;
    reporter
        .report_step(deployment_id, deployment_type, Step::Clone, StepStatus::InProgress, None)
        .await;

    let fetched = if params.is_local_upload() {
        archive::fetch_and_extract(&deps.http, &params.source_url, work_dir, &deps.cancel)
            .await
            .map_err(RunnerError::from)
    } else {
        GitClient::new()
            .clone_repository(
                &params.repository,
                &params.branch,
                &params.git_token,
                &params.provider,
                work_dir,
                &deps.cancel,
            )
            .await
            .map_err(RunnerError::from)
    };

    if let Err(e) = fetched {
        let e = if deps.cancel.is_cancelled() {
            deps.cancelled_error()
        } else {
            e
        };
        let message = redacted(&e, params);
        ui::print_phase_error("clone", &message);
        reporter
            .report_step(
                deployment_id,
                deployment_type,
                Step::Clone,
                StepStatus::Failed,
                Some(&message),
            )
            .await;
        return Err(e);
    }
    reporter
        .report_step(deployment_id, deployment_type, Step::Clone, StepStatus::Completed, None)
        .await;

    // -- build with fallback ------------------------------------------
    let chain = detect::builder_chain(work_dir, &params.builder);
    info!("🔗 Builder chain: {}", chain.join(", "));

    // The flow owns the process working directory for the rest of the job.
    let previous_dir = std::env::current_dir().ok();
    std::env::set_current_dir(work_dir)
        .map_err(|e| RunnerError::Runtime(anyhow::anyhow!("entering work directory: {}", e)))?;
    let _restore = scopeguard::guard(previous_dir, |dir| {
        if let Some(dir) = dir {
            let _ = std::env::set_current_dir(dir);
        }
    });

    ui::print_phase("build");
    logs.set_phase("build");
    reporter
        .report_step(deployment_id, deployment_type, Step::Build, StepStatus::InProgress, None)
        .await;

    let executor = LifecycleExecutor::new(deps.plugins.clone());
    let ctx = StageContext::new(job_id, work_dir)
        .with_cancel(deps.cancel.clone())
        .with_logs(logs.clone());
    let env = config::ProcessEnv;

    let prepare = |builder: &str| -> Result<config::Application, RunnerError> {
        let descriptor = DescriptorContext::new(params, builder);
        descriptor.write_files(work_dir)?;
        let parsed = config::parse_file(&work_dir.join(CONFIG_FILE_NAME), &env)?;
        parsed.application(job_id).cloned().ok_or_else(|| {
            RunnerError::Runtime(anyhow::anyhow!(
                "application '{}' missing from generated config",
                job_id
            ))
        })
    };

    let outcome = tokio::select! {
        result = fallback::build_with_fallback(&executor, &ctx, &chain, prepare) => {
            result.map_err(RunnerError::from)
        }
        _ = deps.cancel.cancelled() => Err(deps.cancelled_error()),
    };

    let outcome: BuildOutcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            let message = redacted(&e, params);
            ui::print_phase_error("build", &message);
            reporter
                .report_step(
                    deployment_id,
                    deployment_type,
                    Step::Build,
                    StepStatus::Failed,
                    Some(&message),
                )
                .await;
            return Err(e);
        }
    };
    reporter
        .report_step(deployment_id, deployment_type, Step::Build, StepStatus::Completed, None)
        .await;

    // -- reconcile networking and refresh the descriptor --------------
    deps.ensure_active()?;
    let mut final_params = params.clone();
    let reconciler = Reconciler::new(reporter.clone(), params.cluster_domain.clone());
    reconciler
        .reconcile(
            &mut final_params.networks,
            &outcome.artifact.exposed_ports,
            params.service_id.as_str(),
        )
        .await;
    reconciler
        .sync_service(params.service_id.as_str(), &final_params.networks)
        .await;

    let descriptor = DescriptorContext::new(&final_params, &outcome.builder)
        .with_artifact(&outcome.artifact);
    descriptor.write_files(work_dir)?;

    let parsed = config::parse_file(&work_dir.join(CONFIG_FILE_NAME), &env)?;
    let app = parsed.application(job_id).cloned().ok_or_else(|| {
        RunnerError::Runtime(anyhow::anyhow!(
            "application '{}' missing from generated config",
            job_id
        ))
    })?;

    // -- registry ------------------------------------------------------
    if app.registry.is_some() {
        ui::print_phase("registry");
        logs.set_phase("registry");
        deps.ensure_active()?;
        reporter
            .report_step(
                deployment_id,
                deployment_type,
                Step::Registry,
                StepStatus::InProgress,
                None,
            )
            .await;

        let pushed = tokio::select! {
            result = executor.execute_registry(&ctx, &app, &outcome.artifact) => {
                result.map_err(RunnerError::from)
            }
            _ = deps.cancel.cancelled() => Err(deps.cancelled_error()),
        };

        if let Err(e) = pushed {
            let message = redacted(&e, params);
            ui::print_phase_error("registry", &message);
            reporter
                .report_step(
                    deployment_id,
                    deployment_type,
                    Step::Registry,
                    StepStatus::Failed,
                    Some(&message),
                )
                .await;
            return Err(e);
        }
        reporter
            .report_step(
                deployment_id,
                deployment_type,
                Step::Registry,
                StepStatus::Completed,
                None,
            )
            .await;
    }

    // -- deploy --------------------------------------------------------
    ui::print_phase("deploy");
    logs.set_phase("deploy");
    deps.ensure_active()?;
    reporter
        .report_step(deployment_id, deployment_type, Step::Deploy, StepStatus::InProgress, None)
        .await;

    let deployed = tokio::select! {
        result = executor.execute_deploy(&ctx, &app, &outcome.artifact) => {
            result.map_err(RunnerError::from)
        }
        _ = deps.cancel.cancelled() => Err(deps.cancelled_error()),
    };

    let deployment = match deployed {
        Ok(deployment) => deployment,
        Err(e) => {
            let message = redacted(&e, params);
            ui::print_phase_error("deploy", &message);
            reporter
                .report_step(
                    deployment_id,
                    deployment_type,
                    Step::Deploy,
                    StepStatus::Failed,
                    Some(&message),
                )
                .await;
            return Err(e);
        }
    };
    reporter
        .report_step(deployment_id, deployment_type, Step::Deploy, StepStatus::Completed, None)
        .await;

    // -- release -------------------------------------------------------
    if app.release.is_some() {
        ui::print_phase("release");
        logs.set_phase("release");
        deps.ensure_active()?;
        reporter
            .report_step(
                deployment_id,
                deployment_type,
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
            let message = redacted(&e, params);
            ui::print_phase_error("release", &message);
            reporter
                .report_step(
                    deployment_id,
                    deployment_type,
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
                deployment_type,
                Step::Release,
                StepStatus::Completed,
                None,
            )
            .await;
    }

    Ok(())
}
