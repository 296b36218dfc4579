//! Builder fallback driver.
//!
//! Attempts each builder in the chain, strictly in order (builders may share
//! filesystem state, so there is no parallelism). The descriptor is
//! regenerated per attempt because some stages depend on builder identity.
//! The first artifact wins; if every attempt fails the composite error names
//! the attempt count and the last underlying failure.

use super::lifecycle::LifecycleExecutor;
use crate::config::Application;
use crate::domain::Artifact;
use crate::error::{BuildError, RunnerError};
use crate::plugins::StageContext;
use tracing::{info, warn};

/// The winning artifact and the builder that produced it.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub artifact: Artifact,
    pub builder: String,
}

/// Run the fallback loop. `prepare` regenerates the descriptor for the given
/// builder and returns the application to build.
pub async fn build_with_fallback<F>(
    executor: &LifecycleExecutor,
    ctx: &StageContext,
    chain: &[String],
    mut prepare: F,
) -> Result<BuildOutcome, BuildError>
where
    F: FnMut(&str) -> Result<Application, RunnerError>,
{
    let total = chain.len();
    let mut last_error = String::new();

    for (index, builder) in chain.iter().enumerate() {
        let attempt = index + 1;

        let app = match prepare(builder) {
            Ok(app) => app,
            Err(e) => {
                warn!("[Attempt {}/{}] {} failed: {}", attempt, total, builder, e);
                last_error = e.to_string();
                continue;
            }
        };

        match executor.execute_build(ctx, &app).await {
            Ok(artifact) => {
                info!(
                    "🏗️  Builder {} succeeded on attempt {}/{}",
                    builder, attempt, total
                );
                return Ok(BuildOutcome {
                    artifact,
                    builder: builder.clone(),
                });
            }
            Err(e) => {
                warn!("[Attempt {}/{}] {} failed: {}", attempt, total, builder, e);
                last_error = e.to_string();
            }
        }
    }

    Err(BuildError::AllBuildersFailed {
        attempts: total,
        last: last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PluginBlock;
    use crate::plugins::testing::FlakyBuilder;
    use crate::plugins::{PluginConfig, PluginRegistry};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    fn app_for(builder: &str) -> Application {
        Application {
            name: "web".to_string(),
            path: None,
            labels: Default::default(),
            build: PluginBlock {
                use_name: builder.to_string(),
                config: PluginConfig::new(),
            },
            registry: None,
            deploy: PluginBlock {
                use_name: "nomad-pack".to_string(),
                config: PluginConfig::new(),
            },
            release: None,
            url: None,
            config: PluginConfig::new(),
        }
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let mut registry = PluginRegistry::new();
        let railpack = Arc::new(FlakyBuilder::succeeding_with_ports(vec![3000]));
        let nixpacks = Arc::new(FlakyBuilder::succeeding_with_ports(vec![8080]));
        registry.register_builder("railpack", railpack.clone());
        registry.register_builder("nixpacks", nixpacks.clone());
        let executor = LifecycleExecutor::new(Arc::new(registry));

        let dir = tempfile::tempdir().unwrap();
        let ctx = StageContext::new("job-1", dir.path());
        let chain = vec!["railpack".to_string(), "nixpacks".to_string()];

        let outcome = build_with_fallback(&executor, &ctx, &chain, |b| Ok(app_for(b)))
            .await
            .unwrap();

        assert_eq!(outcome.builder, "railpack");
        assert_eq!(outcome.artifact.exposed_ports, vec![3000]);
        // The second builder is never consulted.
        assert_eq!(nixpacks.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_falls_back_to_next_builder() {
        let mut registry = PluginRegistry::new();
        registry.register_builder("railpack", Arc::new(FlakyBuilder::failing(99)));
        registry.register_builder(
            "nixpacks",
            Arc::new(FlakyBuilder::succeeding_with_ports(vec![8080])),
        );
        let executor = LifecycleExecutor::new(Arc::new(registry));

        let dir = tempfile::tempdir().unwrap();
        let ctx = StageContext::new("job-1", dir.path());
        let chain = vec!["railpack".to_string(), "nixpacks".to_string()];

        let outcome = build_with_fallback(&executor, &ctx, &chain, |b| Ok(app_for(b)))
            .await
            .unwrap();
        assert_eq!(outcome.builder, "nixpacks");
    }

    #[tokio::test]
    async fn test_all_builders_failing_yields_composite_error() {
        let mut registry = PluginRegistry::new();
        registry.register_builder("csdocker", Arc::new(FlakyBuilder::failing(99)));
        registry.register_builder("railpack", Arc::new(FlakyBuilder::failing(99)));
        registry.register_builder("nixpacks", Arc::new(FlakyBuilder::failing(99)));
        let executor = LifecycleExecutor::new(Arc::new(registry));

        let dir = tempfile::tempdir().unwrap();
        let ctx = StageContext::new("job-1", dir.path());
        let chain = vec![
            "csdocker".to_string(),
            "railpack".to_string(),
            "nixpacks".to_string(),
        ];

        let mut prepared = Vec::new();
        let err = build_with_fallback(&executor, &ctx, &chain, |b| {
            prepared.push(b.to_string());
            Ok(app_for(b))
        })
        .await
        .unwrap_err();

        // Descriptor regenerated once per attempt, in chain order.
        assert_eq!(prepared, chain);
        match err {
            BuildError::AllBuildersFailed { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(last.contains("synthetic failure"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_prepare_failure_counts_as_attempt() {
        let mut registry = PluginRegistry::new();
        registry.register_builder(
            "nixpacks",
            Arc::new(FlakyBuilder::succeeding_with_ports(vec![8080])),
        );
        let executor = LifecycleExecutor::new(Arc::new(registry));

        let dir = tempfile::tempdir().unwrap();
        let ctx = StageContext::new("job-1", dir.path());
        let chain = vec!["railpack".to_string(), "nixpacks".to_string()];

        let outcome = build_with_fallback(&executor, &ctx, &chain, |b| {
            if b == "railpack" {
                return Err(RunnerError::Runtime(anyhow::anyhow!(
                    "descriptor write failed"
                )));
            }
            Ok(app_for(b))
        })
        .await
        .unwrap();
        assert_eq!(outcome.builder, "nixpacks");
    }
}
