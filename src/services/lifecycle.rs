//! Lifecycle executor - drives the build, registry, deploy, and release
//! stages against the plugins the configuration names.
//!
//! Each stage resolves its plugin from the registry, passes the stage's
//! opaque config map, invokes the single capability method, and propagates
//! the outcome. Stages are totally ordered; artifacts flow forward and are
//! never mutated after creation.

use crate::config::Application;
use crate::domain::{Artifact, Deployment, RegistryRef};
use crate::error::{BuildError, DeployError, PushError, ReleaseError, RunnerError};
use crate::plugins::{PluginConfig, PluginRegistry, SecretStore, StageContext};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Config key naming the secret provider for pre-stage enrichment.
const SECRET_PROVIDER_KEY: &str = "secrets_from";
/// Config key listing the secret names to fetch.
const SECRET_NAMES_KEY: &str = "secrets";

pub struct LifecycleExecutor {
    registry: Arc<PluginRegistry>,
    secret_stores: HashMap<String, Arc<dyn SecretStore>>,
}

impl LifecycleExecutor {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self {
            registry,
            secret_stores: HashMap::new(),
        }
    }

    pub fn with_secret_store(
        mut self,
        name: impl Into<String>,
        store: Arc<dyn SecretStore>,
    ) -> Self {
        self.secret_stores.insert(name.into(), store);
        self
    }

    pub fn plugins(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Run every stage the application configures, in order.
    pub async fn execute(
        &self,
        ctx: &StageContext,
        app: &Application,
    ) -> Result<Deployment, RunnerError> {
        let artifact = self.execute_build(ctx, app).await?;
        if app.registry.is_some() {
            self.execute_registry(ctx, app, &artifact).await?;
        }
        let deployment = self.execute_deploy(ctx, app, &artifact).await?;
        if app.release.is_some() {
            self.execute_release(ctx, app, &deployment).await?;
        }
        Ok(deployment)
    }

    /// Build stage. Produces an artifact and records it in the job-local
    /// content-addressed store.
    pub async fn execute_build(
        &self,
        ctx: &StageContext,
        app: &Application,
    ) -> Result<Artifact, BuildError> {
        let config = self.enrich(&app.build.config).await?;
        let plugin = self.registry.builder(&app.build.use_name)?;

        info!("🔨 Building with {}", app.build.use_name);
        let started = Instant::now();
        let artifact = plugin.build(ctx, &config).await?;
        info!(
            "✅ Build completed in {:.1}s ({})",
            started.elapsed().as_secs_f64(),
            artifact.full_image()
        );

        self.store_artifact(ctx, &artifact);
        Ok(artifact)
    }

    /// Registry stage. Pushes the artifact and returns the remote reference.
    pub async fn execute_registry(
        &self,
        ctx: &StageContext,
        app: &Application,
        artifact: &Artifact,
    ) -> Result<RegistryRef, PushError> {
        let block = app
            .registry
            .as_ref()
            .ok_or_else(|| PushError::PushFailed("no registry block configured".to_string()))?;
        let plugin = self.registry.registry(&block.use_name)?;

        info!("📤 Pushing {} via {}", artifact.full_image(), block.use_name);
        let started = Instant::now();
        let reference = plugin.push(ctx, &block.config, artifact).await?;
        info!(
            "✅ Push completed in {:.1}s ({})",
            started.elapsed().as_secs_f64(),
            reference.full_image
        );
        Ok(reference)
    }

    /// Deploy stage. Creates the remote deployment record.
    pub async fn execute_deploy(
        &self,
        ctx: &StageContext,
        app: &Application,
        artifact: &Artifact,
    ) -> Result<Deployment, DeployError> {
        let plugin = self.registry.platform(&app.deploy.use_name)?;

        info!("🚀 Deploying via {}", app.deploy.use_name);
        let started = Instant::now();
        let deployment = plugin.deploy(ctx, &app.deploy.config, artifact).await?;
        info!(
            "✅ Deploy completed in {:.1}s (deployment {}, state {})",
            started.elapsed().as_secs_f64(),
            deployment.id,
            deployment.status.state
        );
        Ok(deployment)
    }

    /// Release stage. No artifact; may mutate external state.
    pub async fn execute_release(
        &self,
        ctx: &StageContext,
        app: &Application,
        deployment: &Deployment,
    ) -> Result<(), ReleaseError> {
        let block = app.release.as_ref().ok_or_else(|| {
            ReleaseError::ReleaseFailed("no release block configured".to_string())
        })?;
        let plugin = self.registry.release_manager(&block.use_name)?;

        info!("🎯 Releasing via {}", block.use_name);
        let started = Instant::now();
        plugin.release(ctx, &block.config, deployment).await?;
        info!(
            "✅ Release completed in {:.1}s",
            started.elapsed().as_secs_f64()
        );
        Ok(())
    }

    /// Pre-stage secret enrichment: when the config names a secret provider,
    /// fetch the listed secrets and merge them in before the plugin loads.
    /// Secret values are never logged; the debug copy is redacted.
    async fn enrich(&self, config: &PluginConfig) -> Result<PluginConfig, BuildError> {
        let Some(provider) = config
            .get(SECRET_PROVIDER_KEY)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
        else {
            return Ok(config.clone());
        };

        let store = self.secret_stores.get(provider).ok_or_else(|| {
            BuildError::SecretEnrichment(format!("unknown secret provider '{}'", provider))
        })?;

        let names: Vec<String> = config
            .get(SECRET_NAMES_KEY)
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let secrets = store
            .fetch(&names)
            .await
            .map_err(|e| BuildError::SecretEnrichment(e.to_string()))?;

        let mut enriched = config.clone();
        let mut redacted = config.clone();
        for (key, value) in secrets {
            enriched.insert(key.clone(), serde_json::Value::String(value));
            redacted.insert(key, serde_json::Value::String("***".to_string()));
        }

        debug!(
            config = %serde_json::to_string(&redacted).unwrap_or_default(),
            "Enriched build config"
        );
        Ok(enriched)
    }

    /// Record artifact metadata under a content-addressed directory below
    /// the job's work directory. Metadata loss is not fatal to the build.
    fn store_artifact(&self, ctx: &StageContext, artifact: &Artifact) {
        let path = artifact_dir(ctx, artifact).join("artifact.json");
        let result = std::fs::create_dir_all(path.parent().unwrap()).and_then(|_| {
            let rendered = serde_json::to_string_pretty(artifact).unwrap_or_default();
            std::fs::write(&path, rendered)
        });
        if let Err(e) = result {
            warn!(error = %e, "Failed to record artifact metadata");
        } else {
            debug!(path = %path.display(), "Recorded artifact metadata");
        }
    }
}

/// Content-addressed artifact directory for a build output.
pub fn artifact_dir(ctx: &StageContext, artifact: &Artifact) -> PathBuf {
    let digest = Sha256::digest(artifact.full_image().as_bytes());
    let address = format!("{:x}", digest);
    ctx.work_dir.join(".artifacts").join(&address[..12])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PluginBlock;
    use crate::plugins::testing::{FlakyBuilder, RecordingPusher, StaticPlatform};
    use crate::plugins::Builder;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;

    fn app(builder: &str, with_registry: bool) -> Application {
        Application {
            name: "web".to_string(),
            path: None,
            labels: BTreeMap::new(),
            build: PluginBlock {
                use_name: builder.to_string(),
                config: PluginConfig::new(),
            },
            registry: with_registry.then(|| PluginBlock {
                use_name: "docker".to_string(),
                config: PluginConfig::new(),
            }),
            deploy: PluginBlock {
                use_name: "nomad-pack".to_string(),
                config: PluginConfig::new(),
            },
            release: None,
            url: None,
            config: PluginConfig::new(),
        }
    }

    fn executor(with_registry_plugin: bool) -> (LifecycleExecutor, Arc<RecordingPusher>) {
        let mut registry = PluginRegistry::new();
        registry.register_builder(
            "railpack",
            Arc::new(FlakyBuilder::succeeding_with_ports(vec![3000])),
        );
        let pusher = Arc::new(RecordingPusher::new());
        if with_registry_plugin {
            registry.register_registry("docker", pusher.clone());
        }
        registry.register_platform("nomad-pack", Arc::new(StaticPlatform));
        (LifecycleExecutor::new(Arc::new(registry)), pusher)
    }

    #[tokio::test]
    async fn test_execute_runs_stages_in_order() {
        let (executor, pusher) = executor(true);
        let dir = tempfile::tempdir().unwrap();
        let ctx = StageContext::new("job-1", dir.path());

        let deployment = executor.execute(&ctx, &app("railpack", true)).await.unwrap();
        assert_eq!(deployment.status.state, "running");
        assert_eq!(pusher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_registry_stage_skipped_without_block() {
        let (executor, pusher) = executor(true);
        let dir = tempfile::tempdir().unwrap();
        let ctx = StageContext::new("job-1", dir.path());

        executor.execute(&ctx, &app("railpack", false)).await.unwrap();
        assert_eq!(pusher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_builder_is_typed() {
        let (executor, _) = executor(true);
        let dir = tempfile::tempdir().unwrap();
        let ctx = StageContext::new("job-1", dir.path());

        let err = executor
            .execute_build(&ctx, &app("nixpacks", false))
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::UnknownBuilder { name } if name == "nixpacks"));
    }

    #[tokio::test]
    async fn test_build_records_artifact_metadata() {
        let (executor, _) = executor(false);
        let dir = tempfile::tempdir().unwrap();
        let ctx = StageContext::new("job-1", dir.path());

        let artifact = executor
            .execute_build(&ctx, &app("railpack", false))
            .await
            .unwrap();
        let stored = artifact_dir(&ctx, &artifact).join("artifact.json");
        assert!(stored.is_file());

        let recorded: Artifact =
            serde_json::from_str(&std::fs::read_to_string(stored).unwrap()).unwrap();
        assert_eq!(recorded, artifact);
    }

    struct CapturingBuilder {
        seen: Mutex<Option<PluginConfig>>,
    }

    #[async_trait]
    impl Builder for CapturingBuilder {
        async fn build(
            &self,
            _ctx: &StageContext,
            config: &PluginConfig,
        ) -> Result<Artifact, BuildError> {
            *self.seen.lock().unwrap() = Some(config.clone());
            Ok(Artifact::new("img", "t"))
        }
    }

    struct StaticSecrets;

    #[async_trait]
    impl SecretStore for StaticSecrets {
        async fn fetch(&self, names: &[String]) -> anyhow::Result<BTreeMap<String, String>> {
            Ok(names
                .iter()
                .map(|name| (name.clone(), format!("value-of-{}", name)))
                .collect())
        }
    }

    #[tokio::test]
    async fn test_secret_enrichment_merges_before_plugin_load() {
        let capturing = Arc::new(CapturingBuilder {
            seen: Mutex::new(None),
        });
        let mut registry = PluginRegistry::new();
        registry.register_builder("railpack", capturing.clone());

        let executor = LifecycleExecutor::new(Arc::new(registry))
            .with_secret_store("vault", Arc::new(StaticSecrets));

        let mut application = app("railpack", false);
        application
            .build
            .config
            .insert("secrets_from".into(), serde_json::json!("vault"));
        application
            .build
            .config
            .insert("secrets".into(), serde_json::json!(["DATABASE_URL"]));

        let dir = tempfile::tempdir().unwrap();
        let ctx = StageContext::new("job-1", dir.path());
        executor.execute_build(&ctx, &application).await.unwrap();

        let seen = capturing.seen.lock().unwrap().clone().unwrap();
        assert_eq!(seen["DATABASE_URL"], serde_json::json!("value-of-DATABASE_URL"));
    }

    #[tokio::test]
    async fn test_unknown_secret_provider_fails_the_stage() {
        let (executor, _) = executor(false);
        let mut application = app("railpack", false);
        application
            .build
            .config
            .insert("secrets_from".into(), serde_json::json!("missing-store"));

        let dir = tempfile::tempdir().unwrap();
        let ctx = StageContext::new("job-1", dir.path());
        let err = executor
            .execute_build(&ctx, &application)
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::SecretEnrichment(_)));
    }
}
