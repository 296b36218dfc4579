//! Plugin capability interfaces and the registry that resolves them.
//!
//! The runner never knows concrete builder/registry/platform/release
//! implementations; it resolves them by name from four distinct maps, one
//! per capability. Lookup misses surface as stage-typed errors so the
//! pipeline can report which capability was unavailable.

use crate::domain::{Artifact, Deployment, DestroyTarget, RegistryRef};
use crate::error::{BuildError, DeployError, PushError, ReleaseError};
use crate::infrastructure::logs::{LogMultiplexer, LogStream, PhaseWriter};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Opaque stage configuration, produced by the config parser after variable
/// and environment substitution.
pub type PluginConfig = BTreeMap<String, serde_json::Value>;

/// Everything a plugin invocation may need from the surrounding job.
#[derive(Clone)]
pub struct StageContext {
    pub job_id: String,
    pub work_dir: PathBuf,
    pub cancel: CancellationToken,
    logs: Option<Arc<LogMultiplexer>>,
}

impl StageContext {
    pub fn new(job_id: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        StageContext {
            job_id: job_id.into(),
            work_dir: work_dir.into(),
            cancel: CancellationToken::new(),
            logs: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_logs(mut self, logs: Arc<LogMultiplexer>) -> Self {
        self.logs = Some(logs);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Phase-tagged writer for a plugin subprocess's stdout. `None` when no
    /// multiplexer is installed; plugins fall back to inherited streams.
    pub fn stdout_writer(&self) -> Option<PhaseWriter> {
        self.logs.as_ref().map(|mux| mux.writer(LogStream::Stdout))
    }

    pub fn stderr_writer(&self) -> Option<PhaseWriter> {
        self.logs.as_ref().map(|mux| mux.writer(LogStream::Stderr))
    }
}

/// Turns a source tree into a container-image-equivalent artifact.
/// Implementations must detect and populate `exposed_ports`.
#[async_trait]
pub trait Builder: Send + Sync {
    async fn build(&self, ctx: &StageContext, config: &PluginConfig)
        -> Result<Artifact, BuildError>;
}

/// Publishes an artifact to a remote image registry.
#[async_trait]
pub trait RegistryPusher: Send + Sync {
    async fn push(
        &self,
        ctx: &StageContext,
        config: &PluginConfig,
        artifact: &Artifact,
    ) -> Result<RegistryRef, PushError>;
}

/// Schedules a deployment onto a cluster and tears jobs down again.
#[async_trait]
pub trait Platform: Send + Sync {
    async fn deploy(
        &self,
        ctx: &StageContext,
        config: &PluginConfig,
        artifact: &Artifact,
    ) -> Result<Deployment, DeployError>;

    async fn destroy(&self, ctx: &StageContext, target: &DestroyTarget)
        -> Result<(), DeployError>;
}

/// Performs post-deploy cutover (traffic shifting and the like).
#[async_trait]
pub trait ReleaseManager: Send + Sync {
    async fn release(
        &self,
        ctx: &StageContext,
        config: &PluginConfig,
        deployment: &Deployment,
    ) -> Result<(), ReleaseError>;
}

/// Inspects a pre-built image for its exposed ports.
#[async_trait]
pub trait PortDetector: Send + Sync {
    async fn detect(&self, ctx: &StageContext, image: &str) -> anyhow::Result<Vec<u16>>;
}

/// Fetches named secrets for pre-stage config enrichment.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn fetch(&self, names: &[String]) -> anyhow::Result<BTreeMap<String, String>>;
}

/// Name-keyed plugin registry. Populated once at startup, read-only after.
#[derive(Default)]
pub struct PluginRegistry {
    builders: HashMap<String, Arc<dyn Builder>>,
    registries: HashMap<String, Arc<dyn RegistryPusher>>,
    platforms: HashMap<String, Arc<dyn Platform>>,
    release_managers: HashMap<String, Arc<dyn ReleaseManager>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_builder(&mut self, name: impl Into<String>, plugin: Arc<dyn Builder>) {
        self.builders.insert(name.into(), plugin);
    }

    pub fn register_registry(&mut self, name: impl Into<String>, plugin: Arc<dyn RegistryPusher>) {
        self.registries.insert(name.into(), plugin);
    }

    pub fn register_platform(&mut self, name: impl Into<String>, plugin: Arc<dyn Platform>) {
        self.platforms.insert(name.into(), plugin);
    }

    pub fn register_release_manager(
        &mut self,
        name: impl Into<String>,
        plugin: Arc<dyn ReleaseManager>,
    ) {
        self.release_managers.insert(name.into(), plugin);
    }

    pub fn builder(&self, name: &str) -> Result<Arc<dyn Builder>, BuildError> {
        self.builders
            .get(name)
            .cloned()
            .ok_or_else(|| BuildError::UnknownBuilder {
                name: name.to_string(),
            })
    }

    pub fn registry(&self, name: &str) -> Result<Arc<dyn RegistryPusher>, PushError> {
        self.registries
            .get(name)
            .cloned()
            .ok_or_else(|| PushError::UnknownRegistry {
                name: name.to_string(),
            })
    }

    pub fn platform(&self, name: &str) -> Result<Arc<dyn Platform>, DeployError> {
        self.platforms
            .get(name)
            .cloned()
            .ok_or_else(|| DeployError::UnknownPlatform {
                name: name.to_string(),
            })
    }

    pub fn release_manager(&self, name: &str) -> Result<Arc<dyn ReleaseManager>, ReleaseError> {
        self.release_managers
            .get(name)
            .cloned()
            .ok_or_else(|| ReleaseError::UnknownReleaseManager {
                name: name.to_string(),
            })
    }

    pub fn has_builder(&self, name: &str) -> bool {
        self.builders.contains_key(name)
    }

    pub fn has_registry(&self, name: &str) -> bool {
        self.registries.contains_key(name)
    }

    pub fn has_platform(&self, name: &str) -> bool {
        self.platforms.contains_key(name)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup_miss_is_typed() {
        let registry = PluginRegistry::new();
        assert!(matches!(
            registry.builder("railpack"),
            Err(BuildError::UnknownBuilder { name }) if name == "railpack"
        ));
        assert!(!registry.has_builder("railpack"));
        assert!(!registry.has_registry("docker"));
        assert!(!registry.has_platform("nomad"));
    }

    #[tokio::test]
    async fn test_registered_plugin_resolves() {
        let mut registry = PluginRegistry::new();
        registry.register_builder(
            "railpack",
            Arc::new(testing::FlakyBuilder::succeeding_with_ports(vec![3000])),
        );
        assert!(registry.has_builder("railpack"));

        let builder = registry.builder("railpack").unwrap();
        let ctx = StageContext::new("job-1", "/tmp/work");
        let artifact = builder.build(&ctx, &PluginConfig::new()).await.unwrap();
        assert_eq!(artifact.exposed_ports, vec![3000]);
    }
}
