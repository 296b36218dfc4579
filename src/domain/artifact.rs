//! Records that flow forward through the lifecycle: the artifact a builder
//! produces, the reference a registry push returns, and the deployment
//! record the platform creates. None are mutated after creation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Output of a successful build stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,

    pub image: String,

    pub tag: String,

    /// Ordered; the first entry is the preferred port when the user supplied
    /// no networks.
    #[serde(default)]
    pub exposed_ports: Vec<u16>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Artifact {
    pub fn new(image: impl Into<String>, tag: impl Into<String>) -> Self {
        Artifact {
            id: uuid::Uuid::new_v4().to_string(),
            image: image.into(),
            tag: tag.into(),
            exposed_ports: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn full_image(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }
}

/// Output of the registry push stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryRef {
    pub full_image: String,
}

/// Output of the platform deploy stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,

    pub status: DeploymentStatus,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentStatus {
    pub state: String,
}
