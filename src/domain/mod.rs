//! Core data model: task parameters, network configuration, artifacts.

pub mod artifact;
pub mod flex;
pub mod network;
pub mod params;

pub use artifact::{Artifact, Deployment, DeploymentStatus, RegistryRef};
pub use flex::{FlexInt, FlexString};
pub use network::{infer_port_type, HealthCheck, NetworkPort, PortType};
pub use params::{ConsulParams, DeployParams, DestroyParams, DestroyTarget, TaskKind, TaskParams};
