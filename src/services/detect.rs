//! Builder-chain construction.
//!
//! Inspects the source tree and emits the ordered list of builders to
//! attempt. A Dockerfile variant puts the Docker builder in front; a
//! user-supplied builder always takes the first slot.

use std::path::Path;

/// Dockerfile spellings that activate the Docker builder.
pub const DOCKERFILE_VARIANTS: &[&str] = &[
    "Dockerfile",
    "dockerfile",
    "Dockerfile.prod",
    "Dockerfile.production",
    "Dockerfile.dev",
    "Dockerfile.development",
];

const DOCKER_CHAIN: &[&str] = &["csdocker", "railpack", "nixpacks"];
const BUILDPACK_CHAIN: &[&str] = &["railpack", "nixpacks"];

/// Find the first Dockerfile variant present as a regular file.
pub fn find_dockerfile(source_dir: &Path) -> Option<String> {
    DOCKERFILE_VARIANTS
        .iter()
        .find(|name| source_dir.join(name).is_file())
        .map(|name| name.to_string())
}

/// Build the ordered builder chain for a source tree.
///
/// The chain is never empty and never contains duplicates. When the user
/// supplied a builder it goes first; any later occurrence of the same name
/// is removed.
pub fn builder_chain(source_dir: &Path, user_builder: &str) -> Vec<String> {
    let default: &[&str] = if find_dockerfile(source_dir).is_some() {
        DOCKER_CHAIN
    } else {
        BUILDPACK_CHAIN
    };

    let mut chain: Vec<String> = Vec::with_capacity(default.len() + 1);
    if !user_builder.is_empty() {
        chain.push(user_builder.to_string());
    }
    for name in default {
        if !chain.iter().any(|existing| existing == name) {
            chain.push(name.to_string());
        }
    }
    chain
}
