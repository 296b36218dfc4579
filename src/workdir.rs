//! Ephemeral per-job work directory.
//!
//! Created at dispatch, deleted on success, preserved for post-mortem when
//! the flow fails. The sole mutable on-disk state the runner owns.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub struct WorkDir {
    path: PathBuf,
    preserved: bool,
}

impl WorkDir {
    /// Create a fresh scratch directory for a job.
    pub fn create(job_id: &str) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("cs-job-{}-", job_id))
            .tempdir()
            .context("creating work directory")?;

        // Ownership of deletion moves to this type; preservation on failure
        // must survive the value going out of scope.
        let path = dir.into_path();
        Ok(Self {
            path,
            preserved: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keep the directory on disk for diagnostics.
    pub fn preserve(&mut self) {
        if !self.preserved {
            self.preserved = true;
            warn!("Work directory preserved at {}", self.path.display());
        }
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if self.preserved {
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => info!("Cleaned work directory {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to clean work directory {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}
