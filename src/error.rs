//! Centralized error types for the runner
//!
//! Uses thiserror for typed errors that can be matched on,
//! while still being compatible with anyhow for propagation.
//! The top-level [`RunnerError`] maps every failure class onto the
//! process exit code the supervising scheduler keys on.

use thiserror::Error;

/// Top-level error type for runner operations
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Parameter error: {0}")]
    Params(#[from] ParamsError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    #[error("Push error: {0}")]
    Push(#[from] PushError),

    #[error("Deploy error: {0}")]
    Deploy(#[from] DeployError),

    #[error("Release error: {0}")]
    Release(#[from] ReleaseError),

    #[error("Cancelled: {reason}")]
    Cancelled { reason: String, deadline: bool },

    #[error("{0}")]
    Runtime(#[from] anyhow::Error),
}

/// Exit codes are part of the contract with the scheduler:
/// 0 success, 1 runtime, 2 parameter parse, 3 validation, 4 cancellation.
impl RunnerError {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunnerError::Params(ParamsError::Base64(_))
            | RunnerError::Params(ParamsError::Json(_)) => 2,
            RunnerError::Params(_) => 3,
            RunnerError::Config(ConfigError::Validation { .. }) => 3,
            RunnerError::Cancelled { .. } => 4,
            _ => 1,
        }
    }

    pub fn cancelled(reason: impl Into<String>, deadline: bool) -> Self {
        RunnerError::Cancelled {
            reason: reason.into(),
            deadline,
        }
    }
}

/// Scheduler parameter decoding and validation errors
#[derive(Error, Debug)]
pub enum ParamsError {
    #[error("Parameters are not valid base64: {0}")]
    Base64(String),

    #[error("Parameters are not valid JSON: {0}")]
    Json(String),

    #[error("Unknown task type: {task}")]
    UnknownTask { task: String },

    #[error("Missing mandatory field '{field}' for task {task}. Received: {summary}")]
    MissingField {
        task: String,
        field: String,
        summary: String,
    },
}

/// Declarative configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config syntax error: {0}")]
    Syntax(String),

    #[error("Config binding error: {0}")]
    Bind(String),

    #[error("Invalid configuration value for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Failed to read config file {path}: {message}")]
    Io { path: String, message: String },
}

impl ConfigError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Source acquisition errors (git clone, tarball download/extract)
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("git binary not found on PATH")]
    GitMissing,

    #[error("Clone failed for {repository}@{branch}: {message}")]
    CloneFailed {
        repository: String,
        branch: String,
        message: String,
    },

    #[error("Download failed for {url}: {message}")]
    DownloadFailed { url: String, message: String },

    #[error("Archive extraction failed: {0}")]
    ExtractFailed(String),

    #[error("Archive entry {path} has an absolute symlink target {target}")]
    AbsoluteSymlink { path: String, target: String },

    #[error("Archive entry {path} escapes the destination directory")]
    PathEscape { path: String },
}

/// Builder stage errors, including the aggregated fallback outcome
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("No builder plugin registered under '{name}'")]
    UnknownBuilder { name: String },

    #[error("Builder {name} failed: {message}")]
    BuilderFailed { name: String, message: String },

    #[error("All {attempts} builders failed; last error: {last}")]
    AllBuildersFailed { attempts: usize, last: String },

    #[error("Secret enrichment failed: {0}")]
    SecretEnrichment(String),
}

/// Registry push errors
#[derive(Error, Debug)]
pub enum PushError {
    #[error("No registry plugin registered under '{name}'")]
    UnknownRegistry { name: String },

    #[error("Push failed: {0}")]
    PushFailed(String),
}

/// Platform deployment errors
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("No platform plugin registered under '{name}'")]
    UnknownPlatform { name: String },

    #[error("Platform rejected deployment: {0}")]
    Rejected(String),

    #[error("Teardown failed for job {job_id}: {message}")]
    DestroyFailed { job_id: String, message: String },
}

/// Release-manager errors
#[derive(Error, Debug)]
pub enum ReleaseError {
    #[error("No release plugin registered under '{name}'")]
    UnknownReleaseManager { name: String },

    #[error("Release failed: {0}")]
    ReleaseFailed(String),
}

/// Control-plane errors. Never fatal: callers log at warn level and continue.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Backend request failed: {0}")]
    Request(String),

    #[error("Backend returned status {status}: {body}")]
    Status { status: u16, body: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_mapping() {
        let decode: RunnerError = ParamsError::Base64("bad pad".into()).into();
        assert_eq!(decode.exit_code(), 2);

        let missing: RunnerError = ParamsError::MissingField {
            task: "deploy-repository".into(),
            field: "job_id".into(),
            summary: "{}".into(),
        }
        .into();
        assert_eq!(missing.exit_code(), 3);

        let cancelled = RunnerError::cancelled("deadline exceeded", true);
        assert_eq!(cancelled.exit_code(), 4);

        let build: RunnerError = BuildError::AllBuildersFailed {
            attempts: 3,
            last: "boom".into(),
        }
        .into();
        assert_eq!(build.exit_code(), 1);
    }

    #[test]
    fn test_error_conversion() {
        let fetch = FetchError::GitMissing;
        let err: RunnerError = fetch.into();
        assert!(matches!(err, RunnerError::Fetch(_)));
    }

    #[test]
    fn test_validation_error_names_field() {
        let err = ConfigError::validation("app.name", "must match [A-Za-z0-9_-]+");
        assert!(err.to_string().contains("app.name"));
    }
}
