//! Error taxonomy for run requests and runner execution.
//!
//! Validation errors are raised before any directory is created or any process is
//! spawned. Process-level errors carry whatever output was captured before failing.

use std::time::Duration;

/// Why a run request was rejected or a run could not complete.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("invalid path: {path}")]
    InvalidPath { path: String },

    #[error("selection is not runnable (only allow-listed suites): {path}")]
    NotAllowed { path: String },

    #[error("target not found: {path}")]
    TargetNotFound { path: String },

    #[error("no runnable suite found under {path}")]
    NoRunnableSuite { path: String },

    #[error("tag {tag:?} is not permitted for {path}")]
    TagNotPermitted {
        tag: String,
        path: String,
        available: Vec<String>,
    },

    #[error("failed to spawn {program}: {source}")]
    SpawnFailure {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("runner timed out after {}s", .timeout.as_secs())]
    Timeout {
        timeout: Duration,
        /// Output captured before the kill.
        stdout: String,
        stderr: String,
    },

    #[error("run metadata unreadable for {run_id}: {reason}")]
    PartialMetadataCorruption { run_id: String, reason: String },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl RunError {
    /// Stable machine-readable kind, safe to show to API clients.
    pub fn kind(&self) -> &'static str {
        match self {
            RunError::InvalidPath { .. } => "invalid_path",
            RunError::NotAllowed { .. } => "not_allowed",
            RunError::TargetNotFound { .. } => "target_not_found",
            RunError::NoRunnableSuite { .. } => "no_runnable_suite",
            RunError::TagNotPermitted { .. } => "tag_not_found_in_suite",
            RunError::SpawnFailure { .. } => "spawn_failure",
            RunError::Timeout { .. } => "timeout",
            RunError::PartialMetadataCorruption { .. } => "metadata_corrupt",
            RunError::Internal(_) => "internal",
        }
    }

    /// True for errors caused by the request itself rather than the environment.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            RunError::InvalidPath { .. }
                | RunError::NotAllowed { .. }
                | RunError::TargetNotFound { .. }
                | RunError::NoRunnableSuite { .. }
                | RunError::TagNotPermitted { .. }
        )
    }
}
