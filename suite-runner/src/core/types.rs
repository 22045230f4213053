//! Persisted and reported run types.

use serde::{Deserialize, Serialize};

/// How a run selected its suites.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// One allow-listed target with a caller-chosen tag.
    #[default]
    Suite,
    /// The whole project filtered by the regression tag.
    RegressionAll,
}

/// Metadata document written once per run (`result.json`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunRecord {
    pub run_id: String,
    /// Local timestamp, ISO-8601 with second precision.
    pub created_at: String,
    /// `None` when the runner was killed before reporting an exit code.
    pub returncode: Option<i32>,
    pub cmd: Vec<String>,
    pub target: String,
    pub tag: String,
    #[serde(default)]
    pub mode: RunMode,
    #[serde(default)]
    pub timed_out: bool,
}

/// URLs of runner artifacts that exist for a run.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RunArtifacts {
    pub log_url: Option<String>,
    pub report_url: Option<String>,
    pub output_xml_url: Option<String>,
}

/// Result returned to the caller of a completed run.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RunOutcome {
    pub run_id: String,
    pub returncode: i32,
    pub cmd: Vec<String>,
    pub stdout_tail: String,
    pub stderr_tail: String,
    #[serde(flatten)]
    pub artifacts: RunArtifacts,
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        self.returncode == 0
    }
}

/// Listing entry for a historical run.
///
/// Metadata fields are `None` when `result.json` is missing or unreadable; the
/// latter also sets `metadata_error`.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: String,
    pub created_at: Option<String>,
    pub returncode: Option<i32>,
    pub tag: Option<String>,
    pub target: Option<String>,
    pub has_log: bool,
    pub has_report: bool,
    pub log_url: Option<String>,
    pub report_url: Option<String>,
    pub stdout_url: Option<String>,
    pub stderr_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_error: Option<String>,
}
