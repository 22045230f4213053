//! Per-run output directories and their persisted metadata.
//!
//! Layout of one run:
//!
//! ```text
//! <runs_dir>/<run_id>/
//!   result.json          metadata (RunRecord)
//!   console_stdout.txt   decoded stdout (merged output for streamed runs)
//!   console_stderr.txt   decoded stderr
//!   log.html, report.html, output.xml   written by the runner itself
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::core::command::{LOG_FILE, OUTPUT_XML_FILE, REPORT_FILE};
use crate::core::path::{natural_cmp, slug};
use crate::core::types::{RunArtifacts, RunRecord, RunSummary};
use crate::error::RunError;

pub const RESULT_FILE: &str = "result.json";
pub const STDOUT_FILE: &str = "console_stdout.txt";
pub const STDERR_FILE: &str = "console_stderr.txt";

const RUN_ID_TIME_FORMAT: &str = "%Y%m%d_%H%M%S";
const CREATED_AT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const MAX_SUFFIX: u32 = 1000;

/// A freshly created, empty run directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatedRun {
    pub run_id: String,
    pub dir: PathBuf,
    pub created_at: String,
}

/// Owns the runs directory: allocation, persistence, listing, clearing.
#[derive(Debug, Clone)]
pub struct RunRegistry {
    runs_dir: PathBuf,
    url_prefix: String,
}

impl RunRegistry {
    pub fn new(runs_dir: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        Self {
            runs_dir: runs_dir.into(),
            url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn runs_dir(&self) -> &Path {
        &self.runs_dir
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.runs_dir.join(run_id)
    }

    /// Create a unique directory for a run labelled `label` at the current local time.
    pub fn allocate(&self, label: &str) -> Result<AllocatedRun> {
        self.allocate_at(label, Local::now().naive_local())
    }

    /// Create a unique directory for a run labelled `label` at `now`.
    ///
    /// Ids are `<YYYYmmdd_HHMMSS>_<slug>`; a clash within the same second gets a
    /// `_2`, `_3`, ... suffix. Directory creation is the reservation, so concurrent
    /// callers never share an id.
    pub fn allocate_at(&self, label: &str, now: NaiveDateTime) -> Result<AllocatedRun> {
        fs::create_dir_all(&self.runs_dir)
            .with_context(|| format!("create runs dir {}", self.runs_dir.display()))?;
        let base = format!("{}_{}", now.format(RUN_ID_TIME_FORMAT), slug(label));
        let created_at = now.format(CREATED_AT_FORMAT).to_string();

        for n in 1..=MAX_SUFFIX {
            let run_id = if n == 1 {
                base.clone()
            } else {
                format!("{base}_{n}")
            };
            let dir = self.run_dir(&run_id);
            match fs::create_dir(&dir) {
                Ok(()) => {
                    debug!(run_id = %run_id, "allocated run dir");
                    return Ok(AllocatedRun {
                        run_id,
                        dir,
                        created_at,
                    });
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(err) => {
                    return Err(err).with_context(|| format!("create run dir {}", dir.display()));
                }
            }
        }
        anyhow::bail!("no free run id for {base} after {MAX_SUFFIX} attempts")
    }

    /// Write console output and `result.json` for a run.
    pub fn persist(&self, record: &RunRecord, stdout: &str, stderr: &str) -> Result<()> {
        let dir = self.run_dir(&record.run_id);
        super::write_atomic(&dir.join(STDOUT_FILE), stdout)?;
        super::write_atomic(&dir.join(STDERR_FILE), stderr)?;
        let mut json = serde_json::to_string_pretty(record).context("serialize run record")?;
        json.push('\n');
        super::write_atomic(&dir.join(RESULT_FILE), &json)?;
        info!(
            run_id = %record.run_id,
            returncode = ?record.returncode,
            timed_out = record.timed_out,
            "run persisted"
        );
        Ok(())
    }

    /// Read `result.json`. `Ok(None)` when it does not exist.
    pub fn read_record(&self, run_id: &str) -> Result<Option<RunRecord>, RunError> {
        let Some(metadata) = self.read_metadata(run_id)? else {
            return Ok(None);
        };
        serde_json::from_value(metadata)
            .map(Some)
            .map_err(|err| corrupt(run_id, err.to_string()))
    }

    /// Read `result.json` as a JSON object without requiring any particular field.
    fn read_metadata(&self, run_id: &str) -> Result<Option<Value>, RunError> {
        let path = self.run_dir(run_id).join(RESULT_FILE);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(corrupt(run_id, err.to_string())),
        };
        match serde_json::from_str(&contents) {
            Ok(value @ Value::Object(_)) => Ok(Some(value)),
            Ok(_) => Err(corrupt(run_id, "metadata is not a JSON object".to_string())),
            Err(err) => Err(corrupt(run_id, err.to_string())),
        }
    }

    /// Public URL of `file` inside the run directory.
    pub fn url_for(&self, run_id: &str, file: &str) -> String {
        format!("{}/{run_id}/{file}", self.url_prefix)
    }

    fn url_if_exists(&self, run_id: &str, file: &str) -> Option<String> {
        self.run_dir(run_id)
            .join(file)
            .is_file()
            .then(|| self.url_for(run_id, file))
    }

    /// URLs for runner artifacts present in the run directory.
    pub fn artifacts(&self, run_id: &str) -> RunArtifacts {
        RunArtifacts {
            log_url: self.url_if_exists(run_id, LOG_FILE),
            report_url: self.url_if_exists(run_id, REPORT_FILE),
            output_xml_url: self.url_if_exists(run_id, OUTPUT_XML_FILE),
        }
    }

    /// Summaries of every run directory, newest first.
    ///
    /// A run with missing or unreadable metadata is still listed; unreadable
    /// metadata is reported on that entry alone.
    pub fn list_runs(&self) -> Result<Vec<RunSummary>> {
        let entries = match fs::read_dir(&self.runs_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("read runs dir {}", self.runs_dir.display()));
            }
        };

        let mut run_ids: Vec<String> = Vec::new();
        for entry in entries {
            let entry = entry.context("read runs dir entry")?;
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                run_ids.push(name.to_string());
            }
        }
        run_ids.sort_unstable_by(|a, b| natural_cmp(b, a));

        Ok(run_ids.iter().map(|run_id| self.summarize(run_id)).collect())
    }

    fn summarize(&self, run_id: &str) -> RunSummary {
        let log_url = self.url_if_exists(run_id, LOG_FILE);
        let report_url = self.url_if_exists(run_id, REPORT_FILE);
        let mut summary = RunSummary {
            run_id: run_id.to_string(),
            has_log: log_url.is_some(),
            has_report: report_url.is_some(),
            log_url,
            report_url,
            stdout_url: self.url_if_exists(run_id, STDOUT_FILE),
            stderr_url: self.url_if_exists(run_id, STDERR_FILE),
            ..RunSummary::default()
        };
        match self.read_metadata(run_id) {
            Ok(Some(metadata)) => {
                let text = |key: &str| metadata.get(key).and_then(Value::as_str).map(str::to_string);
                summary.created_at = text("created_at");
                summary.tag = text("tag");
                summary.target = text("target");
                summary.returncode = metadata
                    .get("returncode")
                    .and_then(Value::as_i64)
                    .and_then(|code| i32::try_from(code).ok());
            }
            Ok(None) => {}
            Err(err) => {
                warn!(run_id, err = %err, "unreadable run metadata");
                summary.metadata_error = Some(err.to_string());
            }
        }
        summary
    }

    /// Delete every entry under the runs directory, keeping the directory.
    ///
    /// Entries that cannot be removed are logged and skipped. Returns how many
    /// entries were removed.
    pub fn clear_runs(&self) -> Result<usize> {
        fs::create_dir_all(&self.runs_dir)
            .with_context(|| format!("create runs dir {}", self.runs_dir.display()))?;
        let entries = fs::read_dir(&self.runs_dir)
            .with_context(|| format!("read runs dir {}", self.runs_dir.display()))?;

        let mut removed = 0;
        for entry in entries {
            let entry = entry.context("read runs dir entry")?;
            let path = entry.path();
            let result = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            match result {
                Ok(()) => removed += 1,
                Err(err) => warn!(path = %path.display(), err = %err, "failed to remove run entry"),
            }
        }
        info!(removed, "runs cleared");
        Ok(removed)
    }
}

fn corrupt(run_id: &str, reason: String) -> RunError {
    RunError::PartialMetadataCorruption {
        run_id: run_id.to_string(),
        reason,
    }
}
