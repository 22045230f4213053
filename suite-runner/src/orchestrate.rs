//! Orchestration of validated runs: request checks, run directory allocation,
//! runner invocation and persistence of the outcome.
//!
//! Every check completes before a run directory is created or a process spawned, so
//! a rejected request leaves no trace on disk.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::command::build_runner_command;
use crate::core::decode::tail_text;
use crate::core::path::normalize_rel;
use crate::core::request::{RunRequest, check_allowed, check_suite_tags, check_vocabulary};
use crate::core::tags::normalize_tag;
use crate::core::types::{RunMode, RunOutcome, RunRecord, RunSummary};
use crate::error::RunError;
use crate::io::browse::{DirListing, list_dir};
use crate::io::config::RunnerConfig;
use crate::io::executor::SuiteExecutor;
use crate::io::process::LineStream;
use crate::io::registry::RunRegistry;
use crate::io::sandbox::PathSandbox;
use crate::io::suites::{SuiteLayout, extract_tags};

/// Run id label and metadata target of the regression-all run.
pub const REGRESSION_LABEL: &str = "REGRESSION_ALL";
const REGRESSION_TARGET: &str = ".";

/// A request that passed every check and is ready to launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedRun {
    /// Relative target as recorded in metadata.
    pub target: String,
    pub tag: String,
    pub suites: Vec<PathBuf>,
    pub mode: RunMode,
}

impl PreparedRun {
    fn label(&self) -> &str {
        match self.mode {
            RunMode::Suite => self.target.as_str(),
            RunMode::RegressionAll => REGRESSION_LABEL,
        }
    }
}

/// Coordinates validation, the run registry and the runner executor.
pub struct Orchestrator<E: SuiteExecutor> {
    config: RunnerConfig,
    sandbox: PathSandbox,
    layout: SuiteLayout,
    registry: RunRegistry,
    executor: E,
}

impl<E: SuiteExecutor> Orchestrator<E> {
    pub fn new(
        config: RunnerConfig,
        project_root: &Path,
        runs_dir: &Path,
        executor: E,
    ) -> Result<Self> {
        config.validate()?;
        let sandbox = PathSandbox::new(project_root)?;
        let layout = SuiteLayout::new(&config.suite_extension, &config.tests_dir_name);
        let registry = RunRegistry::new(runs_dir, &config.runs_url_prefix);
        info!(
            root = %sandbox.root().display(),
            runs_dir = %runs_dir.display(),
            allowed = config.allowed_suites.len(),
            "orchestrator ready"
        );
        Ok(Self {
            config,
            sandbox,
            layout,
            registry,
            executor,
        })
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn sandbox(&self) -> &PathSandbox {
        &self.sandbox
    }

    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Check a request in order: allow-list, vocabulary, sandbox, existence,
    /// suite discovery, declared tags.
    pub fn prepare(&self, request: &RunRequest) -> Result<PreparedRun, RunError> {
        let rel = request.normalized_path();
        let tag = request.normalized_tag();

        check_allowed(&self.config.allowed_suites, &rel)?;
        check_vocabulary(&self.config.tags, &tag, &rel)?;

        let target = self.sandbox.resolve(&rel)?;
        if !target.exists() {
            return Err(RunError::TargetNotFound { path: rel });
        }
        let suites = self.layout.find_suites(&target);
        let Some(first) = suites.first() else {
            return Err(RunError::NoRunnableSuite { path: rel });
        };

        // Tags are only read from single-file selections; a directory declares none.
        let suite_tags = if first.is_file() {
            extract_tags(first)
        } else {
            Vec::new()
        };
        check_suite_tags(&suite_tags, &tag, &rel)?;

        debug!(path = %rel, tag = %tag, suites = suites.len(), "request accepted");
        Ok(PreparedRun {
            target: rel,
            tag,
            suites,
            mode: RunMode::Suite,
        })
    }

    fn prepare_regression(&self) -> PreparedRun {
        PreparedRun {
            target: REGRESSION_TARGET.to_string(),
            tag: normalize_tag(&self.config.regression_tag),
            suites: vec![self.sandbox.root().to_path_buf()],
            mode: RunMode::RegressionAll,
        }
    }

    /// Validate, execute to completion and persist one allow-listed suite run.
    #[instrument(skip_all, fields(path = %request.path, tag = %request.tag))]
    pub fn run(&self, request: &RunRequest) -> Result<RunOutcome, RunError> {
        let prepared = self.prepare(request)?;
        self.execute(&prepared)
    }

    /// Execute every suite under the project root filtered by the regression tag.
    #[instrument(skip_all)]
    pub fn run_regression(&self) -> Result<RunOutcome, RunError> {
        let prepared = self.prepare_regression();
        self.execute(&prepared)
    }

    fn execute(&self, prepared: &PreparedRun) -> Result<RunOutcome, RunError> {
        let allocated = self.registry.allocate(prepared.label())?;
        let cmd = build_runner_command(
            &self.config.launcher,
            &prepared.tag,
            &allocated.dir,
            &prepared.suites,
        );
        let mut record = RunRecord {
            run_id: allocated.run_id.clone(),
            created_at: allocated.created_at,
            returncode: None,
            cmd: cmd.clone(),
            target: prepared.target.clone(),
            tag: prepared.tag.clone(),
            mode: prepared.mode,
            timed_out: false,
        };
        info!(run_id = %record.run_id, tag = %record.tag, target = %record.target, "starting run");

        let tail_chars = self.config.tail_chars;
        match self
            .executor
            .run_to_completion(&cmd, self.sandbox.root(), self.config.run_timeout())
        {
            Ok(output) => {
                record.returncode = Some(output.exit_code);
                self.registry
                    .persist(&record, &output.stdout, &output.stderr)?;
                info!(run_id = %record.run_id, exit_code = output.exit_code, "run finished");
                Ok(RunOutcome {
                    artifacts: self.registry.artifacts(&record.run_id),
                    run_id: record.run_id,
                    returncode: output.exit_code,
                    cmd,
                    stdout_tail: tail_text(&output.stdout, tail_chars),
                    stderr_tail: tail_text(&output.stderr, tail_chars),
                })
            }
            Err(RunError::Timeout {
                timeout,
                stdout,
                stderr,
            }) => {
                record.timed_out = true;
                self.registry.persist(&record, &stdout, &stderr)?;
                warn!(run_id = %record.run_id, timeout_secs = timeout.as_secs(), "run timed out");
                Err(RunError::Timeout {
                    timeout,
                    stdout: tail_text(&stdout, tail_chars),
                    stderr: tail_text(&stderr, tail_chars),
                })
            }
            Err(err) => {
                if let Err(persist_err) = self.registry.persist(&record, "", &err.to_string()) {
                    warn!(run_id = %record.run_id, err = %persist_err, "failed to persist failed run");
                }
                Err(err)
            }
        }
    }

    /// Validate and launch one allow-listed suite, yielding output as it arrives.
    #[instrument(skip_all, fields(path = %request.path, tag = %request.tag))]
    pub fn start_stream(&self, request: &RunRequest) -> Result<StreamingRun, RunError> {
        let prepared = self.prepare(request)?;
        self.launch_stream(&prepared)
    }

    /// Streaming counterpart of [`Orchestrator::run_regression`].
    #[instrument(skip_all)]
    pub fn stream_regression(&self) -> Result<StreamingRun, RunError> {
        let prepared = self.prepare_regression();
        self.launch_stream(&prepared)
    }

    fn launch_stream(&self, prepared: &PreparedRun) -> Result<StreamingRun, RunError> {
        let allocated = self.registry.allocate(prepared.label())?;
        let cmd = build_runner_command(
            &self.config.launcher,
            &prepared.tag,
            &allocated.dir,
            &prepared.suites,
        );
        info!(run_id = %allocated.run_id, tag = %prepared.tag, target = %prepared.target, "starting streamed run");
        let lines = self.executor.stream_lines(&cmd, self.sandbox.root());
        Ok(StreamingRun {
            registry: self.registry.clone(),
            record: RunRecord {
                run_id: allocated.run_id,
                created_at: allocated.created_at,
                returncode: None,
                cmd,
                target: prepared.target.clone(),
                tag: prepared.tag.clone(),
                mode: prepared.mode,
                timed_out: false,
            },
            lines,
            tail: VecDeque::new(),
            max_lines: self.config.stream_tail_lines,
            tail_chars: self.config.tail_chars,
        })
    }

    /// Tags declared by one suite file.
    pub fn suite_tags(&self, rel: &str) -> Result<Vec<String>, RunError> {
        let target = self.sandbox.resolve(rel)?;
        if !target.is_file() {
            return Err(RunError::TargetNotFound {
                path: rel.to_string(),
            });
        }
        if !self.layout.has_suite_extension(&target) {
            return Err(RunError::NoRunnableSuite {
                path: rel.to_string(),
            });
        }
        Ok(extract_tags(&target))
    }

    /// True when `rel` is allow-listed and resolves to an existing file.
    pub fn is_runnable(&self, rel: &str) -> bool {
        let rel = normalize_rel(rel);
        if check_allowed(&self.config.allowed_suites, &rel).is_err() {
            return false;
        }
        self.sandbox
            .resolve(&rel)
            .map(|target| target.is_file())
            .unwrap_or(false)
    }

    pub fn regression_suite_count(&self) -> usize {
        self.layout.count_regression_suites(self.sandbox.root())
    }

    pub fn list_runs(&self) -> Result<Vec<RunSummary>> {
        self.registry.list_runs()
    }

    pub fn clear_runs(&self) -> Result<usize> {
        self.registry.clear_runs()
    }

    pub fn list_dir(&self, rel: &str) -> Result<DirListing, RunError> {
        list_dir(&self.sandbox, rel)
    }
}

/// A launched run whose output is consumed line by line.
///
/// Iterate to receive merged stdout/stderr lines, then call
/// [`StreamingRun::finish`] to reap the runner and persist the run. Dropping it
/// without finishing kills the runner and persists nothing.
pub struct StreamingRun {
    registry: RunRegistry,
    record: RunRecord,
    lines: LineStream,
    tail: VecDeque<String>,
    max_lines: usize,
    tail_chars: usize,
}

impl StreamingRun {
    pub fn run_id(&self) -> &str {
        &self.record.run_id
    }

    pub fn cmd(&self) -> &[String] {
        &self.record.cmd
    }

    /// Reap the runner (killing it if lines remain unread) and persist the run.
    pub fn finish(mut self) -> Result<RunOutcome, RunError> {
        let exit_code = self.lines.wait();
        self.record.returncode = Some(exit_code);

        let mut console = self.tail.iter().cloned().collect::<Vec<_>>().join("\n");
        if !console.is_empty() {
            console.push('\n');
        }
        self.registry.persist(&self.record, &console, "")?;
        info!(run_id = %self.record.run_id, exit_code, "streamed run finished");

        Ok(RunOutcome {
            artifacts: self.registry.artifacts(&self.record.run_id),
            stdout_tail: tail_text(&console, self.tail_chars),
            stderr_tail: String::new(),
            returncode: exit_code,
            cmd: self.record.cmd,
            run_id: self.record.run_id,
        })
    }
}

impl Iterator for StreamingRun {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let line = self.lines.next()?;
        if self.tail.len() == self.max_lines {
            self.tail.pop_front();
        }
        self.tail.push_back(line.clone());
        Some(line)
    }
}
