//! Executor abstraction for launching the test runner.
//!
//! The [`SuiteExecutor`] trait decouples orchestration from real child processes.
//! Tests use spy executors that record invocations without spawning anything.

use std::path::Path;
use std::time::Duration;

use crate::error::RunError;
use crate::io::process::{CommandOutput, LineStream, run_to_completion};

/// Abstraction over runner execution backends.
pub trait SuiteExecutor: Send + Sync {
    /// Run `cmd` in `cwd` and wait for it, killing it after `timeout`.
    fn run_to_completion(
        &self,
        cmd: &[String],
        cwd: &Path,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, RunError>;

    /// Start `cmd` in `cwd` and hand back its merged output lines.
    fn stream_lines(&self, cmd: &[String], cwd: &Path) -> LineStream;
}

/// Executor that spawns real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExecutor;

impl SuiteExecutor for ProcessExecutor {
    fn run_to_completion(
        &self,
        cmd: &[String],
        cwd: &Path,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, RunError> {
        run_to_completion(cmd, cwd, timeout)
    }

    fn stream_lines(&self, cmd: &[String], cwd: &Path) -> LineStream {
        LineStream::spawn(cmd, cwd)
    }
}
