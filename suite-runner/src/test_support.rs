//! Test-only helpers: a throwaway project tree and a spying executor.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tempfile::TempDir;

use crate::error::RunError;
use crate::io::config::RunnerConfig;
use crate::io::executor::SuiteExecutor;
use crate::io::process::{CommandOutput, LineStream};
use crate::orchestrate::Orchestrator;

/// Allow-listed suite declaring `apiMagazord` and `smoke`.
pub const TAGGED_SUITE: &str = "parte1/tests/a.robot";
/// Allow-listed suite without a tags line.
pub const UNTAGGED_SUITE: &str = "parte1/tests/untagged.robot";
/// Tagged suite left out of the allow-list.
pub const UNLISTED_SUITE: &str = "parte1/tests/unlisted.robot";
/// Allow-listed path that does not exist.
pub const MISSING_SUITE: &str = "parte1/tests/missing.robot";

/// A temporary project root plus runs directory.
///
/// ```text
/// project/parte1/tests/a.robot          [Tags] apiMagazord  smoke
/// project/parte1/tests/untagged.robot
/// project/parte1/tests/unlisted.robot   [Tags] apimagazord
/// project/parte1/notes.md
/// runs/
/// ```
pub struct TestProject {
    temp: TempDir,
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}

impl TestProject {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let project = temp.path().join("project");
        write(
            &project.join(TAGGED_SUITE),
            "*** Test Cases ***\nBusca produto\n    [Tags]    apiMagazord  smoke\n    Log    ok\n",
        );
        write(
            &project.join(UNTAGGED_SUITE),
            "*** Test Cases ***\nSem tags\n    Log    ok\n",
        );
        write(
            &project.join(UNLISTED_SUITE),
            "*** Test Cases ***\nFora\n    [Tags]    apimagazord\n",
        );
        write(&project.join("parte1/notes.md"), "# notas\n");
        fs::create_dir_all(temp.path().join("runs")).expect("runs dir");
        Self { temp }
    }

    pub fn root(&self) -> PathBuf {
        self.temp.path().join("project")
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.temp.path().join("runs")
    }

    /// Default config allow-listing the tagged, untagged and missing suites.
    pub fn config(&self) -> RunnerConfig {
        RunnerConfig {
            launcher: vec!["robot".to_string()],
            allowed_suites: [TAGGED_SUITE, UNTAGGED_SUITE, MISSING_SUITE]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ..RunnerConfig::default()
        }
    }

    pub fn orchestrator<E: SuiteExecutor>(&self, executor: E) -> Orchestrator<E> {
        self.orchestrator_with(self.config(), executor)
    }

    pub fn orchestrator_with<E: SuiteExecutor>(
        &self,
        config: RunnerConfig,
        executor: E,
    ) -> Orchestrator<E> {
        Orchestrator::new(config, &self.root(), &self.runs_dir(), executor).expect("orchestrator")
    }

    /// Write the config to `suite-runner.toml` beside the project and return its path.
    pub fn write_config(&self, config: &RunnerConfig) -> PathBuf {
        let path = self.temp.path().join("suite-runner.toml");
        crate::io::config::write_config(&path, config).expect("write config");
        path
    }
}

fn write(path: &Path, contents: &str) {
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(path, contents).expect("write");
}

#[derive(Debug, Clone)]
enum Behavior {
    Exit {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },
    TimeOut {
        stdout: String,
    },
}

/// Executor that records commands instead of spawning processes.
#[derive(Debug)]
pub struct SpyExecutor {
    calls: AtomicUsize,
    commands: Mutex<Vec<Vec<String>>>,
    behavior: Behavior,
    lines: Vec<String>,
    stream_exit_code: i32,
}

impl SpyExecutor {
    fn with(behavior: Behavior) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            commands: Mutex::new(Vec::new()),
            behavior,
            lines: Vec::new(),
            stream_exit_code: 0,
        }
    }

    /// Exits 0 with a short stdout.
    pub fn succeeding() -> Self {
        Self::exiting(0, "1 test, 1 passed\n", "")
    }

    pub fn exiting(exit_code: i32, stdout: &str, stderr: &str) -> Self {
        Self::with(Behavior::Exit {
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        })
    }

    /// Blocking runs time out after printing `stdout`.
    pub fn timing_out(stdout: &str) -> Self {
        Self::with(Behavior::TimeOut {
            stdout: stdout.to_string(),
        })
    }

    /// Streamed runs yield `lines` then end with `exit_code`.
    pub fn streaming(lines: Vec<String>, exit_code: i32) -> Self {
        Self {
            lines,
            stream_exit_code: exit_code,
            ..Self::succeeding()
        }
    }

    /// Number of launches, blocking or streamed.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<Vec<String>> {
        self.commands.lock().expect("commands lock").clone()
    }

    fn record(&self, cmd: &[String]) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.commands
            .lock()
            .expect("commands lock")
            .push(cmd.to_vec());
    }
}

impl SuiteExecutor for SpyExecutor {
    fn run_to_completion(
        &self,
        cmd: &[String],
        _cwd: &Path,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, RunError> {
        self.record(cmd);
        match &self.behavior {
            Behavior::Exit {
                exit_code,
                stdout,
                stderr,
            } => Ok(CommandOutput {
                exit_code: *exit_code,
                stdout: stdout.clone(),
                stderr: stderr.clone(),
            }),
            Behavior::TimeOut { stdout } => Err(RunError::Timeout {
                timeout: timeout.unwrap_or(Duration::from_secs(1)),
                stdout: stdout.clone(),
                stderr: String::new(),
            }),
        }
    }

    fn stream_lines(&self, cmd: &[String], _cwd: &Path) -> LineStream {
        self.record(cmd);
        LineStream::from_lines(self.lines.clone(), self.stream_exit_code)
    }
}
