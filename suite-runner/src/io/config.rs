//! Suite runner configuration stored in `suite-runner.toml`.

use std::fs;
use std::path::{Component, Path};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::tags::normalize_tag;
use crate::core::watchdog::WatchdogSettings;

/// Environment variable naming the interpreter used to launch the runner.
pub const PYTHON_ENV: &str = "SUITE_RUNNER_PYTHON";

/// Runner configuration (TOML).
///
/// Intended to be edited by humans. Missing fields default to values that suit a
/// Robot Framework project launched through `python -m robot`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunnerConfig {
    /// Command prefix that starts the external test runner.
    pub launcher: Vec<String>,

    /// Extension (without dot) of runnable suite files.
    pub suite_extension: String,

    /// Conventional sub-directory preferred when a directory is selected.
    pub tests_dir_name: String,

    /// Known tag vocabulary. Requests for any other tag are rejected.
    pub tags: Vec<String>,

    /// Tag used by the run-everything action. Must be part of `tags`.
    pub regression_tag: String,

    /// Suite paths (relative to the project root) that may be executed.
    pub allowed_suites: Vec<String>,

    /// Hard timeout for blocking runs. `None` waits indefinitely.
    pub run_timeout_secs: Option<u64>,

    /// Characters kept from stdout/stderr in run outcomes.
    pub tail_chars: usize,

    /// Lines kept in memory from a streamed run for the console log.
    pub stream_tail_lines: usize,

    /// URL prefix under which the runs directory is served.
    pub runs_url_prefix: String,

    pub watchdog: WatchdogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WatchdogConfig {
    pub shutdown_delay_ms: u64,
    pub min_shutdown_delay_ms: u64,
    pub heartbeat_grace_ms: u64,
    pub headless_ceiling_secs: u64,
    /// Interval between watchdog ticks.
    pub tick_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            shutdown_delay_ms: 2500,
            min_shutdown_delay_ms: 500,
            heartbeat_grace_ms: 1200,
            headless_ceiling_secs: 35,
            tick_ms: 400,
        }
    }
}

impl WatchdogConfig {
    pub fn settings(&self, headless: bool) -> WatchdogSettings {
        WatchdogSettings {
            shutdown_delay: Duration::from_millis(self.shutdown_delay_ms),
            min_shutdown_delay: Duration::from_millis(self.min_shutdown_delay_ms),
            heartbeat_grace: Duration::from_millis(self.heartbeat_grace_ms),
            headless_ceiling: Duration::from_secs(self.headless_ceiling_secs),
            headless,
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            launcher: vec!["python".to_string(), "-m".to_string(), "robot".to_string()],
            suite_extension: "robot".to_string(),
            tests_dir_name: "tests".to_string(),
            tags: [
                "regression",
                "apimagazord",
                "e2emagazord",
                "frontendmagazord",
                "arquivosmagazord",
                "mobilemagazord",
                "piramidemagazord",
                "mocksmagazord",
            ]
            .iter()
            .map(|t| t.to_string())
            .collect(),
            regression_tag: "regression".to_string(),
            allowed_suites: Vec::new(),
            run_timeout_secs: None,
            tail_chars: 4000,
            stream_tail_lines: 2000,
            runs_url_prefix: "/static/runs".to_string(),
            watchdog: WatchdogConfig::default(),
        }
    }
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.launcher.is_empty() || self.launcher[0].trim().is_empty() {
            return Err(anyhow!("launcher must be a non-empty array"));
        }
        if self.suite_extension.trim().is_empty() {
            return Err(anyhow!("suite_extension must not be empty"));
        }
        if self.tags.is_empty() {
            return Err(anyhow!("tags must list at least one tag"));
        }
        if let Some(bad) = self.tags.iter().find(|t| normalize_tag(t).is_empty()) {
            return Err(anyhow!("tags contains an empty entry {bad:?}"));
        }
        let regression = normalize_tag(&self.regression_tag);
        if !self.tags.iter().any(|t| normalize_tag(t) == regression) {
            return Err(anyhow!(
                "regression_tag {:?} must be part of tags",
                self.regression_tag
            ));
        }
        for entry in &self.allowed_suites {
            if !is_plain_relative(entry) {
                return Err(anyhow!(
                    "allowed_suites entry {entry:?} must be relative without `..`"
                ));
            }
        }
        if self.run_timeout_secs == Some(0) {
            return Err(anyhow!("run_timeout_secs must be > 0 when set"));
        }
        if self.tail_chars == 0 {
            return Err(anyhow!("tail_chars must be > 0"));
        }
        if self.stream_tail_lines == 0 {
            return Err(anyhow!("stream_tail_lines must be > 0"));
        }
        if self.watchdog.tick_ms == 0 {
            return Err(anyhow!("watchdog.tick_ms must be > 0"));
        }
        Ok(())
    }

    /// Normalized vocabulary.
    pub fn vocabulary(&self) -> Vec<String> {
        self.tags.iter().map(|t| normalize_tag(t)).collect()
    }

    /// Vocabulary offered for manual selection (everything but the regression tag).
    pub fn ui_tags(&self) -> Vec<String> {
        let regression = normalize_tag(&self.regression_tag);
        self.vocabulary()
            .into_iter()
            .filter(|t| *t != regression)
            .collect()
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }

    /// Replace the interpreter with `SUITE_RUNNER_PYTHON` when it names an existing file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(exe) = std::env::var(PYTHON_ENV) {
            self.override_interpreter(&exe);
        }
    }

    fn override_interpreter(&mut self, exe: &str) {
        let exe = exe.trim().trim_matches('"');
        if exe.is_empty() || !Path::new(exe).is_file() {
            debug!(exe, "ignoring interpreter override");
            return;
        }
        info!(exe, "using interpreter override");
        if let Some(first) = self.launcher.first_mut() {
            *first = exe.to_string();
        }
    }
}

fn is_plain_relative(entry: &str) -> bool {
    let path = Path::new(entry);
    !entry.trim().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RunnerConfig::default()`.
pub fn load_config(path: &Path) -> Result<RunnerConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config missing, using defaults");
        let cfg = RunnerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RunnerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RunnerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}
