//! Command-line front end for running allow-listed test suites.
//!
//! Every command prints machine-readable output on stdout (JSON unless noted) and
//! reports through the stable codes in [`suite_runner::exit_codes`].

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use suite_runner::core::request::RunRequest;
use suite_runner::core::types::RunOutcome;
use suite_runner::error::RunError;
use suite_runner::exit_codes;
use suite_runner::io::config::load_config;
use suite_runner::io::executor::ProcessExecutor;
use suite_runner::logging;
use suite_runner::orchestrate::{Orchestrator, StreamingRun};
use tracing::{debug, warn};

#[derive(Parser)]
#[command(
    name = "suite-runner",
    version,
    about = "Run allow-listed test suites filtered by tag"
)]
struct Cli {
    /// Project root containing the suites.
    #[arg(long, global = true, default_value = ".")]
    project_dir: PathBuf,

    /// Directory holding one sub-directory per run.
    #[arg(long, global = true, default_value = "runs")]
    runs_dir: PathBuf,

    /// Config file; defaults apply when it does not exist.
    #[arg(long, global = true, default_value = "suite-runner.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the tags declared by a suite file, one per line.
    Tags { path: String },
    /// Exit 0 when the path is allow-listed and exists, 1 otherwise.
    Check { path: String },
    /// Run one allow-listed suite with a tag.
    Run {
        #[arg(long)]
        path: String,
        #[arg(long)]
        tag: String,
        /// Print runner output line by line while it runs.
        #[arg(long)]
        stream: bool,
    },
    /// Run every suite under the project root with the regression tag.
    Regression {
        #[arg(long)]
        stream: bool,
        /// Only print how many suites the regression run would pick up.
        #[arg(long, conflicts_with = "stream")]
        count: bool,
    },
    /// List past runs, newest first.
    Runs,
    /// Delete every past run.
    Clear,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    available_tags: Option<&'a [String]>,
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let mut config = load_config(&cli.config)?;
    config.apply_env_overrides();
    let orchestrator = Orchestrator::new(config, &cli.project_dir, &cli.runs_dir, ProcessExecutor)?;

    match cli.command {
        Command::Tags { path } => match orchestrator.suite_tags(&path) {
            Ok(tags) => {
                for tag in tags {
                    println!("{tag}");
                }
                Ok(exit_codes::OK)
            }
            Err(err) => Ok(report_error(&err)),
        },
        Command::Check { path } => {
            let runnable = orchestrator.is_runnable(&path);
            print_json(&serde_json::json!({ "path": path, "runnable": runnable }))?;
            Ok(if runnable {
                exit_codes::OK
            } else {
                exit_codes::INVALID
            })
        }
        Command::Run { path, tag, stream } => {
            let request = RunRequest::new(path, tag);
            if stream {
                finish_stream(orchestrator.start_stream(&request))
            } else {
                finish_blocking(orchestrator.run(&request))
            }
        }
        Command::Regression { count: true, .. } => {
            let count = orchestrator.regression_suite_count();
            print_json(&serde_json::json!({ "count": count }))?;
            Ok(exit_codes::OK)
        }
        Command::Regression { stream, .. } => {
            if stream {
                finish_stream(orchestrator.stream_regression())
            } else {
                finish_blocking(orchestrator.run_regression())
            }
        }
        Command::Runs => {
            let runs = orchestrator.list_runs()?;
            print_json(&serde_json::json!({ "runs": runs }))?;
            Ok(exit_codes::OK)
        }
        Command::Clear => {
            let removed = orchestrator.clear_runs()?;
            print_json(&serde_json::json!({ "ok": true, "removed": removed }))?;
            Ok(exit_codes::OK)
        }
    }
}

fn finish_blocking(result: Result<RunOutcome, RunError>) -> Result<i32> {
    match result {
        Ok(outcome) => {
            print_json(&outcome)?;
            Ok(outcome_code(&outcome))
        }
        Err(err) => Ok(report_error(&err)),
    }
}

fn finish_stream(started: Result<StreamingRun, RunError>) -> Result<i32> {
    let mut run = match started {
        Ok(run) => run,
        Err(err) => return Ok(report_error(&err)),
    };
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "RUN_ID: {}", run.run_id()).context("write stdout")?;
    writeln!(out, "Command: {}", run.cmd().join(" ")).context("write stdout")?;
    for line in run.by_ref() {
        writeln!(out, "{line}").context("write stdout")?;
    }
    drop(out);

    match run.finish() {
        Ok(outcome) => {
            print_json(&outcome)?;
            Ok(outcome_code(&outcome))
        }
        Err(err) => Ok(report_error(&err)),
    }
}

fn outcome_code(outcome: &RunOutcome) -> i32 {
    if outcome.succeeded() {
        exit_codes::OK
    } else {
        exit_codes::RUN_FAILED
    }
}

/// Print the error as JSON on stdout and map it to an exit code.
fn report_error(err: &RunError) -> i32 {
    if err.is_rejection() {
        debug!(kind = err.kind(), err = %err, "request rejected");
    } else {
        warn!(kind = err.kind(), err = %err, "run failed");
    }
    let available_tags = match err {
        RunError::TagNotPermitted { available, .. } => Some(available.as_slice()),
        _ => None,
    };
    let body = ErrorBody {
        error: err.kind(),
        message: err.to_string(),
        available_tags,
    };
    if let Err(print_err) = print_json(&body) {
        eprintln!("{:#}", print_err);
    }
    match err {
        RunError::Timeout { .. } => exit_codes::TIMEOUT,
        _ => exit_codes::INVALID,
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{json}");
    Ok(())
}
