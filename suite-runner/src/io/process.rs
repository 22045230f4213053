//! Helpers for running the external test runner as a child process.
//!
//! Two shapes over the same launch parameters: [`run_to_completion`] blocks and
//! captures everything, [`LineStream`] yields decoded lines as they arrive. Both
//! always reap the child before finishing, and neither lets a spawn failure or an
//! undecodable byte escape as a panic.

use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::decode::{decode_line, decode_output};
use crate::error::RunError;

/// Exit code reported when the child could not be started or ended without one.
pub const SPAWN_FAILURE_CODE: i32 = 1;
const SIGNALED_CODE: i32 = -1;
/// How long output readers may keep draining after the child has been reaped.
pub const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Captured, decoded child process output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

fn build_command(cmd: &[String], cwd: &Path) -> Result<Command, RunError> {
    let (program, args) = cmd
        .split_first()
        .ok_or_else(|| RunError::Internal(anyhow!("empty command")))?;
    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    Ok(command)
}

fn spawn(cmd: &[String], cwd: &Path) -> Result<Child, RunError> {
    let mut command = build_command(cmd, cwd)?;
    debug!("spawning child process");
    command.spawn().map_err(|source| {
        error!(program = %cmd[0], err = %source, "failed to spawn command");
        RunError::SpawnFailure {
            program: cmd[0].clone(),
            source,
        }
    })
}

fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(SIGNALED_CODE)
}

/// Run `cmd` in `cwd` until it exits, capturing stdout and stderr.
///
/// Output is read concurrently while the child runs so neither pipe can fill up and
/// deadlock it. With a `timeout`, an overrunning child is killed and reaped and the
/// output captured so far comes back inside [`RunError::Timeout`].
///
/// Once the child is reaped, output is drained for at most [`OUTPUT_DRAIN_GRACE`].
/// A grandchild still holding the pipes past that point is left behind and its
/// later output is not captured.
#[instrument(skip_all, fields(program = cmd.first().map(String::as_str), timeout_secs = timeout.map(|t| t.as_secs())))]
pub fn run_to_completion(
    cmd: &[String],
    cwd: &Path,
    timeout: Option<Duration>,
) -> Result<CommandOutput, RunError> {
    let mut child = spawn(cmd, cwd)?;

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        kill_and_reap(&mut child);
        return Err(anyhow!("child output was not piped").into());
    };
    let (done_tx, done_rx) = mpsc::channel();
    let stdout = capture_output(stdout, done_tx.clone(), "stdout");
    let stderr = capture_output(stderr, done_tx, "stderr");

    let waited = match timeout {
        Some(limit) => child.wait_timeout(limit),
        None => child.wait().map(Some),
    };
    let status = match waited {
        Ok(status) => status,
        Err(err) => {
            kill_and_reap(&mut child);
            return Err(anyhow::Error::new(err).context("wait for command").into());
        }
    };
    if status.is_none() {
        warn!(
            timeout_secs = timeout.map(|t| t.as_secs()),
            "command timed out, killing"
        );
        kill_and_reap(&mut child);
    }

    await_readers(&done_rx, 2);
    let stdout = decode_output(&take_captured(&stdout)).into_owned();
    let stderr = decode_output(&take_captured(&stderr)).into_owned();

    let Some(status) = status else {
        return Err(RunError::Timeout {
            timeout: timeout.unwrap_or_default(),
            stdout,
            stderr,
        });
    };

    let exit_code = exit_code(status);
    debug!(exit_code, "command finished");
    Ok(CommandOutput {
        exit_code,
        stdout,
        stderr,
    })
}

type Captured = Arc<Mutex<Vec<u8>>>;

/// Kill `child` if it is still running, then reap it. Failures are logged.
fn kill_and_reap(child: &mut Child) {
    if let Err(err) = child.kill() {
        debug!(err = %err, "kill failed; child already exited");
    }
    if let Err(err) = child.wait() {
        error!(err = %err, "failed to reap child");
    }
}

/// Read `reader` to its end on a background thread, appending into the returned
/// buffer as chunks arrive. A unit is sent on `done` when the reader stops.
fn capture_output<R: Read + Send + 'static>(
    mut reader: R,
    done: Sender<()>,
    label: &'static str,
) -> Captured {
    let captured: Captured = Arc::default();
    let sink = Arc::clone(&captured);
    thread::spawn(move || {
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => sink
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend_from_slice(&chunk[..n]),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    warn!(stream = label, err = %err, "failed to read child output");
                    break;
                }
            }
        }
        let _ = done.send(());
    });
    captured
}

/// Wait for `readers` completion signals, giving up after [`OUTPUT_DRAIN_GRACE`].
fn await_readers(done: &Receiver<()>, readers: usize) {
    let deadline = Instant::now() + OUTPUT_DRAIN_GRACE;
    for _ in 0..readers {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if done.recv_timeout(remaining).is_err() {
            warn!("output still open after child exited; returning captured output");
            return;
        }
    }
}

fn take_captured(captured: &Captured) -> Vec<u8> {
    std::mem::take(&mut *captured.lock().unwrap_or_else(PoisonError::into_inner))
}

/// Lazily produced output lines of a running child, stdout and stderr merged.
///
/// Each descriptor is read on its own thread up to line boundaries, so lines keep
/// their order within a descriptor while the two interleave as they arrive. The
/// sequence ends once both descriptors close and the child has been reaped; the
/// exit code is then available from [`LineStream::exit_code`].
///
/// Dropping the stream early kills and reaps the child.
pub struct LineStream {
    child: Option<Child>,
    lines: Option<Receiver<Vec<u8>>>,
    pending: VecDeque<String>,
    exit_code: Option<i32>,
    finished: bool,
}

impl LineStream {
    /// Spawn `cmd` in `cwd`. A spawn failure becomes a one-line stream ending in code 1.
    #[instrument(skip_all, fields(program = cmd.first().map(String::as_str)))]
    pub fn spawn(cmd: &[String], cwd: &Path) -> Self {
        let mut child = match spawn(cmd, cwd) {
            Ok(child) => child,
            Err(err) => return Self::from_lines([format!("error: {err}")], SPAWN_FAILURE_CODE),
        };

        let (tx, rx) = mpsc::channel();
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, tx.clone(), "stdout");
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, tx, "stderr");
        }

        Self {
            child: Some(child),
            lines: Some(rx),
            pending: VecDeque::new(),
            exit_code: None,
            finished: false,
        }
    }

    /// A stream of fixed lines ending with `exit_code`, without a child process.
    pub fn from_lines<I, S>(lines: I, exit_code: i32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            child: None,
            lines: None,
            pending: lines.into_iter().map(Into::into).collect(),
            exit_code: Some(exit_code),
            finished: false,
        }
    }

    /// Exit code, available once the sequence has ended.
    pub fn exit_code(&self) -> Option<i32> {
        if self.finished { self.exit_code } else { None }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// End the stream and return the exit code.
    ///
    /// If lines remain unread, the child is killed first; it is always reaped.
    pub fn wait(&mut self) -> i32 {
        if !self.finished {
            if self.lines.is_some() {
                debug!("stream abandoned before end of output");
            }
            self.pending.clear();
            self.lines = None;
            self.reap(true);
            self.finished = true;
        }
        self.exit_code.unwrap_or(SIGNALED_CODE)
    }

    fn reap(&mut self, kill: bool) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        if kill && matches!(child.try_wait(), Ok(None)) {
            if let Err(err) = child.kill() {
                warn!(err = %err, "failed to kill child");
            }
        }
        match child.wait() {
            Ok(status) => {
                let code = exit_code(status);
                debug!(exit_code = code, "streamed command finished");
                self.exit_code = Some(code);
            }
            Err(err) => {
                error!(err = %err, "failed to wait for child");
                self.exit_code = Some(SIGNALED_CODE);
            }
        }
    }
}

impl Iterator for LineStream {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if let Some(line) = self.pending.pop_front() {
            return Some(line);
        }
        if self.finished {
            return None;
        }
        let received = self.lines.as_ref().map(|rx| rx.recv());
        match received {
            Some(Ok(bytes)) => Some(decode_line(&bytes)),
            // Both readers hung up: output is closed, reap the child.
            Some(Err(_)) | None => {
                self.lines = None;
                self.reap(false);
                self.finished = true;
                None
            }
        }
    }
}

impl Drop for LineStream {
    fn drop(&mut self) {
        if self.child.is_some() {
            self.wait();
        }
    }
}

fn forward_lines<R: Read + Send + 'static>(reader: R, tx: Sender<Vec<u8>>, label: &'static str) {
    thread::spawn(move || {
        let mut reader = BufReader::new(reader);
        loop {
            let mut line = Vec::new();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) => break,
                Ok(_) => {
                    if tx.send(line).is_err() {
                        // Consumer is gone; dropping the pipe lets the child see EPIPE.
                        break;
                    }
                }
                Err(err) => {
                    warn!(stream = label, err = %err, "failed to read child output");
                    break;
                }
            }
        }
    });
}
