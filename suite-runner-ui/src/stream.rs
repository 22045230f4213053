//! Plain-text streaming of a run's output to an HTTP client.
//!
//! The response body is, in order:
//!
//! ```text
//! RUN_ID: <run id>
//! Command: <runner command>
//!
//! <output lines...>
//!
//! __META__=<RunOutcome json>
//!
//! __END__=ok:<true|false> rc:<exit code>
//! ```

use std::convert::Infallible;

use axum::body::Body;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use suite_runner::error::RunError;
use suite_runner::io::executor::ProcessExecutor;
use suite_runner::orchestrate::{Orchestrator, StreamingRun};
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::routes::{ApiError, blocking};
use crate::state::AppState;

/// Chunks buffered between the runner and a slow client.
const STREAM_BUFFER: usize = 256;

/// Start a streamed run and respond with its output as it is produced.
///
/// Validation errors surface as regular JSON errors before any byte is streamed.
pub async fn stream_run<F>(state: &AppState, start: F) -> Result<Response, ApiError>
where
    F: FnOnce(&Orchestrator<ProcessExecutor>) -> Result<StreamingRun, RunError> + Send + 'static,
{
    let run = blocking(state, start).await?;
    let (tx, mut rx) = mpsc::channel::<String>(STREAM_BUFFER);
    tokio::task::spawn_blocking(move || forward(run, &tx));

    let body = async_stream::stream! {
        while let Some(chunk) = rx.recv().await {
            yield Ok::<_, Infallible>(chunk);
        }
    };
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(body),
    )
        .into_response())
}

/// Pump lines from `run` into `tx`, then finish the run and send the trailer.
///
/// A closed channel means the client went away: reading stops and `finish`
/// kills and reaps the runner.
pub(crate) fn forward(mut run: StreamingRun, tx: &mpsc::Sender<String>) {
    let run_id = run.run_id().to_string();
    let header = format!("RUN_ID: {run_id}\nCommand: {}\n\n", run.cmd().join(" "));
    let mut connected = tx.blocking_send(header).is_ok();
    while connected {
        let Some(line) = run.next() else {
            break;
        };
        connected = tx.blocking_send(format!("{line}\n")).is_ok();
    }
    if !connected {
        info!(run_id = %run_id, "client disconnected, stopping runner");
    }

    let trailer = match run.finish() {
        Ok(outcome) => {
            let meta = serde_json::to_string(&outcome).unwrap_or_else(|err| {
                error!(run_id = %run_id, err = %err, "failed to serialize outcome");
                "{}".to_string()
            });
            format!(
                "\n__META__={meta}\n\n__END__=ok:{} rc:{}\n",
                outcome.succeeded(),
                outcome.returncode
            )
        }
        Err(err) => {
            error!(run_id = %run_id, err = %err, "failed to finish streamed run");
            format!("\nerror: {err}\n\n__END__=ok:false rc:1\n")
        }
    };
    let _ = tx.blocking_send(trailer);
}
