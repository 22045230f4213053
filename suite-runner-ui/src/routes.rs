//! HTTP route handlers for the UI API.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use suite_runner::core::request::RunRequest;
use suite_runner::core::types::RunOutcome;
use suite_runner::error::RunError;
use suite_runner::io::browse::DirListing;
use suite_runner::io::executor::ProcessExecutor;
use suite_runner::orchestrate::Orchestrator;
use tracing::{error, warn};

use crate::state::AppState;
use crate::stream::stream_run;

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/tags", get(tags))
        .route("/is_frozen", get(is_frozen))
        .route("/alive", post(alive))
        .route("/shutdown", post(shutdown))
        .route("/tree", get(tree))
        .route("/has_robot", get(has_robot))
        .route("/robot_tags", get(robot_tags))
        .route("/run", post(run))
        .route("/run_stream", post(run_stream))
        .route("/run_regression_all", post(run_regression_all))
        .route("/run_regression_all_stream", post(run_regression_all_stream))
        .route("/regression_count", get(regression_count))
        .route("/runs", get(runs))
        .route("/clear_runs", post(clear_runs))
}

/// A [`RunError`] rendered as `{error, message, available_tags?}` with a mapped status.
#[derive(Debug)]
pub struct ApiError(pub RunError);

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    available_tags: Option<&'a [String]>,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            RunError::TargetNotFound { .. } => StatusCode::NOT_FOUND,
            RunError::InvalidPath { .. }
            | RunError::NotAllowed { .. }
            | RunError::NoRunnableSuite { .. }
            | RunError::TagNotPermitted { .. } => StatusCode::BAD_REQUEST,
            RunError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            RunError::SpawnFailure { .. }
            | RunError::PartialMetadataCorruption { .. }
            | RunError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<RunError> for ApiError {
    fn from(err: RunError) -> Self {
        Self(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self(RunError::Internal(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if self.0.is_rejection() {
            warn!(kind = self.0.kind(), err = %self.0, "request rejected");
        } else {
            error!(kind = self.0.kind(), err = %self.0, "request failed");
        }
        let available_tags = match &self.0 {
            RunError::TagNotPermitted { available, .. } => Some(available.as_slice()),
            _ => None,
        };
        let body = ErrorBody {
            error: self.0.kind(),
            message: self.0.to_string(),
            available_tags,
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Run blocking orchestrator work off the async executor.
pub(crate) async fn blocking<T, F>(state: &AppState, work: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Orchestrator<ProcessExecutor>) -> Result<T, RunError> + Send + 'static,
{
    let orchestrator = state.orchestrator.clone();
    let result = tokio::task::spawn_blocking(move || work(&orchestrator))
        .await
        .context("join blocking task")?;
    Ok(result?)
}

#[derive(Debug, Deserialize)]
struct PathQuery {
    #[serde(default)]
    path: String,
}

/// Parse a run request body leniently; anything unreadable is an empty request.
fn parse_request(body: &Bytes) -> RunRequest {
    serde_json::from_slice(body).unwrap_or_else(|_| RunRequest::new("", ""))
}

async fn health() -> &'static str {
    "ok"
}

/// GET /api/tags - tags offered for manual selection.
async fn tags(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "tags": state.orchestrator.config().ui_tags() }))
}

/// GET /api/is_frozen - whether the server runs headless.
async fn is_frozen(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "frozen": state.headless }))
}

/// POST /api/alive - heartbeat; cancels a pending shutdown.
async fn alive(State(state): State<AppState>) -> Json<Value> {
    state.watchdog.heartbeat(Instant::now());
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default();
    Json(json!({ "ok": true, "ts": ts }))
}

/// POST /api/shutdown - arm a delayed shutdown.
async fn shutdown(State(state): State<AppState>) -> Json<Value> {
    state.watchdog.request_shutdown(Instant::now());
    Json(json!({ "ok": true }))
}

/// GET /api/tree?path= - list one project directory.
async fn tree(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> ApiResult<DirListing> {
    let rel = match query.path.trim() {
        "." => String::new(),
        other => other.to_string(),
    };
    let listing = blocking(&state, move |o| o.list_dir(&rel)).await?;
    Ok(Json(listing))
}

/// GET /api/has_robot?path= - whether the run button should be enabled.
async fn has_robot(State(state): State<AppState>, Query(query): Query<PathQuery>) -> Json<Value> {
    let runnable = !query.path.trim().is_empty() && state.orchestrator.is_runnable(&query.path);
    Json(json!({ "has_robot": runnable }))
}

/// GET /api/robot_tags?path= - tags declared by a suite file.
async fn robot_tags(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> ApiResult<Value> {
    let rel = query.path.trim().to_string();
    if rel.is_empty() {
        return Err(RunError::InvalidPath { path: rel }.into());
    }
    let tags = blocking(&state, move |o| o.suite_tags(&rel)).await?;
    Ok(Json(json!({ "ok": true, "tags": tags })))
}

/// POST /api/run - run one suite and wait for it.
async fn run(State(state): State<AppState>, body: Bytes) -> ApiResult<RunOutcome> {
    let request = parse_request(&body);
    let outcome = blocking(&state, move |o| o.run(&request)).await?;
    Ok(Json(outcome))
}

/// POST /api/run_stream - run one suite, streaming plain-text output.
async fn run_stream(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let request = parse_request(&body);
    stream_run(&state, move |o| o.start_stream(&request)).await
}

/// POST /api/run_regression_all - run every suite with the regression tag.
async fn run_regression_all(State(state): State<AppState>) -> ApiResult<RunOutcome> {
    let outcome = blocking(&state, |o| o.run_regression()).await?;
    Ok(Json(outcome))
}

/// POST /api/run_regression_all_stream
async fn run_regression_all_stream(State(state): State<AppState>) -> Result<Response, ApiError> {
    stream_run(&state, |o| o.stream_regression()).await
}

/// GET /api/regression_count - suites the regression run would pick up.
async fn regression_count(State(state): State<AppState>) -> ApiResult<Value> {
    let count = blocking(&state, |o| Ok(o.regression_suite_count())).await?;
    Ok(Json(json!({ "count": count })))
}

/// GET /api/runs - past runs, newest first.
async fn runs(State(state): State<AppState>) -> ApiResult<Value> {
    let runs = blocking(&state, |o| Ok(o.list_runs()?)).await?;
    Ok(Json(json!({ "runs": runs })))
}

/// POST /api/clear_runs
async fn clear_runs(State(state): State<AppState>) -> ApiResult<Value> {
    let removed = blocking(&state, |o| Ok(o.clear_runs()?)).await?;
    Ok(Json(json!({ "ok": true, "removed": removed })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn error_statuses_follow_kinds() {
        let cases = [
            (
                RunError::NotAllowed {
                    path: "x".to_string(),
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                RunError::TargetNotFound {
                    path: "x".to_string(),
                },
                StatusCode::NOT_FOUND,
            ),
            (
                RunError::Timeout {
                    timeout: Duration::from_secs(1),
                    stdout: String::new(),
                    stderr: String::new(),
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                RunError::Internal(anyhow::anyhow!("boom")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }

    #[test]
    fn rejections_are_exactly_the_client_errors() {
        let errors = [
            RunError::InvalidPath {
                path: "..".to_string(),
            },
            RunError::TargetNotFound {
                path: "x".to_string(),
            },
            RunError::NoRunnableSuite {
                path: "x".to_string(),
            },
            RunError::TagNotPermitted {
                tag: "smoke2".to_string(),
                path: "x".to_string(),
                available: Vec::new(),
            },
            RunError::PartialMetadataCorruption {
                run_id: "r1".to_string(),
                reason: "truncated".to_string(),
            },
            RunError::Internal(anyhow::anyhow!("boom")),
        ];
        for err in errors {
            let rejection = err.is_rejection();
            let kind = err.kind();
            assert_eq!(rejection, ApiError(err).status().is_client_error(), "{kind}");
        }
    }

    #[test]
    fn lenient_request_parsing() {
        let request = parse_request(&Bytes::from_static(
            br#"{"path": "parte1/tests/a.robot", "tag": "ApiMagazord"}"#,
        ));
        assert_eq!(request.normalized_tag(), "apimagazord");

        let request = parse_request(&Bytes::from_static(b"not json"));
        assert_eq!(request, RunRequest::new("", ""));

        let request = parse_request(&Bytes::from_static(b"{}"));
        assert_eq!(request, RunRequest::new("", ""));
    }
}
