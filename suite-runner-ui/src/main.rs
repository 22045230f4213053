//! Suite runner UI server - web interface for running allow-listed suites.

mod routes;
mod sse;
mod state;
mod stream;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use axum::Router;
use axum::routing::get;
use clap::Parser;
use suite_runner::core::watchdog::WatchdogVerdict;
use suite_runner::io::config::load_config;
use suite_runner::io::executor::ProcessExecutor;
use suite_runner::lifecycle::Watchdog;
use suite_runner::logging;
use suite_runner::orchestrate::Orchestrator;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::{info, warn};

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "suite-runner-ui")]
#[command(about = "Web UI for running allow-listed test suites")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Preferred port; a free port is picked when it is taken
    #[arg(long, default_value = "8765")]
    port: u16,

    /// Project root containing the suites
    #[arg(long, default_value = ".")]
    project_dir: PathBuf,

    /// Directory holding one sub-directory per run (served under /static/runs)
    #[arg(long, default_value = "runs")]
    runs_dir: PathBuf,

    /// Config file; defaults apply when it does not exist
    #[arg(long, default_value = "suite-runner.toml")]
    config: PathBuf,

    /// Exit when the UI stops sending heartbeats, even without a shutdown request
    #[arg(long)]
    headless: bool,

    /// Directory containing UI static files (defaults to ./ui/dist relative to project)
    #[arg(long)]
    ui_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_with_default(logging::SERVER_FILTER);

    let args = Args::parse();

    let mut config = load_config(&args.config)?;
    config.apply_env_overrides();
    let runs_url_prefix = config.runs_url_prefix.clone();
    let watchdog_settings = config.watchdog.settings(args.headless);
    let tick_interval = config.watchdog.tick_interval();

    std::fs::create_dir_all(&args.runs_dir)
        .with_context(|| format!("create runs dir {}", args.runs_dir.display()))?;
    let runs_dir = args.runs_dir.canonicalize().unwrap_or(args.runs_dir);
    let orchestrator = Orchestrator::new(config, &args.project_dir, &runs_dir, ProcessExecutor)?;
    let project_dir = orchestrator.sandbox().root().to_path_buf();
    info!(project_dir = %project_dir.display(), headless = args.headless, "starting suite-runner-ui");

    let state = AppState::new(
        orchestrator,
        Watchdog::new(watchdog_settings, Instant::now()),
        args.headless,
    );

    sse::start_runs_watcher(state.clone());
    start_watchdog(state.clone(), tick_interval);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut app = Router::new()
        .nest("/api", routes::api_router())
        .route("/events", get(sse::events_handler))
        .nest_service(&runs_url_prefix, ServeDir::new(&runs_dir))
        .layer(cors)
        .with_state(state);

    let ui_dir = args
        .ui_dir
        .unwrap_or_else(|| project_dir.join("ui").join("dist"));

    if ui_dir.exists() {
        info!(ui_dir = %ui_dir.display(), "serving static UI files");
        app = app.fallback_service(ServeDir::new(ui_dir).append_index_html_on_directories(true));
    } else {
        info!(ui_dir = %ui_dir.display(), "UI directory not found, API-only mode");
    }

    let listener = bind_with_fallback(&args.bind, args.port).await?;
    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}

/// Bind the preferred port, or any free port on the same address when it is taken.
async fn bind_with_fallback(bind: &str, port: u16) -> anyhow::Result<TcpListener> {
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    match TcpListener::bind(addr).await {
        Ok(listener) => Ok(listener),
        Err(err) => {
            warn!(addr = %addr, err = %err, "preferred port unavailable, using a free port");
            let fallback = SocketAddr::new(addr.ip(), 0);
            TcpListener::bind(fallback)
                .await
                .with_context(|| format!("bind {fallback}"))
        }
    }
}

/// Tick the watchdog and end the process once it decides to exit.
fn start_watchdog(state: AppState, tick_interval: std::time::Duration) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(tick_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            if let WatchdogVerdict::Exit(reason) = state.watchdog.tick(Instant::now()) {
                info!(?reason, "shutting down");
                std::process::exit(0);
            }
        }
    });
}
