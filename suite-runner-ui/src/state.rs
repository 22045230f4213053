//! Shared application state for the UI server.

use std::path::Path;
use std::sync::Arc;

use suite_runner::io::executor::ProcessExecutor;
use suite_runner::lifecycle::Watchdog;
use suite_runner::orchestrate::Orchestrator;
use tokio::sync::broadcast;

/// Events broadcast to SSE clients when the runs directory changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// A new run directory appeared.
    RunAdded { run_id: String },
    /// A run's `result.json` was written.
    RunCompleted { run_id: String },
}

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator<ProcessExecutor>>,
    pub watchdog: Arc<Watchdog>,
    /// Broadcast sender for run change events.
    pub event_tx: Arc<broadcast::Sender<ChangeEvent>>,
    /// Running without an attended console; reported by `/api/is_frozen`.
    pub headless: bool,
}

impl AppState {
    pub fn new(
        orchestrator: Orchestrator<ProcessExecutor>,
        watchdog: Watchdog,
        headless: bool,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            orchestrator: Arc::new(orchestrator),
            watchdog: Arc::new(watchdog),
            event_tx: Arc::new(event_tx),
            headless,
        }
    }

    pub fn runs_dir(&self) -> &Path {
        self.orchestrator.registry().runs_dir()
    }
}
