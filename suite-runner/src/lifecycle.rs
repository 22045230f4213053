//! Shared, thread-safe handle over the watchdog state machine.
//!
//! Request handlers call [`Watchdog::heartbeat`] and [`Watchdog::request_shutdown`];
//! a single background task calls [`Watchdog::tick`] on a fixed interval and exits
//! the process when it returns [`WatchdogVerdict::Exit`].

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::core::watchdog::{WatchdogPhase, WatchdogSettings, WatchdogState, WatchdogVerdict};

#[derive(Debug)]
pub struct Watchdog {
    settings: WatchdogSettings,
    state: Mutex<WatchdogState>,
}

impl Watchdog {
    pub fn new(settings: WatchdogSettings, now: Instant) -> Self {
        Self {
            settings,
            state: Mutex::new(WatchdogState::new(now)),
        }
    }

    // The state stays consistent across a panicking holder, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, WatchdogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn heartbeat(&self, now: Instant) {
        let mut state = self.lock();
        if matches!(state.phase(), WatchdogPhase::ShutdownPending { .. }) {
            debug!("heartbeat cancelled pending shutdown");
        }
        state.heartbeat(now);
    }

    /// Arm shutdown with the configured delay.
    pub fn request_shutdown(&self, now: Instant) {
        self.request_shutdown_after(now, self.settings.shutdown_delay);
    }

    pub fn request_shutdown_after(&self, now: Instant, delay: Duration) {
        info!(delay_ms = delay.as_millis() as u64, "shutdown requested");
        self.lock().request_shutdown(now, delay, &self.settings);
    }

    pub fn tick(&self, now: Instant) -> WatchdogVerdict {
        let verdict = self.lock().tick(now, &self.settings);
        if let WatchdogVerdict::Exit(reason) = verdict {
            info!(?reason, "watchdog decided to exit");
        }
        verdict
    }

    pub fn phase(&self) -> WatchdogPhase {
        self.lock().phase()
    }
}
