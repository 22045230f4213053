//! Heartbeat/shutdown state machine that decides when the server should exit.
//!
//! The UI sends heartbeats while open and a shutdown request when it closes. A
//! shutdown only takes effect after a grace delay with no heartbeat, so a page
//! reload cancels it. In headless mode a long heartbeat silence also ends the
//! process, covering a UI that vanished without requesting shutdown.
//!
//! All operations take `now` explicitly; the caller owns the clock.

use std::time::{Duration, Instant};

/// Timing parameters for the watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogSettings {
    /// Delay between a shutdown request and its deadline.
    pub shutdown_delay: Duration,
    /// Floor applied to any requested delay.
    pub min_shutdown_delay: Duration,
    /// A heartbeat this recent keeps the process alive past the deadline.
    pub heartbeat_grace: Duration,
    /// Heartbeat silence after which a headless process exits regardless.
    pub headless_ceiling: Duration,
    /// Whether the process runs without an attended console.
    pub headless: bool,
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            shutdown_delay: Duration::from_millis(2500),
            min_shutdown_delay: Duration::from_millis(500),
            heartbeat_grace: Duration::from_millis(1200),
            headless_ceiling: Duration::from_secs(35),
            headless: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogPhase {
    Idle,
    ShutdownPending { deadline: Instant },
    Exited,
}

/// Why the watchdog decided to end the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// A shutdown request reached its deadline with no heartbeat in the grace window.
    ShutdownRequested,
    /// Headless mode and no heartbeat within the ceiling.
    HeartbeatLost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogVerdict {
    Continue,
    Exit(ExitReason),
}

#[derive(Debug, Clone)]
pub struct WatchdogState {
    last_heartbeat: Instant,
    phase: WatchdogPhase,
}

impl WatchdogState {
    /// Start idle, treating process start as the first heartbeat.
    pub fn new(now: Instant) -> Self {
        Self {
            last_heartbeat: now,
            phase: WatchdogPhase::Idle,
        }
    }

    pub fn phase(&self) -> WatchdogPhase {
        self.phase
    }

    pub fn last_heartbeat(&self) -> Instant {
        self.last_heartbeat
    }

    /// Record liveness and cancel any pending shutdown.
    pub fn heartbeat(&mut self, now: Instant) {
        if self.phase == WatchdogPhase::Exited {
            return;
        }
        self.last_heartbeat = now;
        self.phase = WatchdogPhase::Idle;
    }

    /// Arm a shutdown deadline `delay` from now (never less than the configured floor).
    pub fn request_shutdown(&mut self, now: Instant, delay: Duration, settings: &WatchdogSettings) {
        if self.phase == WatchdogPhase::Exited {
            return;
        }
        let deadline = now + delay.max(settings.min_shutdown_delay);
        self.phase = WatchdogPhase::ShutdownPending { deadline };
    }

    /// Advance the state machine. `Exit` is returned once; the phase then stays `Exited`.
    pub fn tick(&mut self, now: Instant, settings: &WatchdogSettings) -> WatchdogVerdict {
        let silence = now.saturating_duration_since(self.last_heartbeat);
        let verdict = match self.phase {
            WatchdogPhase::Exited => return WatchdogVerdict::Continue,
            WatchdogPhase::ShutdownPending { deadline }
                if now >= deadline && silence > settings.heartbeat_grace =>
            {
                WatchdogVerdict::Exit(ExitReason::ShutdownRequested)
            }
            _ if settings.headless && silence > settings.headless_ceiling => {
                WatchdogVerdict::Exit(ExitReason::HeartbeatLost)
            }
            _ => WatchdogVerdict::Continue,
        };
        if matches!(verdict, WatchdogVerdict::Exit(_)) {
            self.phase = WatchdogPhase::Exited;
        }
        verdict
    }
}
