//! Stable exit codes for suite-runner CLI commands.

/// Command succeeded; for runs, the runner exited 0.
pub const OK: i32 = 0;
/// Request rejected, invalid config, or another error before the runner finished.
pub const INVALID: i32 = 1;
/// The runner ran and exited nonzero.
pub const RUN_FAILED: i32 = 2;
/// The runner was killed after exceeding the run timeout.
pub const TIMEOUT: i32 = 3;
