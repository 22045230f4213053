//! Execution orchestration for an external test runner.
//!
//! Runs allow-listed suites filtered by a tag, persists each run under its own
//! directory, and exposes the history of past runs. The architecture keeps a
//! strict separation:
//!
//! - **[`core`]**: Pure logic (path normalization, tag parsing, request checks,
//!   command construction, the watchdog state machine). No I/O.
//! - **[`io`]**: Side effects (path sandbox, suite discovery, child processes,
//!   the run registry, configuration).
//!
//! [`orchestrate`] coordinates the two for the CLI and the UI server, and
//! [`lifecycle`] wraps the watchdog for concurrent use.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod lifecycle;
pub mod logging;
pub mod orchestrate;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use error::RunError;
