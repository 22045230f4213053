//! Development-time tracing for the suite runner binaries.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: Diagnostics via `RUST_LOG`, output to stderr.
//!   Not persisted, not part of any run's output.
//!
//! - **Run records (`io/registry`)**: Console output and `result.json` under the
//!   runs directory. Always written, unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used by the CLI when `RUST_LOG` is unset. Stdout carries JSON, so stay quiet.
pub const CLI_FILTER: &str = "warn";

/// Filter used by the UI server when `RUST_LOG` is unset.
pub const SERVER_FILTER: &str = "warn,suite_runner=info,suite_runner_ui=info";

/// Initialize tracing for the CLI.
///
/// # Example
/// ```bash
/// RUST_LOG=suite_runner=debug suite-runner run --path a/tests/a.robot --tag smoke
/// ```
pub fn init() {
    init_with_default(CLI_FILTER);
}

/// Install a stderr subscriber reading `RUST_LOG`, falling back to `default`.
///
/// A second call is a no-op.
pub fn init_with_default(default: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
