//! Logging bootstrap for client-side tools.
//!
//! The library itself only emits `tracing` events and never installs a
//! subscriber; short-lived consumers (CLI scripts, the bundled demos) call
//! [`init`] once at startup to get those events on stderr.
//!
//! # Example
//!
//! ```rust,no_run
//! fn main() {
//!     cohort_client::logging::init();
//!     tracing::info!("connecting to cohortd");
//! }
//! ```

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Install a stderr subscriber honoring `RUST_LOG` (default level `info`).
///
/// Calling it more than once, or alongside a subscriber installed by the
/// host program, is a no-op rather than an error.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .compact(),
        )
        .try_init()
        .ok();
}
