//! Logging setup for embedding applications.
//!
//! The engine itself only emits `tracing` events; hosts that want console
//! output call [`init_tracing`] once at startup.

use tracing_subscriber::{fmt, EnvFilter};

/// Initializes a global tracing subscriber with env-filter support.
///
/// Filter directives come from `RUST_LOG`, falling back to the provided
/// default (e.g. `"recordflow=debug"`). Safe to call more than once; later
/// calls are no-ops.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
