//! `scantrack-observability` — tracing setup for store binaries and tests.
//!
//! Emits JSON lines to stdout. The filter comes from `RUST_LOG` with an
//! `info` fallback; [`init_with`] takes an explicit directive for callers
//! that cannot rely on the environment (test harnesses, embedded tools).

use tracing_subscriber::EnvFilter;

/// Initialize process-wide tracing, filtered via `RUST_LOG`.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    install(filter);
}

/// Initialize with an explicit filter directive, ignoring `RUST_LOG`.
pub fn init_with(directive: &str) {
    install(EnvFilter::new(directive));
}

fn install(filter: EnvFilter) {
    // try_init: a second subscriber in the same process is rejected, which
    // gives the repeated-call no-op behavior.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}
