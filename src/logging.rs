//! Tracing setup for binaries and tests.
//!
//! The library itself never installs a global subscriber; callers (or this
//! crate's own tests and benches) opt in explicitly.

use tracing_subscriber::EnvFilter;

/// Installs a `tracing-subscriber` formatter driven by `RUST_LOG`, defaulting
/// to `info` when unset. Safe to call more than once; subsequent calls are
/// no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
