//! Subscriber setup for the binaries.

use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

/// Default filter directive for a verbosity count.
pub fn level_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Installs the global fmt subscriber. `RUST_LOG` wins over `verbosity`.
/// Calling it twice is harmless.
pub fn init(cfg: &LogConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| level_for(cfg.verbosity).into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(cfg.colored)
        .with_thread_names(true)
        .try_init();
}

/// Test variant: output captured by the test harness.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}
