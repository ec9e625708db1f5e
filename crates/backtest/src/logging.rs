//! Logging initialization for backtest runs.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber, honoring `RUST_LOG` when set
/// and falling back to the engine config `log_level` otherwise.
///
/// Safe to call more than once; subsequent calls are no-ops.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_logging("debug");
        init_logging("info");
    }
}
