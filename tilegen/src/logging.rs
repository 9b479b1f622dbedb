//! Logging initialization using `tracing` and `tracing-subscriber`.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber: compact single-line output, filtered by
/// `RUST_LOG` (default `info`).
pub fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(env_filter)
        .init();
}
