//! Diagnostic tracing to stderr.
//!
//! `RUST_LOG` wins over the configured `log_level` directive. Output is compact
//! and never mixed into the JSON printed on stdout.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the global subscriber with `default_directive` as fallback filter.
///
/// ```bash
/// RUST_LOG=sensemaker=debug sensemaker replay session.json
/// ```
pub fn init(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    // A second init (tests spawning several sessions) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
