//! Logging setup
//!
//! `RUST_LOG` takes precedence over the configured level so a single run can
//! be traced without editing the config file.

use crate::config::LogLevel;
use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber, writing to stderr
///
/// Calling this more than once is harmless; later calls leave the first
/// subscriber in place.
pub fn init(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
