//! Tracing initialization

use crate::config::{LogFormat, LoggingConfig};
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the global tracing subscriber.
///
/// RUST_LOG takes precedence over the configured level so operators can
/// override per-module filtering without redeploying.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_lowercase()));

    match config.format {
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_current_span(false)
                .init();
        }
        LogFormat::Plain => {
            fmt().with_env_filter(filter).with_target(true).init();
        }
    }
}
