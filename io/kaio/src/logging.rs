//! Structured logging initialization.
//!
//! The RUST_LOG environment variable takes precedence over the configured level.

use crate::config::{LogFormat, LoggingConfig};
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

/// Install the global tracing subscriber.
///
/// Fails if a global subscriber is already set.
///
/// # Example
///
/// ```ignore
/// use kaio::config::LoggingConfig;
///
/// kaio::logging::init(&LoggingConfig::default())?;
/// tracing::info!("starting");
/// ```
pub fn init(config: &LoggingConfig) -> Result<(), TryInitError> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(config.level.as_str())
    };

    tracing_subscriber::registry()
        .with(layer(config).with_filter(filter))
        .try_init()
}

fn layer(config: &LoggingConfig) -> Box<dyn Layer<Registry> + Send + Sync> {
    let base = fmt::layer()
        .with_target(config.target)
        .with_thread_names(config.thread_names);

    match (config.format, config.timestamps) {
        (LogFormat::Pretty, true) => base.with_ansi(true).boxed(),
        (LogFormat::Pretty, false) => base.with_ansi(true).without_time().boxed(),
        (LogFormat::Json, true) => base.json().boxed(),
        (LogFormat::Json, false) => base.json().without_time().boxed(),
        (LogFormat::Compact, true) => base.compact().with_ansi(true).boxed(),
        (LogFormat::Compact, false) => base.compact().with_ansi(true).without_time().boxed(),
    }
}
