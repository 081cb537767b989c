//! # Logging
//!
//! `tracing` subscriber setup: console output always, plus a daily rotated
//! file when a log directory is configured. `RUST_LOG` overrides the
//! configured level.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{BridgeError, Result};

/// File name prefix for rotated log files
pub const LOG_FILE_PREFIX: &str = "telemetry-bridge.log";

/// Flush guards; keep alive until the process exits
#[must_use = "dropping the guards stops log output"]
pub struct LogGuards {
    _guards: Vec<WorkerGuard>,
}

/// Filter from `RUST_LOG`, else the configured level
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Install the global subscriber
///
/// # Errors
///
/// `Logging` if a global subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<LogGuards> {
    let mut guards = Vec::new();

    let (stdout, guard) = tracing_appender::non_blocking(std::io::stdout());
    guards.push(guard);
    let console = fmt::layer().with_target(true).with_writer(stdout);

    let file = if config.directory.is_empty() {
        None
    } else {
        let appender = tracing_appender::rolling::daily(&config.directory, LOG_FILE_PREFIX);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        guards.push(guard);
        Some(fmt::layer().with_ansi(false).with_writer(writer))
    };

    tracing_subscriber::registry()
        .with(env_filter(config))
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| BridgeError::Logging(e.to_string()))?;

    Ok(LogGuards { _guards: guards })
}
