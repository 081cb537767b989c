//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every section and key is optional; missing values fall back to the
//! defaults below, so an empty file (or no file at all) is a valid setup
//! listening for a MAVLink simulator on UDP 14550.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::decode::line::DEFAULT_LINE_MARKER;
use crate::error::{BridgeError, Result};

/// Standard serial baud rates accepted for the tagged-line link
const SUPPORTED_BAUD_RATES: &[u32] = &[9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600];

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
    #[serde(default)]
    pub auxiliary: AuxiliaryConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which transport the vehicle is reached over
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    /// Packetized MAVLink (heartbeat + typed messages)
    Mavlink,
    /// Line-oriented serial link with `TAG:value` framing
    Serial,
}

impl std::str::FromStr for LinkKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mavlink" => Ok(LinkKind::Mavlink),
            "serial" => Ok(LinkKind::Serial),
            other => Err(format!("unknown link kind '{}' (expected mavlink or serial)", other)),
        }
    }
}

/// Vehicle link configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LinkConfig {
    #[serde(default = "default_link_kind")]
    pub kind: LinkKind,

    /// Opaque endpoint descriptor: a MAVLink address such as
    /// `udpin:0.0.0.0:14550`, or a serial device path
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    #[serde(default = "default_line_marker")]
    pub line_marker: String,
}

/// Telemetry publisher configuration
#[derive(Debug, Deserialize, Clone)]
pub struct PublisherConfig {
    #[serde(default = "default_publish_rate_hz")]
    pub rate_hz: u32,

    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

/// Auxiliary signal source configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AuxiliaryConfig {
    #[serde(default = "default_auxiliary_enabled")]
    pub enabled: bool,

    #[serde(default = "default_auxiliary_rate_hz")]
    pub rate_hz: u32,
}

/// Subscriber endpoint configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for a daily-rotated log file; empty disables file logging
    #[serde(default)]
    pub directory: String,
}

// Default value functions
fn default_link_kind() -> LinkKind { LinkKind::Mavlink }
fn default_endpoint() -> String { "udpin:0.0.0.0:14550".to_string() }
fn default_baud_rate() -> u32 { 115200 }
fn default_handshake_timeout_ms() -> u64 { 10000 }
fn default_read_timeout_ms() -> u64 { 1000 }
fn default_idle_timeout_ms() -> u64 { 5000 }
fn default_reconnect_interval_ms() -> u64 { 1000 }
fn default_line_marker() -> String { DEFAULT_LINE_MARKER.to_string() }

fn default_publish_rate_hz() -> u32 { 20 }
fn default_queue_depth() -> usize { 32 }

fn default_auxiliary_enabled() -> bool { true }
fn default_auxiliary_rate_hz() -> u32 { 20 }

fn default_bind_address() -> String { "0.0.0.0:5000".to_string() }

fn default_log_level() -> String { "info".to_string() }

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            kind: default_link_kind(),
            endpoint: default_endpoint(),
            baud_rate: default_baud_rate(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            line_marker: default_line_marker(),
        }
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            rate_hz: default_publish_rate_hz(),
            queue_depth: default_queue_depth(),
        }
    }
}

impl Default for AuxiliaryConfig {
    fn default() -> Self {
        Self {
            enabled: default_auxiliary_enabled(),
            rate_hz: default_auxiliary_rate_hz(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_address: default_bind_address() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: String::new(),
        }
    }
}

impl LinkConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

impl PublisherConfig {
    pub fn period(&self) -> Duration {
        period_from_hz(self.rate_hz)
    }
}

impl AuxiliaryConfig {
    pub fn period(&self) -> Duration {
        period_from_hz(self.rate_hz)
    }
}

fn period_from_hz(rate_hz: u32) -> Duration {
    Duration::from_micros(1_000_000 / rate_hz.max(1) as u64)
}

fn invalid(msg: impl std::fmt::Display) -> BridgeError {
    BridgeError::Config(toml::de::Error::custom(msg))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use telemetry_bridge::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.link.endpoint.trim().is_empty() {
            return Err(invalid("link endpoint cannot be empty"));
        }

        if self.link.kind == LinkKind::Serial && !SUPPORTED_BAUD_RATES.contains(&self.link.baud_rate) {
            return Err(invalid(format!(
                "baud_rate must be one of: {:?}",
                SUPPORTED_BAUD_RATES
            )));
        }

        if self.link.handshake_timeout_ms == 0 || self.link.handshake_timeout_ms > 60000 {
            return Err(invalid("handshake_timeout_ms must be between 1 and 60000"));
        }

        if self.link.read_timeout_ms == 0 || self.link.read_timeout_ms > 10000 {
            return Err(invalid("read_timeout_ms must be between 1 and 10000"));
        }

        if self.link.idle_timeout_ms < self.link.read_timeout_ms {
            return Err(invalid("idle_timeout_ms must not be shorter than read_timeout_ms"));
        }

        if self.link.reconnect_interval_ms == 0 || self.link.reconnect_interval_ms > 60000 {
            return Err(invalid("reconnect_interval_ms must be between 1 and 60000"));
        }

        if self.link.line_marker.is_empty() {
            return Err(invalid("line_marker cannot be empty"));
        }

        if self.publisher.rate_hz == 0 || self.publisher.rate_hz > 200 {
            return Err(invalid("publisher rate_hz must be between 1 and 200"));
        }

        if self.publisher.queue_depth == 0 || self.publisher.queue_depth > 4096 {
            return Err(invalid("queue_depth must be between 1 and 4096"));
        }

        if self.auxiliary.enabled && (self.auxiliary.rate_hz == 0 || self.auxiliary.rate_hz > 200) {
            return Err(invalid("auxiliary rate_hz must be between 1 and 200"));
        }

        if self.server.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(invalid(format!(
                "bind_address '{}' is not a socket address",
                self.server.bind_address
            )));
        }

        if self.logging.level.parse::<tracing::Level>().is_err() {
            return Err(invalid(format!("unknown log level '{}'", self.logging.level)));
        }

        Ok(())
    }
}
