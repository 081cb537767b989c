//! # Error Types
//!
//! Custom error types for Telemetry Bridge using `thiserror`.
//!
//! Link and decode errors are contained by the ingestion loop; command
//! errors are returned to the operator as a structured reply.

use thiserror::Error;

/// A frame or field that was recognized but could not be decoded
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    /// A `TAG:value` field whose value does not match the tag's grammar
    #[error("malformed {tag} field {value:?}: {reason}")]
    MalformedField {
        tag: &'static str,
        value: String,
        reason: String,
    },

    /// A typed message of a recognized kind with an unusable payload
    #[error("malformed {kind} message: {reason}")]
    MalformedMessage { kind: &'static str, reason: String },
}

/// Main error type for Telemetry Bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Handshake or open failure; the caller backs off and retries
    #[error("connect error: {0}")]
    Connect(String),

    /// A single read hiccup; link state is kept
    #[error("transient I/O error: {0}")]
    TransientIo(String),

    /// The link is confirmed dead and must be reopened
    #[error("link dropped: {0}")]
    LinkDropped(String),

    /// Malformed frame or field
    #[error("frame decode error: {0}")]
    FrameDecode(#[from] DecodeError),

    /// Command issued while no vehicle link is connected
    #[error("MAVLink link not connected")]
    NotConnected,

    /// Mode name not offered by the connected firmware
    #[error("Mode not supported by this firmware: {0}")]
    UnsupportedMode(String),

    /// Serial port errors
    #[error("serial error: {0}")]
    Serial(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// The global log subscriber could not be installed
    #[error("logging setup failed: {0}")]
    Logging(String),

    /// Event serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The subscriber hub no longer accepts registrations
    #[error("shutting down")]
    ShuttingDown,
}

/// Result type alias for Telemetry Bridge
pub type Result<T> = std::result::Result<T, BridgeError>;
