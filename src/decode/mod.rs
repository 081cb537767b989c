//! # Frame Decoders
//!
//! Turn one raw frame from a link into zero or one [`TelemetryDelta`].
//!
//! This module handles:
//! - Typed MAVLink messages (heartbeat, position, HUD, status, GPS fix)
//! - Tagged serial lines (`RX > GPS:lat,lon|ALT:m|...`)
//! - Flight-stack mode tables shared with the command gateway
//!
//! Decoders never fail a whole frame for a bad field: each problem is
//! reported in [`DecodeOutcome::errors`] and decoding moves on.

pub mod line;
pub mod modes;
pub mod packet;

use crate::error::DecodeError;
use crate::telemetry::TelemetryDelta;

pub use line::LineDecoder;
pub use packet::{PacketDecoder, PacketFrame};

/// Result of decoding one frame
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DecodeOutcome {
    /// Fields to merge, `None` when the frame carried nothing usable
    pub delta: Option<TelemetryDelta>,

    /// Recognized-but-malformed units that were skipped
    pub errors: Vec<DecodeError>,
}

impl DecodeOutcome {
    /// Frame ignored without error (unknown kind, no marker, blank line)
    pub fn ignored() -> Self {
        Self::default()
    }

    pub(crate) fn from_parts(delta: TelemetryDelta, errors: Vec<DecodeError>) -> Self {
        Self {
            delta: (!delta.is_empty()).then_some(delta),
            errors,
        }
    }
}

/// Protocol-specific frame decoder
pub trait FrameDecoder: Send {
    /// Raw frame type handed over by the matching link adapter
    type Frame;

    fn decode(&mut self, frame: &Self::Frame) -> DecodeOutcome;
}
