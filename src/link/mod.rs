//! # Link Adapters
//!
//! A link adapter owns one transport to the vehicle and hands raw frames to
//! the matching decoder.
//!
//! This module handles:
//! - The [`LinkAdapter`] contract shared by both transports
//! - [`LinkState`] transitions (Disconnected → Connecting → Connected)
//! - The tagged-line serial link ([`serial::SerialLineLink`])
//! - The MAVLink packet link ([`packet::MavlinkLink`])
//!
//! Adapters never reconnect on their own. After a `LinkDropped` error the
//! state is `Disconnected` and the caller must `open` again before asking
//! for the next frame.

pub mod packet;
pub mod port_trait;
pub mod serial;

use async_trait::async_trait;

use crate::error::Result;

pub use packet::MavlinkLink;
pub use serial::SerialLineLink;

/// Connection state of a link adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// One physical or virtual transport to the vehicle
#[async_trait]
pub trait LinkAdapter: Send {
    /// Unit handed to the decoder (a typed message, a text line)
    type Frame: Send;

    fn state(&self) -> LinkState;

    /// Opaque endpoint descriptor, for logs
    fn endpoint(&self) -> &str;

    /// Open the transport and complete its handshake
    ///
    /// # Errors
    ///
    /// `Connect` when the device cannot be opened or does not answer within
    /// the handshake timeout. State stays `Disconnected`.
    async fn open(&mut self) -> Result<()>;

    /// Wait up to one read timeout for the next frame
    ///
    /// # Returns
    ///
    /// `Ok(None)` when the read timeout elapsed without a complete frame.
    ///
    /// # Errors
    ///
    /// - `TransientIo`: a read hiccup, the link stays `Connected`
    /// - `FrameDecode`: bytes arrived but did not form a valid frame
    /// - `LinkDropped`: the device is gone, state is now `Disconnected`
    async fn next_frame(&mut self) -> Result<Option<Self::Frame>>;

    /// Release the transport; state becomes `Disconnected`
    async fn close(&mut self);
}
