//! # Serial Line Link
//!
//! Reads newline-terminated text from a serial ground radio.
//!
//! Opening the device is the handshake. Bytes are accumulated in a
//! `BytesMut` buffer and split on `\n`; a trailing `\r` is stripped and
//! invalid UTF-8 is replaced rather than rejected, since the decoder only
//! looks for ASCII tags.
//!
//! The link is declared dropped on end-of-file, on a hard read error, or
//! when nothing has arrived for the idle timeout.

use async_trait::async_trait;
use bytes::BytesMut;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use super::port_trait::{SerialPortIO, TokioSerialPort};
use super::{LinkAdapter, LinkState};
use crate::error::{BridgeError, Result};

/// Longest line accepted before the buffer is discarded
pub const MAX_LINE_LEN: usize = 1024;

/// Size of a single read from the port
const READ_CHUNK_SIZE: usize = 256;

/// Opens a serial device, swappable in tests
pub type PortOpener = Arc<dyn Fn(&str, u32) -> Result<Box<dyn SerialPortIO>> + Send + Sync>;

fn tokio_serial_opener() -> PortOpener {
    Arc::new(|path, baud_rate| {
        let port = TokioSerialPort::open(path, baud_rate)?;
        Ok(Box::new(port) as Box<dyn SerialPortIO>)
    })
}

/// Line-oriented serial link
pub struct SerialLineLink {
    device_path: String,
    baud_rate: u32,
    read_timeout: Duration,
    idle_timeout: Duration,
    opener: PortOpener,
    port: Option<Box<dyn SerialPortIO>>,
    state: LinkState,
    buffer: BytesMut,
    last_rx: Instant,
}

impl std::fmt::Debug for SerialLineLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLineLink")
            .field("device_path", &self.device_path)
            .field("baud_rate", &self.baud_rate)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl SerialLineLink {
    /// Create a link for a real serial device
    pub fn new(device_path: impl Into<String>, baud_rate: u32, read_timeout: Duration, idle_timeout: Duration) -> Self {
        Self::with_opener(device_path, baud_rate, read_timeout, idle_timeout, tokio_serial_opener())
    }

    /// Create a link with a custom port opener
    pub fn with_opener(
        device_path: impl Into<String>,
        baud_rate: u32,
        read_timeout: Duration,
        idle_timeout: Duration,
        opener: PortOpener,
    ) -> Self {
        Self {
            device_path: device_path.into(),
            baud_rate,
            read_timeout,
            idle_timeout,
            opener,
            port: None,
            state: LinkState::Disconnected,
            buffer: BytesMut::with_capacity(MAX_LINE_LEN),
            last_rx: Instant::now(),
        }
    }

    /// Pop the next complete line from the buffer, if any
    fn take_line(&mut self) -> Option<String> {
        let pos = self.buffer.iter().position(|&b| b == b'\n')?;
        let raw = self.buffer.split_to(pos + 1);
        let line = String::from_utf8_lossy(&raw);
        Some(line.trim_end_matches(&['\r', '\n'][..]).to_string())
    }

    fn drop_link(&mut self, reason: String) -> BridgeError {
        warn!("Serial link {} dropped: {}", self.device_path, reason);
        self.port = None;
        self.state = LinkState::Disconnected;
        self.buffer.clear();
        BridgeError::LinkDropped(reason)
    }
}

#[async_trait]
impl LinkAdapter for SerialLineLink {
    type Frame = String;

    fn state(&self) -> LinkState {
        self.state
    }

    fn endpoint(&self) -> &str {
        &self.device_path
    }

    async fn open(&mut self) -> Result<()> {
        self.state = LinkState::Connecting;
        debug!("Opening serial link {} at {} baud", self.device_path, self.baud_rate);

        match (self.opener)(&self.device_path, self.baud_rate) {
            Ok(port) => {
                self.port = Some(port);
                self.buffer.clear();
                self.last_rx = Instant::now();
                self.state = LinkState::Connected;
                info!("Serial link connected at {} ({} baud)", self.device_path, self.baud_rate);
                Ok(())
            }
            Err(e) => {
                self.port = None;
                self.state = LinkState::Disconnected;
                Err(BridgeError::Connect(e.to_string()))
            }
        }
    }

    async fn next_frame(&mut self) -> Result<Option<String>> {
        if self.state != LinkState::Connected {
            return Err(BridgeError::LinkDropped("serial link is not open".to_string()));
        }

        if let Some(line) = self.take_line() {
            return Ok(Some(line));
        }

        let Some(port) = self.port.as_mut() else {
            return Err(self.drop_link("serial port handle missing".to_string()));
        };

        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let read = timeout(self.read_timeout, port.read(&mut chunk)).await;
        match read {
            Err(_elapsed) => {
                if self.last_rx.elapsed() >= self.idle_timeout {
                    let reason = format!("no data for {:?}", self.idle_timeout);
                    return Err(self.drop_link(reason));
                }
                Ok(None)
            }
            Ok(Ok(0)) => Err(self.drop_link("device closed".to_string())),
            Ok(Ok(n)) => {
                self.last_rx = Instant::now();
                self.buffer.extend_from_slice(&chunk[..n]);

                if let Some(line) = self.take_line() {
                    return Ok(Some(line));
                }
                if self.buffer.len() > MAX_LINE_LEN {
                    let len = self.buffer.len();
                    self.buffer.clear();
                    return Err(BridgeError::TransientIo(format!(
                        "discarded {} bytes without line terminator",
                        len
                    )));
                }
                Ok(None)
            }
            Ok(Err(e))
                if matches!(
                    e.kind(),
                    io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                Err(BridgeError::TransientIo(e.to_string()))
            }
            Ok(Err(e)) => Err(self.drop_link(e.to_string())),
        }
    }

    async fn close(&mut self) {
        if self.port.take().is_some() {
            info!("Serial link {} closed", self.device_path);
        }
        self.buffer.clear();
        self.state = LinkState::Disconnected;
    }
}
