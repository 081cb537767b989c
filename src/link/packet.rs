//! # MAVLink Packet Link
//!
//! Owns one MAVLink connection (`udpin:`, `udpout:`, `tcpout:`, `serial:`
//! endpoint strings) and hands typed messages to the packet decoder.
//!
//! The `mavlink` connection API is blocking, so the connection is created
//! on the blocking pool and read from a dedicated OS thread that forwards
//! frames into a bounded channel. A session (connection plus reader) lives
//! until the reader reports a fatal error or the link is closed; an idle
//! timeout only marks the link `Disconnected` so the next `open` can wait
//! for a fresh heartbeat on the same socket.
//!
//! The handshake is the first heartbeat from the vehicle itself (not a
//! ground station, gimbal, ADS-B receiver or companion computer). That
//! heartbeat is replayed as the first frame so its mode and armed state are
//! not lost, and it attaches the vehicle to the command gateway.

use async_trait::async_trait;
use mavlink::common::MavMessage;
use mavlink::error::MessageReadError;
use mavlink::{MavConnection, MavHeader};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use super::{LinkAdapter, LinkState};
use crate::command::{CommandSink, VehicleLink, VehicleLinkSlot};
use crate::decode::modes::FlightStack;
use crate::decode::PacketFrame;
use crate::error::{BridgeError, DecodeError, Result};

/// Frames buffered between the reader thread and the ingestion loop
const FRAME_QUEUE_DEPTH: usize = 256;

/// Reader back-off after a transient receive error
const TRANSIENT_BACKOFF: Duration = Duration::from_millis(10);

/// System id this bridge uses for outbound messages
pub const GCS_SYSTEM_ID: u8 = 255;

/// `MAV_COMP_ID_MISSIONPLANNER`
pub const GCS_COMPONENT_ID: u8 = 190;

/// Blocking MAVLink transport, swappable in tests
pub trait PacketTransport: Send + Sync {
    /// Block until the next message arrives
    ///
    /// # Errors
    ///
    /// - `TransientIo`: the read may succeed if retried
    /// - `LinkDropped`: the transport is unusable
    /// - `FrameDecode`: bytes arrived but were not a valid message
    fn recv(&self) -> Result<PacketFrame>;

    fn send(&self, message: &MavMessage) -> Result<()>;
}

/// Creates a transport for an endpoint string, swappable in tests
pub type Connector = Arc<dyn Fn(&str) -> Result<Arc<dyn PacketTransport>> + Send + Sync>;

/// [`PacketTransport`] backed by a `mavlink` crate connection
pub struct MavConnectionTransport {
    connection: Box<dyn MavConnection<MavMessage> + Send + Sync>,
}

impl MavConnectionTransport {
    pub fn connect(endpoint: &str) -> Result<Self> {
        let connection = mavlink::connect::<MavMessage>(endpoint)
            .map_err(|e| BridgeError::Connect(format!("{}: {}", endpoint, e)))?;
        Ok(Self { connection })
    }
}

impl PacketTransport for MavConnectionTransport {
    fn recv(&self) -> Result<PacketFrame> {
        match self.connection.recv() {
            Ok((header, message)) => Ok(PacketFrame { header, message }),
            Err(MessageReadError::Io(e)) => Err(classify_io_error(e)),
            Err(other) => Err(BridgeError::FrameDecode(DecodeError::MalformedMessage {
                kind: "MAVLINK",
                reason: format!("{:?}", other),
            })),
        }
    }

    fn send(&self, message: &MavMessage) -> Result<()> {
        let header = MavHeader {
            system_id: GCS_SYSTEM_ID,
            component_id: GCS_COMPONENT_ID,
            sequence: 0,
        };
        self.connection
            .send(&header, message)
            .map(|_| ())
            .map_err(|e| BridgeError::TransientIo(format!("send failed: {:?}", e)))
    }
}

fn classify_io_error(e: io::Error) -> BridgeError {
    match e.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted => {
            BridgeError::TransientIo(e.to_string())
        }
        _ => BridgeError::LinkDropped(e.to_string()),
    }
}

fn mavlink_connector() -> Connector {
    Arc::new(|endpoint| {
        let transport = MavConnectionTransport::connect(endpoint)?;
        Ok(Arc::new(transport) as Arc<dyn PacketTransport>)
    })
}

/// Command sink writing through the session's transport
struct TransportSink(Arc<dyn PacketTransport>);

impl CommandSink for TransportSink {
    fn send(&self, message: &MavMessage) -> Result<()> {
        self.0.send(message)
    }
}

/// Live connection plus its reader thread
struct Session {
    transport: Arc<dyn PacketTransport>,
    frames: mpsc::Receiver<Result<PacketFrame>>,
    stop: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl Session {
    fn start(transport: Arc<dyn PacketTransport>) -> Result<Self> {
        let (tx, frames) = mpsc::channel(FRAME_QUEUE_DEPTH);
        let stop = Arc::new(AtomicBool::new(false));

        let reader = {
            let transport = Arc::clone(&transport);
            let stop = Arc::clone(&stop);
            std::thread::Builder::new()
                .name("mavlink-reader".to_string())
                .spawn(move || read_loop(transport, tx, stop))?
        };

        Ok(Self {
            transport,
            frames,
            stop,
            reader,
        })
    }

    fn is_alive(&self) -> bool {
        !self.reader.is_finished()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // The reader exits at its next receive once it sees the flag or a
        // closed channel
        self.stop.store(true, Ordering::Relaxed);
    }
}

fn read_loop(
    transport: Arc<dyn PacketTransport>,
    tx: mpsc::Sender<Result<PacketFrame>>,
    stop: Arc<AtomicBool>,
) {
    while !stop.load(Ordering::Relaxed) {
        let result = transport.recv();
        let fatal = matches!(result, Err(BridgeError::LinkDropped(_)));
        let transient = matches!(result, Err(BridgeError::TransientIo(_)));

        if tx.blocking_send(result).is_err() || fatal {
            break;
        }
        if transient {
            std::thread::sleep(TRANSIENT_BACKOFF);
        }
    }
    debug!("MAVLink reader thread exiting");
}

/// MAVLink link adapter
pub struct MavlinkLink {
    endpoint: String,
    handshake_timeout: Duration,
    read_timeout: Duration,
    idle_timeout: Duration,
    connector: Connector,
    vehicle: Arc<VehicleLinkSlot>,
    session: Option<Session>,
    pending: Option<PacketFrame>,
    state: LinkState,
    last_rx: Instant,
}

impl std::fmt::Debug for MavlinkLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MavlinkLink")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state)
            .field("session", &self.session.is_some())
            .finish_non_exhaustive()
    }
}

impl MavlinkLink {
    /// Create a link for a `mavlink` endpoint string
    ///
    /// # Arguments
    ///
    /// * `endpoint` - e.g. `udpin:0.0.0.0:14550`
    /// * `vehicle` - slot the handshake fills for the command gateway
    pub fn new(
        endpoint: impl Into<String>,
        handshake_timeout: Duration,
        read_timeout: Duration,
        idle_timeout: Duration,
        vehicle: Arc<VehicleLinkSlot>,
    ) -> Self {
        Self::with_connector(
            endpoint,
            handshake_timeout,
            read_timeout,
            idle_timeout,
            vehicle,
            mavlink_connector(),
        )
    }

    /// Create a link with a custom transport connector
    pub fn with_connector(
        endpoint: impl Into<String>,
        handshake_timeout: Duration,
        read_timeout: Duration,
        idle_timeout: Duration,
        vehicle: Arc<VehicleLinkSlot>,
        connector: Connector,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            handshake_timeout,
            read_timeout,
            idle_timeout,
            connector,
            vehicle,
            session: None,
            pending: None,
            state: LinkState::Disconnected,
            last_rx: Instant::now(),
        }
    }

    async fn ensure_session(&mut self) -> Result<()> {
        if self.session.as_ref().is_some_and(|s| !s.is_alive()) {
            debug!("Discarding finished MAVLink session for {}", self.endpoint);
            self.session = None;
        }
        if self.session.is_some() {
            return Ok(());
        }

        let connector = Arc::clone(&self.connector);
        let endpoint = self.endpoint.clone();
        let transport = tokio::task::spawn_blocking(move || connector(&endpoint))
            .await
            .map_err(|e| BridgeError::Connect(format!("connect task failed: {}", e)))?
            .map_err(|e| match e {
                BridgeError::Connect(msg) => BridgeError::Connect(msg),
                other => BridgeError::Connect(other.to_string()),
            })?;

        let session = Session::start(transport)
            .map_err(|e| BridgeError::Connect(format!("reader thread: {}", e)))?;
        self.session = Some(session);
        Ok(())
    }

    /// Wait for the first heartbeat from a vehicle
    async fn await_heartbeat(&mut self) -> Result<PacketFrame> {
        let deadline = Instant::now() + self.handshake_timeout;

        loop {
            let Some(session) = self.session.as_mut() else {
                return Err(BridgeError::Connect("no MAVLink session".to_string()));
            };

            let received = timeout_at(deadline, session.frames.recv()).await;
            match received {
                Err(_elapsed) => {
                    return Err(BridgeError::Connect(format!(
                        "no heartbeat from {} within {:?}",
                        self.endpoint, self.handshake_timeout
                    )));
                }
                Ok(None) => {
                    self.session = None;
                    return Err(BridgeError::Connect("MAVLink reader stopped".to_string()));
                }
                Ok(Some(Ok(frame))) if frame.vehicle_heartbeat().is_some() => return Ok(frame),
                Ok(Some(Ok(_))) => {}
                Ok(Some(Err(BridgeError::LinkDropped(reason)))) => {
                    self.session = None;
                    return Err(BridgeError::Connect(reason));
                }
                Ok(Some(Err(e))) => debug!("Ignoring error during handshake: {}", e),
            }
        }
    }

    fn attach_vehicle(&self, frame: &PacketFrame, transport: Arc<dyn PacketTransport>) {
        let stack = frame.vehicle_heartbeat().and_then(FlightStack::from_heartbeat);
        self.vehicle.attach(VehicleLink {
            sink: Arc::new(TransportSink(transport)),
            target_system: frame.header.system_id,
            target_component: frame.header.component_id,
            stack,
        });
    }

    /// Mark the link dropped; `teardown` also discards the session
    fn drop_link(&mut self, reason: String, teardown: bool) -> BridgeError {
        warn!("MAVLink link {} dropped: {}", self.endpoint, reason);
        self.vehicle.detach();
        self.pending = None;
        self.state = LinkState::Disconnected;
        if teardown {
            self.session = None;
        }
        BridgeError::LinkDropped(reason)
    }
}

#[async_trait]
impl LinkAdapter for MavlinkLink {
    type Frame = PacketFrame;

    fn state(&self) -> LinkState {
        self.state
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn open(&mut self) -> Result<()> {
        self.state = LinkState::Connecting;
        debug!("Opening MAVLink link {}", self.endpoint);

        let handshake = match self.ensure_session().await {
            Ok(()) => self.await_heartbeat().await,
            Err(e) => Err(e),
        };

        let frame = match handshake {
            Ok(frame) => frame,
            Err(e) => {
                self.state = LinkState::Disconnected;
                return Err(e);
            }
        };

        let Some(transport) = self.session.as_ref().map(|s| Arc::clone(&s.transport)) else {
            self.state = LinkState::Disconnected;
            return Err(BridgeError::Connect("no MAVLink session".to_string()));
        };

        self.attach_vehicle(&frame, transport);
        info!(
            "MAVLink link connected at {} (system {}, component {})",
            self.endpoint, frame.header.system_id, frame.header.component_id
        );
        self.pending = Some(frame);
        self.last_rx = Instant::now();
        self.state = LinkState::Connected;
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<PacketFrame>> {
        if self.state != LinkState::Connected {
            return Err(BridgeError::LinkDropped("MAVLink link is not open".to_string()));
        }

        if let Some(frame) = self.pending.take() {
            return Ok(Some(frame));
        }

        let Some(session) = self.session.as_mut() else {
            return Err(self.drop_link("MAVLink session missing".to_string(), true));
        };

        let received = timeout(self.read_timeout, session.frames.recv()).await;
        match received {
            Err(_elapsed) => {
                if self.last_rx.elapsed() >= self.idle_timeout {
                    let reason = format!("no data for {:?}", self.idle_timeout);
                    return Err(self.drop_link(reason, false));
                }
                Ok(None)
            }
            Ok(None) => Err(self.drop_link("MAVLink reader stopped".to_string(), true)),
            Ok(Some(Ok(frame))) => {
                self.last_rx = Instant::now();
                Ok(Some(frame))
            }
            Ok(Some(Err(BridgeError::LinkDropped(reason)))) => Err(self.drop_link(reason, true)),
            Ok(Some(Err(e))) => {
                if matches!(e, BridgeError::FrameDecode(_)) {
                    self.last_rx = Instant::now();
                }
                Err(e)
            }
        }
    }

    async fn close(&mut self) {
        if self.session.take().is_some() {
            info!("MAVLink link {} closed", self.endpoint);
        }
        self.vehicle.detach();
        self.pending = None;
        self.state = LinkState::Disconnected;
    }
}


#[cfg(test)]
mod tests {
    use super::mocks::{FakeFeed, FakeTransport};
    use super::*;
    use crate::command::CommandGateway;
    use crate::decode::modes::tests::heartbeat;
    use crate::decode::packet::tests::{global_position, vehicle_heartbeat};
    use crate::decode::packet::GIMBAL_COMPONENT_ID;
    use mavlink::common::{MavAutopilot, MavModeFlag, MavType};
    use std::sync::atomic::AtomicUsize;

    const HANDSHAKE: Duration = Duration::from_millis(300);
    const READ_TIMEOUT: Duration = Duration::from_millis(50);
    const IDLE_TIMEOUT: Duration = Duration::from_millis(250);

    struct Harness {
        link: MavlinkLink,
        feed: FakeFeed,
        transport: Arc<FakeTransport>,
        vehicle: Arc<VehicleLinkSlot>,
        connects: Arc<AtomicUsize>,
    }

    fn harness() -> Harness {
        let (transport, feed) = FakeTransport::pair();
        let connects = Arc::new(AtomicUsize::new(0));
        let connector: Connector = {
            let transport = Arc::clone(&transport);
            let connects = Arc::clone(&connects);
            Arc::new(move |_| {
                connects.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::clone(&transport) as Arc<dyn PacketTransport>)
            })
        };
        let vehicle = Arc::new(VehicleLinkSlot::new());
        let link = MavlinkLink::with_connector(
            "udpin:127.0.0.1:14550",
            HANDSHAKE,
            READ_TIMEOUT,
            IDLE_TIMEOUT,
            Arc::clone(&vehicle),
            connector,
        );
        Harness {
            link,
            feed,
            transport,
            vehicle,
            connects,
        }
    }

    fn gcs_heartbeat() -> MavMessage {
        MavMessage::HEARTBEAT(heartbeat(
            MavType::MAV_TYPE_GCS,
            MavAutopilot::MAV_AUTOPILOT_INVALID,
            MavModeFlag::empty(),
            0,
        ))
    }

    #[tokio::test]
    async fn test_open_waits_for_vehicle_heartbeat() {
        let mut h = harness();
        h.feed.push(255, gcs_heartbeat());
        h.feed.push(1, global_position(0, 0, 0));
        h.feed.push(1, vehicle_heartbeat(4, false));

        h.link.open().await.unwrap();
        assert_eq!(h.link.state(), LinkState::Connected);
        assert_eq!(h.connects.load(Ordering::SeqCst), 1);

        let vehicle = h.vehicle.current().unwrap();
        assert_eq!(vehicle.target_system, 1);
        assert_eq!(vehicle.stack, Some(FlightStack::ArduCopter));

        // The handshake heartbeat is replayed first
        let first = h.link.next_frame().await.unwrap().unwrap();
        assert!(first.vehicle_heartbeat().is_some());
    }

    #[tokio::test]
    async fn test_open_skips_companion_and_gimbal_heartbeats() {
        let mut h = harness();
        let companion = MavMessage::HEARTBEAT(heartbeat(
            MavType::MAV_TYPE_ONBOARD_CONTROLLER,
            MavAutopilot::MAV_AUTOPILOT_INVALID,
            MavModeFlag::empty(),
            0,
        ));
        h.feed.push_from(1, 191, companion);
        h.feed.push_from(1, GIMBAL_COMPONENT_ID, vehicle_heartbeat(0, false));
        h.feed.push(1, vehicle_heartbeat(4, true));

        h.link.open().await.unwrap();

        let vehicle = h.vehicle.current().unwrap();
        assert_eq!(vehicle.target_component, 1);
        assert_eq!(vehicle.stack, Some(FlightStack::ArduCopter));

        let first = h.link.next_frame().await.unwrap().unwrap();
        assert_eq!(first.header.component_id, 1);
    }

    #[tokio::test]
    async fn test_open_times_out_without_heartbeat() {
        let mut h = harness();
        h.feed.push(255, gcs_heartbeat());

        let result = h.link.open().await;
        assert!(matches!(result, Err(BridgeError::Connect(_))));
        assert_eq!(h.link.state(), LinkState::Disconnected);
        assert!(!h.vehicle.is_connected());
    }

    #[tokio::test]
    async fn test_connector_failure_is_connect_error() {
        let vehicle = Arc::new(VehicleLinkSlot::new());
        let connector: Connector = Arc::new(|endpoint| {
            Err(BridgeError::Io(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("{} busy", endpoint),
            )))
        });
        let mut link = MavlinkLink::with_connector(
            "udpin:0.0.0.0:14550",
            HANDSHAKE,
            READ_TIMEOUT,
            IDLE_TIMEOUT,
            vehicle,
            connector,
        );

        let err = link.open().await.unwrap_err();
        assert!(matches!(err, BridgeError::Connect(ref msg) if msg.contains("busy")));
        assert_eq!(link.state(), LinkState::Disconnected);
    }

    #[tokio::test]
    async fn test_next_frame_before_open_is_dropped() {
        let mut h = harness();
        assert!(matches!(h.link.next_frame().await, Err(BridgeError::LinkDropped(_))));
    }

    #[tokio::test]
    async fn test_frames_and_read_timeout() {
        let mut h = harness();
        h.feed.push(1, vehicle_heartbeat(0, false));
        h.link.open().await.unwrap();
        h.link.next_frame().await.unwrap();

        h.feed.push(1, global_position(194_326_000, -991_332_000, 1000));
        let frame = h.link.next_frame().await.unwrap().unwrap();
        assert!(matches!(frame.message, MavMessage::GLOBAL_POSITION_INT(_)));

        assert!(h.link.next_frame().await.unwrap().is_none());
        assert_eq!(h.link.state(), LinkState::Connected);
    }

    #[tokio::test]
    async fn test_transient_and_decode_errors_keep_link() {
        let mut h = harness();
        h.feed.push(1, vehicle_heartbeat(0, false));
        h.link.open().await.unwrap();
        h.link.next_frame().await.unwrap();

        h.feed.push_error(BridgeError::TransientIo("would block".to_string()));
        h.feed.push_error(BridgeError::FrameDecode(DecodeError::MalformedMessage {
            kind: "MAVLINK",
            reason: "crc".to_string(),
        }));

        assert!(matches!(h.link.next_frame().await, Err(BridgeError::TransientIo(_))));
        assert!(matches!(h.link.next_frame().await, Err(BridgeError::FrameDecode(_))));
        assert_eq!(h.link.state(), LinkState::Connected);
    }

    #[tokio::test]
    async fn test_idle_timeout_drops_but_keeps_session() {
        let mut h = harness();
        h.feed.push(1, vehicle_heartbeat(0, false));
        h.link.open().await.unwrap();
        h.link.next_frame().await.unwrap();

        let mut result = h.link.next_frame().await;
        while matches!(result, Ok(None)) {
            result = h.link.next_frame().await;
        }
        assert!(matches!(result, Err(BridgeError::LinkDropped(_))));
        assert_eq!(h.link.state(), LinkState::Disconnected);
        assert!(!h.vehicle.is_connected());

        // Reopening reuses the same connection
        h.feed.push(1, vehicle_heartbeat(6, true));
        h.link.open().await.unwrap();
        assert_eq!(h.connects.load(Ordering::SeqCst), 1);
        assert!(h.vehicle.is_connected());
    }

    #[tokio::test]
    async fn test_fatal_error_tears_down_session() {
        let mut h = harness();
        h.feed.push(1, vehicle_heartbeat(0, false));
        h.link.open().await.unwrap();
        h.link.next_frame().await.unwrap();

        h.feed.push_error(BridgeError::LinkDropped("connection reset".to_string()));
        let result = h.link.next_frame().await;
        assert!(matches!(result, Err(BridgeError::LinkDropped(ref r)) if r == "connection reset"));
        assert_eq!(h.link.state(), LinkState::Disconnected);
        assert!(h.link.session.is_none());

        h.feed.push(1, vehicle_heartbeat(0, false));
        h.link.open().await.unwrap();
        assert_eq!(h.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_gateway_sends_through_transport() {
        let mut h = harness();
        h.feed.push(1, vehicle_heartbeat(0, false));
        h.link.open().await.unwrap();

        let gateway = CommandGateway::new(Arc::clone(&h.vehicle));
        gateway.set_mode("GUIDED").unwrap();
        gateway.set_armed(true).unwrap();
        assert_eq!(h.transport.sent.lock().unwrap().len(), 2);

        h.link.close().await;
        assert_eq!(h.link.state(), LinkState::Disconnected);
        assert!(matches!(gateway.set_armed(false), Err(BridgeError::NotConnected)));
    }

    #[test]
    fn test_classify_io_error() {
        assert!(matches!(
            classify_io_error(io::Error::from(io::ErrorKind::WouldBlock)),
            BridgeError::TransientIo(_)
        ));
        assert!(matches!(
            classify_io_error(io::Error::from(io::ErrorKind::ConnectionReset)),
            BridgeError::LinkDropped(_)
        ));
    }
}
