//! # Subscriber Endpoint
//!
//! TCP server speaking newline-delimited JSON.
//!
//! Each connection is one subscriber: it receives the current snapshot at
//! once, then every `telemetry` and `sdr` event. A client may also send
//! command requests, one per line:
//!
//! ```text
//! {"command":"mode","mode":"GUIDED"}
//! {"command":"arm","arm":false}
//! ```
//!
//! and gets `{"event":"command","data":{"ok":...,"message":...}}` back on
//! the same stream.

use serde::Deserialize;
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::command::{CommandGateway, CommandReply};
use crate::error::Result;
use crate::publish::{Event, TelemetryPublisher, Topic};

/// Operator command received from a subscriber
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum CommandRequest {
    Mode {
        mode: String,
    },
    Arm {
        #[serde(default = "default_arm")]
        arm: bool,
    },
}

fn default_arm() -> bool {
    true
}

impl CommandRequest {
    pub fn execute(&self, gateway: &CommandGateway) -> CommandReply {
        match self {
            CommandRequest::Mode { mode } => gateway.set_mode(mode).into(),
            CommandRequest::Arm { arm } => gateway.set_armed(*arm).into(),
        }
    }
}

/// Parse and run one request line; `None` for blank lines
pub fn handle_line(gateway: &CommandGateway, line: &str) -> Option<CommandReply> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let reply = match serde_json::from_str::<CommandRequest>(line) {
        Ok(request) => {
            debug!("Command request: {:?}", request);
            request.execute(gateway)
        }
        Err(e) => CommandReply {
            ok: false,
            message: format!("invalid command: {}", e),
        },
    };
    Some(reply)
}

/// Accepts subscribers until shutdown
pub struct TelemetryServer {
    listener: TcpListener,
    publisher: TelemetryPublisher,
    gateway: CommandGateway,
}

impl TelemetryServer {
    /// Bind the listening socket
    ///
    /// # Errors
    ///
    /// `Io` if the address cannot be bound.
    pub async fn bind(addr: &str, publisher: TelemetryPublisher, gateway: CommandGateway) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Subscriber endpoint listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            publisher,
            gateway,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut clients = JoinSet::new();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let publisher = self.publisher.clone();
                        let gateway = self.gateway.clone();
                        let shutdown = shutdown.clone();
                        clients.spawn(async move {
                            match serve_client(stream, peer, publisher, gateway, shutdown).await {
                                Ok(()) => info!("Subscriber {} disconnected", peer),
                                Err(e) => info!("Subscriber {} disconnected: {}", peer, e),
                            }
                        });
                    }
                    Err(e) => warn!("Failed to accept subscriber: {}", e),
                },
                Some(_) = clients.join_next(), if !clients.is_empty() => {}
                _ = shutdown.changed() => break,
            }
        }

        clients.shutdown().await;
        info!("Subscriber endpoint stopped");
    }
}

async fn write_event<W: AsyncWrite + Unpin>(writer: &mut W, event: &Event) -> Result<()> {
    writer.write_all(event.payload.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    Ok(())
}

async fn serve_client(
    stream: TcpStream,
    peer: SocketAddr,
    publisher: TelemetryPublisher,
    gateway: CommandGateway,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let _ = stream.set_nodelay(true);
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    let mut subscription = publisher.subscribe()?;
    info!("Subscriber {} connected (id {})", peer, subscription.id());

    loop {
        tokio::select! {
            event = subscription.recv() => match event {
                Some(event) => write_event(&mut writer, &event).await?,
                None => break,
            },
            line = lines.next_line() => match line? {
                Some(line) => {
                    if let Some(reply) = handle_line(&gateway, &line) {
                        let event = Event::new(Topic::Command, &reply)?;
                        write_event(&mut writer, &event).await?;
                    }
                }
                None => break,
            },
            _ = shutdown.changed() => break,
        }
    }

    let _ = writer.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::VehicleLinkSlot;
    use crate::publish::SubscriberHub;
    use crate::telemetry::{TelemetryDelta, TelemetryState};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    fn gateway() -> CommandGateway {
        CommandGateway::new(Arc::new(VehicleLinkSlot::new()))
    }

    #[test]
    fn test_parse_requests() {
        let mode: CommandRequest = serde_json::from_str(r#"{"command":"mode","mode":"GUIDED"}"#).unwrap();
        assert_eq!(mode, CommandRequest::Mode { mode: "GUIDED".to_string() });

        let arm: CommandRequest = serde_json::from_str(r#"{"command":"arm"}"#).unwrap();
        assert_eq!(arm, CommandRequest::Arm { arm: true });

        let disarm: CommandRequest = serde_json::from_str(r#"{"command":"arm","arm":false}"#).unwrap();
        assert_eq!(disarm, CommandRequest::Arm { arm: false });
    }

    #[test]
    fn test_handle_line() {
        let gateway = gateway();
        assert_eq!(handle_line(&gateway, "   "), None);

        let reply = handle_line(&gateway, r#"{"command":"arm","arm":true}"#).unwrap();
        assert!(!reply.ok);
        assert_eq!(reply.message, "MAVLink link not connected");

        let reply = handle_line(&gateway, r#"{"command":"fly"}"#).unwrap();
        assert!(!reply.ok);
        assert!(reply.message.starts_with("invalid command"));
    }

    async fn start_server() -> (SocketAddr, Arc<TelemetryState>, watch::Sender<bool>, tokio::task::JoinHandle<()>) {
        let state = Arc::new(TelemetryState::new());
        state.merge(&TelemetryDelta {
            mode: Some("AUTO".to_string()),
            ..Default::default()
        });
        let publisher = TelemetryPublisher::new(Arc::clone(&state), SubscriberHub::new(8), Duration::from_millis(50));
        let server = TelemetryServer::bind("127.0.0.1:0", publisher, gateway()).await.unwrap();
        let addr = server.local_addr().unwrap();

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(server.run(rx));
        (addr, state, tx, task)
    }

    #[tokio::test]
    async fn test_client_gets_snapshot_and_command_reply() {
        let (addr, _state, tx, task) = start_server().await;

        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        let first = timeout(Duration::from_secs(2), lines.next_line()).await.unwrap().unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&first).unwrap();
        assert_eq!(value["event"], "telemetry");
        assert_eq!(value["data"]["mode"], "AUTO");

        writer.write_all(b"{\"command\":\"mode\",\"mode\":\"GUIDED\"}\n").await.unwrap();
        let reply = timeout(Duration::from_secs(2), lines.next_line()).await.unwrap().unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(value["event"], "command");
        assert_eq!(value["data"]["ok"], false);
        assert_eq!(value["data"]["message"], "MAVLink link not connected");

        tx.send(true).unwrap();
        timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_ends_client_stream() {
        let (addr, _state, tx, task) = start_server().await;

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut lines = BufReader::new(stream).lines();
        lines.next_line().await.unwrap().unwrap();

        tx.send(true).unwrap();
        timeout(Duration::from_secs(2), task).await.unwrap().unwrap();

        let end = timeout(Duration::from_secs(2), lines.next_line()).await.unwrap();
        assert!(matches!(end, Ok(None) | Err(_)));
    }
}
