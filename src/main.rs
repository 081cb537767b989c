//! # Telemetry Bridge
//!
//! Ingest live vehicle telemetry and fan it out to real-time subscribers.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use telemetry_bridge::auxiliary::{AuxiliarySource, NoisySquareWave};
use telemetry_bridge::command::{CommandGateway, VehicleLinkSlot};
use telemetry_bridge::config::{Config, LinkKind};
use telemetry_bridge::decode::{LineDecoder, PacketDecoder};
use telemetry_bridge::ingest::{IngestCounters, Ingestor};
use telemetry_bridge::link::{MavlinkLink, SerialLineLink};
use telemetry_bridge::logging;
use telemetry_bridge::publish::{SubscriberHub, TelemetryPublisher};
use telemetry_bridge::server::TelemetryServer;
use telemetry_bridge::telemetry::TelemetryState;

/// Command-line options; flags override the configuration file
#[derive(Debug, Parser)]
#[command(name = "telemetry-bridge", version, about)]
struct Cli {
    /// TOML configuration file (built-in defaults when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Link endpoint: MAVLink address (udpin:0.0.0.0:14550) or serial device path
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Link kind: mavlink or serial
    #[arg(short, long)]
    kind: Option<LinkKind>,

    /// Subscriber endpoint bind address
    #[arg(short, long)]
    bind: Option<String>,
}

impl Cli {
    fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(kind) = self.kind {
            config.link.kind = kind;
        }
        if let Some(endpoint) = &self.endpoint {
            config.link.endpoint = endpoint.clone();
        }
        if let Some(bind) = &self.bind {
            config.server.bind_address = bind.clone();
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

/// Main entry point for Telemetry Bridge
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load configuration, apply CLI overrides, set up logging
///    - Bind the subscriber endpoint
///
/// 2. **Workers** (one tokio task each)
///    - Ingestion loop for the configured link (reconnects on its own)
///    - Telemetry publisher ticker
///    - Auxiliary signal ticker (when enabled)
///    - Subscriber endpoint accept loop
///
/// 3. **Graceful Shutdown** on Ctrl+C
///    - Signal every worker, wait for them to finish
///    - Close the subscriber hub and log final counters
///
/// # Errors
///
/// Returns error if the configuration is invalid, logging cannot be
/// installed, or the subscriber endpoint cannot be bound. Link failures are
/// never fatal.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;
    let _log_guards = logging::init(&config.logging).context("Failed to initialize logging")?;

    info!("Telemetry Bridge v{} starting...", env!("CARGO_PKG_VERSION"));

    let state = Arc::new(TelemetryState::new());
    let hub = SubscriberHub::new(config.publisher.queue_depth);
    let vehicle = Arc::new(VehicleLinkSlot::new());
    let gateway = CommandGateway::new(Arc::clone(&vehicle));
    let publisher = TelemetryPublisher::new(Arc::clone(&state), Arc::clone(&hub), config.publisher.period());

    let server = TelemetryServer::bind(&config.server.bind_address, publisher.clone(), gateway)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_address))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    let link = &config.link;
    let counters: Arc<IngestCounters> = match link.kind {
        LinkKind::Mavlink => {
            let adapter = MavlinkLink::new(
                link.endpoint.clone(),
                link.handshake_timeout(),
                link.read_timeout(),
                link.idle_timeout(),
                Arc::clone(&vehicle),
            );
            let ingestor = Ingestor::new(adapter, PacketDecoder, Arc::clone(&state), link.reconnect_interval());
            let counters = ingestor.counters();
            tasks.push(tokio::spawn(ingestor.run(shutdown_rx.clone())));
            counters
        }
        LinkKind::Serial => {
            let adapter = SerialLineLink::new(
                link.endpoint.clone(),
                link.baud_rate,
                link.read_timeout(),
                link.idle_timeout(),
            );
            let decoder = LineDecoder::new(link.line_marker.clone());
            let ingestor = Ingestor::new(adapter, decoder, Arc::clone(&state), link.reconnect_interval());
            let counters = ingestor.counters();
            tasks.push(tokio::spawn(ingestor.run(shutdown_rx.clone())));
            counters
        }
    };
    info!("Ingesting from {:?} link at {}", link.kind, link.endpoint);

    tasks.push(tokio::spawn(publisher.run(shutdown_rx.clone())));

    if config.auxiliary.enabled {
        let source = AuxiliarySource::new(NoisySquareWave, Arc::clone(&hub), config.auxiliary.period());
        tasks.push(tokio::spawn(source.run(shutdown_rx.clone())));
    }

    tasks.push(tokio::spawn(server.run(shutdown_rx)));

    info!("Press Ctrl+C to exit");
    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
    info!("Shutting down...");

    let _ = shutdown_tx.send(true);
    for task in tasks {
        if let Err(e) = task.await {
            warn!("Worker ended abnormally: {}", e);
        }
    }

    hub.close();
    let hub_stats = hub.stats();
    info!("Ingestion totals: {}", counters.snapshot());
    info!(
        "Fan-out totals: {} dropped deliveries, {} closed subscribers removed",
        hub_stats.dropped, hub_stats.removed
    );
    info!("Telemetry Bridge stopped. Goodbye!");

    Ok(())
}
