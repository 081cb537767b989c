//! # Ingestion Loop
//!
//! Drives one link adapter and its decoder, merging every decoded delta
//! into the shared [`TelemetryState`].
//!
//! The loop is the reconnect state machine:
//! - while the link is not `Connected`, only `open` is called; a failed
//!   open sleeps for the reconnect interval and tries again, forever
//! - once connected, frames are read and decoded in arrival order
//! - `LinkDropped` counts a drop, backs off, and goes back to opening
//!
//! Link and decode errors never leave this loop. Only the shutdown signal
//! ends it, after which the link is closed.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::decode::FrameDecoder;
use crate::error::BridgeError;
use crate::link::{LinkAdapter, LinkState};
use crate::telemetry::TelemetryState;

/// Running totals for one ingestion loop
#[derive(Debug, Default)]
pub struct IngestCounters {
    frames: AtomicU64,
    deltas: AtomicU64,
    decode_errors: AtomicU64,
    transient_errors: AtomicU64,
    link_drops: AtomicU64,
    connect_failures: AtomicU64,
}

/// Point-in-time copy of [`IngestCounters`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub frames: u64,
    pub deltas: u64,
    pub decode_errors: u64,
    pub transient_errors: u64,
    pub link_drops: u64,
    pub connect_failures: u64,
}

impl IngestCounters {
    pub fn snapshot(&self) -> IngestStats {
        IngestStats {
            frames: self.frames.load(Ordering::Relaxed),
            deltas: self.deltas.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            transient_errors: self.transient_errors.load(Ordering::Relaxed),
            link_drops: self.link_drops.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl std::fmt::Display for IngestStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} frames, {} deltas, {} decode errors, {} transient errors, {} link drops, {} connect failures",
            self.frames,
            self.deltas,
            self.decode_errors,
            self.transient_errors,
            self.link_drops,
            self.connect_failures
        )
    }
}

/// One link adapter paired with its decoder
pub struct Ingestor<L, D> {
    link: L,
    decoder: D,
    state: Arc<TelemetryState>,
    counters: Arc<IngestCounters>,
    reconnect_interval: Duration,
}

impl<L, D> Ingestor<L, D>
where
    L: LinkAdapter,
    D: FrameDecoder<Frame = L::Frame>,
{
    pub fn new(link: L, decoder: D, state: Arc<TelemetryState>, reconnect_interval: Duration) -> Self {
        Self {
            link,
            decoder,
            state,
            counters: Arc::new(IngestCounters::default()),
            reconnect_interval,
        }
    }

    pub fn counters(&self) -> Arc<IngestCounters> {
        Arc::clone(&self.counters)
    }

    /// Run until `shutdown` flips to `true` (or its sender is dropped)
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Ingestion started on {}", self.link.endpoint());

        while !*shutdown.borrow() {
            if self.link.state() != LinkState::Connected {
                let opened = tokio::select! {
                    result = self.link.open() => result,
                    _ = shutdown.changed() => break,
                };

                if let Err(e) = opened {
                    IngestCounters::bump(&self.counters.connect_failures);
                    warn!(
                        "Failed to open {}: {}; retrying in {:?}",
                        self.link.endpoint(),
                        e,
                        self.reconnect_interval
                    );
                    if !backoff(self.reconnect_interval, &mut shutdown).await {
                        break;
                    }
                }
                continue;
            }

            let next = tokio::select! {
                result = self.link.next_frame() => result,
                _ = shutdown.changed() => break,
            };

            match next {
                Ok(Some(frame)) => self.handle_frame(&frame),
                Ok(None) => {}
                Err(BridgeError::LinkDropped(reason)) => {
                    IngestCounters::bump(&self.counters.link_drops);
                    warn!("Link {} lost: {}", self.link.endpoint(), reason);
                    if !backoff(self.reconnect_interval, &mut shutdown).await {
                        break;
                    }
                }
                Err(BridgeError::FrameDecode(e)) => {
                    IngestCounters::bump(&self.counters.decode_errors);
                    debug!("Undecodable frame: {}", e);
                }
                Err(e) => {
                    IngestCounters::bump(&self.counters.transient_errors);
                    debug!("Transient read error: {}", e);
                }
            }
        }

        self.link.close().await;
        info!("Ingestion stopped: {}", self.counters.snapshot());
    }

    fn handle_frame(&mut self, frame: &L::Frame) {
        IngestCounters::bump(&self.counters.frames);

        let outcome = self.decoder.decode(frame);
        for error in &outcome.errors {
            IngestCounters::bump(&self.counters.decode_errors);
            debug!("Skipped field: {}", error);
        }

        if let Some(delta) = outcome.delta {
            self.state.merge(&delta);
            IngestCounters::bump(&self.counters.deltas);
        }
    }
}

/// Sleep for `period`; `false` if shutdown was requested meanwhile
async fn backoff(period: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(period) => !*shutdown.borrow(),
        _ = shutdown.changed() => false,
    }
}
