//! Fixed-rate telemetry publisher.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::hub::{DeliveryReport, SubscriberHub, Subscription};
use super::{Event, Topic};
use crate::error::Result;
use crate::telemetry::TelemetryState;

/// Pushes the current snapshot to every subscriber on a fixed cadence
#[derive(Debug, Clone)]
pub struct TelemetryPublisher {
    state: Arc<TelemetryState>,
    hub: Arc<SubscriberHub>,
    period: Duration,
}

impl TelemetryPublisher {
    pub fn new(state: Arc<TelemetryState>, hub: Arc<SubscriberHub>, period: Duration) -> Self {
        Self { state, hub, period }
    }

    pub fn hub(&self) -> &Arc<SubscriberHub> {
        &self.hub
    }

    /// Current snapshot as a `telemetry` event
    pub fn snapshot_event(&self) -> Result<Event> {
        Event::new(Topic::Telemetry, &self.state.snapshot())
    }

    /// Register a subscriber and queue the current snapshot for it
    ///
    /// # Errors
    ///
    /// `ShuttingDown` after the hub has been closed.
    pub fn subscribe(&self) -> Result<Subscription> {
        let initial = self.snapshot_event()?;
        self.hub.subscribe(Some(initial))
    }

    /// Serialize one consistent snapshot and fan it out
    pub fn publish_now(&self) -> Result<DeliveryReport> {
        let event = self.snapshot_event()?;
        Ok(self.hub.publish(&event))
    }

    /// Tick until shutdown
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Telemetry publisher running every {:?}", self.period);

        let mut ticks: u64 = 0;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }

            match self.publish_now() {
                Ok(report) => {
                    ticks += 1;
                    if report.dropped > 0 {
                        debug!("Tick {}: {} delivered, {} dropped", ticks, report.delivered, report.dropped);
                    }
                }
                Err(e) => warn!("Failed to serialize telemetry: {}", e),
            }
        }

        info!("Telemetry publisher stopped after {} ticks", ticks);
    }
}
