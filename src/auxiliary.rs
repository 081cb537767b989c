//! # Auxiliary Signal Source
//!
//! Produces one timestamped scalar per tick and publishes it on the `sdr`
//! channel. Samples are never merged into the telemetry snapshot.

use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::publish::{Event, SubscriberHub, Topic};

/// Square wave amplitude
pub const SQUARE_AMPLITUDE: f64 = 0.8;

/// Ticks per square wave period
pub const SQUARE_PERIOD_TICKS: u64 = 30;

/// Uniform noise half-width
pub const NOISE_AMPLITUDE: f64 = 0.15;

/// `{t, value}` sample; `t` is epoch seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AuxSample {
    pub t: f64,
    pub value: f64,
}

/// Source of auxiliary values, one per tick
pub trait SignalGenerator: Send {
    fn next_value(&mut self, tick: u64) -> f64;
}

/// Noisy square wave: high for the first half of each period
#[derive(Debug, Default, Clone)]
pub struct NoisySquareWave;

impl NoisySquareWave {
    fn level(tick: u64) -> f64 {
        if tick % SQUARE_PERIOD_TICKS < SQUARE_PERIOD_TICKS / 2 {
            SQUARE_AMPLITUDE
        } else {
            0.0
        }
    }
}

impl SignalGenerator for NoisySquareWave {
    fn next_value(&mut self, tick: u64) -> f64 {
        let noise = rand::thread_rng().gen_range(-NOISE_AMPLITUDE..=NOISE_AMPLITUDE);
        Self::level(tick) + noise
    }
}

fn epoch_seconds() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Fixed-rate auxiliary publisher
pub struct AuxiliarySource<G> {
    generator: G,
    hub: Arc<SubscriberHub>,
    period: Duration,
    tick: u64,
}

impl<G: SignalGenerator> AuxiliarySource<G> {
    pub fn new(generator: G, hub: Arc<SubscriberHub>, period: Duration) -> Self {
        Self {
            generator,
            hub,
            period,
            tick: 0,
        }
    }

    /// Generate and publish one sample
    pub fn emit(&mut self) -> Option<AuxSample> {
        let sample = AuxSample {
            t: epoch_seconds(),
            value: self.generator.next_value(self.tick),
        };
        self.tick = self.tick.wrapping_add(1);

        match Event::new(Topic::Aux, &sample) {
            Ok(event) => {
                self.hub.publish(&event);
                Some(sample)
            }
            Err(e) => {
                warn!("Failed to serialize auxiliary sample: {}", e);
                None
            }
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Auxiliary source running every {:?}", self.period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }
            self.emit();
        }

        info!("Auxiliary source stopped after {} samples", self.tick);
    }
}
