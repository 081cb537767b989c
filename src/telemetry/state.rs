//! # Shared Telemetry State
//!
//! A single-writer-at-a-time snapshot guarded by a `RwLock`. A merge holds
//! the write lock for the whole delta, so readers see either all of a delta
//! or none of it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::snapshot::{TelemetryDelta, TelemetrySnapshot};

/// Process-wide telemetry state
#[derive(Debug, Default)]
pub struct TelemetryState {
    snapshot: RwLock<TelemetrySnapshot>,
    merges: AtomicU64,
}

impl TelemetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a given snapshot instead of the defaults
    pub fn with_snapshot(snapshot: TelemetrySnapshot) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
            merges: AtomicU64::new(0),
        }
    }

    /// Apply the fields present in `delta`
    ///
    /// Deltas from one caller are applied in call order.
    pub fn merge(&self, delta: &TelemetryDelta) {
        if delta.is_empty() {
            return;
        }
        self.write().apply(delta);
        self.merges.fetch_add(1, Ordering::Relaxed);
    }

    /// Consistent copy of the current snapshot
    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.read().clone()
    }

    /// Number of non-empty deltas merged so far
    pub fn merge_count(&self) -> u64 {
        self.merges.load(Ordering::Relaxed)
    }

    // A panic while holding the lock cannot leave a half-applied delta
    // visible (apply only assigns fields), so poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, TelemetrySnapshot> {
        self.snapshot.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, TelemetrySnapshot> {
        self.snapshot.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_merge_and_snapshot() {
        let state = TelemetryState::new();
        state.merge(&TelemetryDelta {
            alt: Some(5.0),
            ..Default::default()
        });

        let snapshot = state.snapshot();
        assert_eq!(snapshot.alt, 5.0);
        assert_eq!(snapshot.mode, "UNKNOWN");
        assert_eq!(state.merge_count(), 1);
    }

    #[test]
    fn test_empty_delta_is_not_counted() {
        let state = TelemetryState::new();
        state.merge(&TelemetryDelta::default());
        assert_eq!(state.merge_count(), 0);
        assert_eq!(state.snapshot(), TelemetrySnapshot::default());
    }

    #[test]
    fn test_sequential_deltas_apply_in_order() {
        let state = TelemetryState::new();
        for mode in ["STABILIZE", "GUIDED", "RTL"] {
            state.merge(&TelemetryDelta {
                mode: Some(mode.to_string()),
                ..Default::default()
            });
        }
        assert_eq!(state.snapshot().mode, "RTL");
    }

    #[test]
    fn test_readers_never_observe_half_merged_delta() {
        // Every delta writes lat == lon == alt; a torn read would show a mismatch.
        let state = Arc::new(TelemetryState::new());

        let writer = {
            let state = Arc::clone(&state);
            thread::spawn(move || {
                for i in 0..5000 {
                    let v = i as f64;
                    state.merge(&TelemetryDelta {
                        lat: Some(v),
                        lon: Some(v),
                        alt: Some(v),
                        ..Default::default()
                    });
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let state = Arc::clone(&state);
                thread::spawn(move || {
                    for _ in 0..5000 {
                        let s = state.snapshot();
                        assert_eq!(s.lat, s.lon);
                        assert_eq!(s.lon, s.alt);
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(state.snapshot().alt, 4999.0);
    }
}
