//! # Telemetry Module
//!
//! The canonical telemetry record and the shared state that merges decoded
//! deltas into it.
//!
//! This module handles:
//! - The single [`TelemetrySnapshot`] both link variants normalize into
//! - [`TelemetryDelta`], the partial update produced by one frame or line
//! - [`TelemetryState`], the only point of mutation, atomic per delta

pub mod snapshot;
pub mod state;

pub use snapshot::{TelemetryDelta, TelemetrySnapshot, DEFAULT_MODE};
pub use state::TelemetryState;
