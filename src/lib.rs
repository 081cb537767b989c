//! # Telemetry Bridge Library
//!
//! Ingest live vehicle telemetry and fan it out to real-time subscribers.
//!
//! A link adapter (MAVLink packets or a tagged serial line) feeds a decoder,
//! decoded deltas are merged into one shared snapshot, and a publisher
//! pushes that snapshot, plus an auxiliary signal, to every connected
//! subscriber. Operator commands (flight mode, arm/disarm) travel the
//! other way through the command gateway.

pub mod auxiliary;
pub mod command;
pub mod config;
pub mod decode;
pub mod error;
pub mod ingest;
pub mod link;
pub mod logging;
pub mod publish;
pub mod server;
pub mod telemetry;
