//! # Publisher / Fan-out
//!
//! Serialized events delivered to every registered subscriber.
//!
//! This module handles:
//! - The [`Event`] wire format (`{"event": <topic>, "data": {...}}` JSON)
//! - The [`SubscriberHub`] registry with bounded per-subscriber queues
//! - The [`TelemetryPublisher`] ticker that pushes the snapshot at a fixed rate
//!
//! Delivery never waits: a full queue drops that one event for that one
//! subscriber, so a slow client cannot hold up a tick or anyone else.

pub mod hub;
pub mod publisher;

use serde::Serialize;
use std::sync::Arc;

use crate::error::Result;

pub use hub::{DeliveryReport, HubStats, SubscriberHub, Subscription};
pub use publisher::TelemetryPublisher;

/// Logical channel an event is published on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Full telemetry snapshot
    Telemetry,
    /// Auxiliary signal samples
    Aux,
    /// Reply to an operator command
    Command,
}

impl Topic {
    /// Event name on the wire
    pub fn name(self) -> &'static str {
        match self {
            Topic::Telemetry => "telemetry",
            Topic::Aux => "sdr",
            Topic::Command => "command",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Serialize)]
struct Envelope<'a, T> {
    event: &'a str,
    data: &'a T,
}

/// One serialized event, shared by all subscribers it is delivered to
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub topic: Topic,
    /// JSON object, without trailing newline
    pub payload: Arc<str>,
}

impl Event {
    /// Serialize `data` once for the whole fan-out
    ///
    /// # Errors
    ///
    /// `Json` if `data` cannot be represented as JSON.
    pub fn new<T: Serialize>(topic: Topic, data: &T) -> Result<Self> {
        let payload = serde_json::to_string(&Envelope {
            event: topic.name(),
            data,
        })?;
        Ok(Self {
            topic,
            payload: payload.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandReply;
    use crate::telemetry::TelemetrySnapshot;

    #[test]
    fn test_topic_names() {
        assert_eq!(Topic::Telemetry.name(), "telemetry");
        assert_eq!(Topic::Aux.name(), "sdr");
        assert_eq!(Topic::Command.to_string(), "command");
    }

    #[test]
    fn test_telemetry_event_is_flat_record() {
        let snapshot = TelemetrySnapshot {
            lat: 19.4,
            lon: -99.1,
            alt: 12.5,
            mode: "GUIDED".to_string(),
            ..Default::default()
        };
        let event = Event::new(Topic::Telemetry, &snapshot).unwrap();
        let value: serde_json::Value = serde_json::from_str(&event.payload).unwrap();

        assert_eq!(value["event"], "telemetry");
        assert_eq!(value["data"]["lat"], 19.4);
        assert_eq!(value["data"]["mode"], "GUIDED");
        assert_eq!(value["data"]["armed"], false);
        assert!(!event.payload.contains('\n'));
    }

    #[test]
    fn test_command_event() {
        let reply = CommandReply {
            ok: false,
            message: "MAVLink link not connected".to_string(),
        };
        let event = Event::new(Topic::Command, &reply).unwrap();
        assert_eq!(
            &*event.payload,
            r#"{"event":"command","data":{"ok":false,"message":"MAVLink link not connected"}}"#
        );
    }
}
