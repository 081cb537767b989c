//! # Telemetry Snapshot and Delta
//!
//! Position is WGS84 degrees and meters relative to home, speed is m/s,
//! attitude is degrees, voltage is volts.

use serde::Serialize;

/// Mode string reported before any heartbeat or `MODE:` field arrives
pub const DEFAULT_MODE: &str = "UNKNOWN";

/// Full current telemetry record, published as a flat key-value object
///
/// Fields only one link variant produces (attitude, voltage, satellites,
/// ground speed) are omitted from the published record until decoded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    /// Latitude in degrees
    pub lat: f64,

    /// Longitude in degrees
    pub lon: f64,

    /// Altitude relative to home in meters
    pub alt: f64,

    /// Ground speed in m/s
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groundspeed: Option<f64>,

    /// Yaw in degrees
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yaw: Option<f64>,

    /// Pitch in degrees
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pitch: Option<f64>,

    /// Roll in degrees
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roll: Option<f64>,

    /// Battery remaining (0-100%), `null` while unknown
    pub battery: Option<u8>,

    /// Battery voltage in volts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voltage: Option<f64>,

    /// Human-readable flight mode
    pub mode: String,

    /// Safety-armed flag
    pub armed: bool,

    /// GPS fix type ordinal (0 = no GPS, 3 = 3D fix, ...)
    pub fix_type: u8,

    /// Visible satellites
    #[serde(skip_serializing_if = "Option::is_none")]
    pub satellites: Option<u8>,
}

impl Default for TelemetrySnapshot {
    fn default() -> Self {
        Self {
            lat: 0.0,
            lon: 0.0,
            alt: 0.0,
            groundspeed: None,
            yaw: None,
            pitch: None,
            roll: None,
            battery: None,
            voltage: None,
            mode: DEFAULT_MODE.to_string(),
            armed: false,
            fix_type: 0,
            satellites: None,
        }
    }
}

/// Partial update decoded from one frame or line
///
/// `None` means "not carried by this frame"; merging leaves such fields
/// untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryDelta {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub alt: Option<f64>,
    pub groundspeed: Option<f64>,
    pub yaw: Option<f64>,
    pub pitch: Option<f64>,
    pub roll: Option<f64>,
    pub battery: Option<u8>,
    pub voltage: Option<f64>,
    pub mode: Option<String>,
    pub armed: Option<bool>,
    pub fix_type: Option<u8>,
    pub satellites: Option<u8>,
}

impl TelemetryDelta {
    /// True when the delta carries no field at all
    pub fn is_empty(&self) -> bool {
        *self == TelemetryDelta::default()
    }
}

impl TelemetrySnapshot {
    /// Overwrite every field present in `delta`
    pub fn apply(&mut self, delta: &TelemetryDelta) {
        if let Some(lat) = delta.lat {
            self.lat = lat;
        }
        if let Some(lon) = delta.lon {
            self.lon = lon;
        }
        if let Some(alt) = delta.alt {
            self.alt = alt;
        }
        if let Some(speed) = delta.groundspeed {
            self.groundspeed = Some(speed);
        }
        if let Some(yaw) = delta.yaw {
            self.yaw = Some(yaw);
        }
        if let Some(pitch) = delta.pitch {
            self.pitch = Some(pitch);
        }
        if let Some(roll) = delta.roll {
            self.roll = Some(roll);
        }
        if let Some(battery) = delta.battery {
            self.battery = Some(battery);
        }
        if let Some(voltage) = delta.voltage {
            self.voltage = Some(voltage);
        }
        if let Some(mode) = &delta.mode {
            self.mode.clone_from(mode);
        }
        if let Some(armed) = delta.armed {
            self.armed = armed;
        }
        if let Some(fix) = delta.fix_type {
            self.fix_type = fix;
        }
        if let Some(satellites) = delta.satellites {
            self.satellites = Some(satellites);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_snapshot() {
        let snapshot = TelemetrySnapshot::default();
        assert_eq!(snapshot.mode, "UNKNOWN");
        assert!(!snapshot.armed);
        assert_eq!(snapshot.battery, None);
        assert_eq!(snapshot.fix_type, 0);
    }

    #[test]
    fn test_apply_only_touches_present_fields() {
        let mut snapshot = TelemetrySnapshot::default();
        snapshot.battery = Some(80);
        snapshot.mode = "LOITER".to_string();

        let delta = TelemetryDelta {
            lat: Some(19.4),
            lon: Some(-99.1),
            ..Default::default()
        };
        snapshot.apply(&delta);

        assert_eq!(snapshot.lat, 19.4);
        assert_eq!(snapshot.lon, -99.1);
        assert_eq!(snapshot.battery, Some(80));
        assert_eq!(snapshot.mode, "LOITER");
        assert_eq!(snapshot.alt, 0.0);
    }

    #[test]
    fn test_apply_same_delta_twice_is_idempotent() {
        let delta = TelemetryDelta {
            alt: Some(12.5),
            mode: Some("GUIDED".to_string()),
            armed: Some(true),
            ..Default::default()
        };

        let mut once = TelemetrySnapshot::default();
        once.apply(&delta);
        let mut twice = once.clone();
        twice.apply(&delta);

        assert_eq!(once, twice);
    }

    #[test]
    fn test_empty_delta() {
        assert!(TelemetryDelta::default().is_empty());
        let delta = TelemetryDelta {
            armed: Some(false),
            ..Default::default()
        };
        assert!(!delta.is_empty());
    }

    #[test]
    fn test_serialized_record_is_flat_and_omits_unset_variant_fields() {
        let snapshot = TelemetrySnapshot::default();
        let value = serde_json::to_value(&snapshot).unwrap();

        assert_eq!(value["mode"], "UNKNOWN");
        assert_eq!(value["armed"], false);
        assert!(value["battery"].is_null());
        assert!(value.get("yaw").is_none());
        assert!(value.get("satellites").is_none());

        let mut snapshot = snapshot;
        snapshot.yaw = Some(90.0);
        snapshot.satellites = Some(9);
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["yaw"], 90.0);
        assert_eq!(value["satellites"], 9);
    }
}
