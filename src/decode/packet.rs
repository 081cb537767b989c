//! # MAVLink Packet Decoder
//!
//! Decodes typed MAVLink messages into telemetry deltas.
//!
//! | Message | Fields set |
//! |---------|-----------|
//! | `GLOBAL_POSITION_INT` | lat, lon (deg × 10^7), alt (relative, mm) |
//! | `VFR_HUD` | ground speed (m/s) |
//! | `SYS_STATUS` | battery % (unless -1 = not supported) |
//! | `HEARTBEAT` | mode string, armed flag |
//! | `GPS_RAW_INT` | fix type, satellites visible |
//!
//! Every other message kind is ignored, and so are heartbeats that do not
//! come from the vehicle itself (see [`is_vehicle_heartbeat`]).

use mavlink::common::{
    MavMessage, MavType, GLOBAL_POSITION_INT_DATA, GPS_RAW_INT_DATA, HEARTBEAT_DATA,
    SYS_STATUS_DATA, VFR_HUD_DATA,
};
use mavlink::MavHeader;

use super::modes::{is_armed, mode_string};
use super::{DecodeOutcome, FrameDecoder};
use crate::error::DecodeError;
use crate::telemetry::TelemetryDelta;

/// `SYS_STATUS.battery_remaining` value meaning "not supported"
pub const BATTERY_REMAINING_UNKNOWN: i8 = -1;

/// `GPS_RAW_INT.satellites_visible` value meaning "unknown"
pub const SATELLITES_UNKNOWN: u8 = u8::MAX;

/// `MAV_COMP_ID_GIMBAL`
pub const GIMBAL_COMPONENT_ID: u8 = 154;

/// Whether a heartbeat type can describe the vehicle
///
/// Ground stations, gimbals, ADS-B receivers and companion computers share
/// the link and send heartbeats of their own.
pub fn is_vehicle_type(mavtype: MavType) -> bool {
    !matches!(
        mavtype,
        MavType::MAV_TYPE_GCS
            | MavType::MAV_TYPE_GIMBAL
            | MavType::MAV_TYPE_ADSB
            | MavType::MAV_TYPE_ONBOARD_CONTROLLER
    )
}

/// Whether a heartbeat was sent by the vehicle rather than a peer on the link
pub fn is_vehicle_heartbeat(header: &MavHeader, data: &HEARTBEAT_DATA) -> bool {
    header.component_id != GIMBAL_COMPONENT_ID && is_vehicle_type(data.mavtype)
}

/// One framed, typed message received from the packet link
#[derive(Debug, Clone)]
pub struct PacketFrame {
    pub header: MavHeader,
    pub message: MavMessage,
}

impl PacketFrame {
    /// The heartbeat payload, when this frame is a vehicle heartbeat
    pub fn vehicle_heartbeat(&self) -> Option<&HEARTBEAT_DATA> {
        match &self.message {
            MavMessage::HEARTBEAT(hb) if is_vehicle_heartbeat(&self.header, hb) => Some(hb),
            _ => None,
        }
    }
}

/// Stateless decoder for [`PacketFrame`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct PacketDecoder;

impl FrameDecoder for PacketDecoder {
    type Frame = PacketFrame;

    fn decode(&mut self, frame: &PacketFrame) -> DecodeOutcome {
        if matches!(frame.message, MavMessage::HEARTBEAT(_)) && frame.vehicle_heartbeat().is_none() {
            return DecodeOutcome::ignored();
        }

        match decode_message(&frame.message) {
            Ok(Some(delta)) => DecodeOutcome::from_parts(delta, Vec::new()),
            Ok(None) => DecodeOutcome::ignored(),
            Err(e) => DecodeOutcome {
                delta: None,
                errors: vec![e],
            },
        }
    }
}

/// Decode a single MAVLink message
///
/// # Returns
///
/// * `Ok(Some(delta))` - a recognized kind with usable fields
/// * `Ok(None)` - a kind that carries nothing for the snapshot
///
/// # Errors
///
/// Returns `MalformedMessage` for a recognized kind whose payload is out of
/// range (non-finite speed, impossible coordinates, battery above 100%).
pub fn decode_message(message: &MavMessage) -> Result<Option<TelemetryDelta>, DecodeError> {
    match message {
        MavMessage::GLOBAL_POSITION_INT(data) => decode_global_position(data).map(Some),
        MavMessage::VFR_HUD(data) => decode_vfr_hud(data).map(Some),
        MavMessage::SYS_STATUS(data) => decode_sys_status(data),
        MavMessage::HEARTBEAT(data) => Ok(decode_heartbeat(data)),
        MavMessage::GPS_RAW_INT(data) => Ok(Some(decode_gps_raw(data))),
        _ => Ok(None),
    }
}

fn malformed(kind: &'static str, reason: impl Into<String>) -> DecodeError {
    DecodeError::MalformedMessage {
        kind,
        reason: reason.into(),
    }
}

fn decode_global_position(data: &GLOBAL_POSITION_INT_DATA) -> Result<TelemetryDelta, DecodeError> {
    // Degrees × 10^7
    let lat = data.lat as f64 / 10_000_000.0;
    let lon = data.lon as f64 / 10_000_000.0;

    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(malformed(
            "GLOBAL_POSITION_INT",
            format!("coordinates out of range: {}, {}", lat, lon),
        ));
    }

    Ok(TelemetryDelta {
        lat: Some(lat),
        lon: Some(lon),
        // Millimeters above home
        alt: Some(data.relative_alt as f64 / 1000.0),
        ..Default::default()
    })
}

fn decode_vfr_hud(data: &VFR_HUD_DATA) -> Result<TelemetryDelta, DecodeError> {
    if !data.groundspeed.is_finite() {
        return Err(malformed("VFR_HUD", "ground speed is not finite"));
    }

    Ok(TelemetryDelta {
        groundspeed: Some(data.groundspeed as f64),
        ..Default::default()
    })
}

fn decode_sys_status(data: &SYS_STATUS_DATA) -> Result<Option<TelemetryDelta>, DecodeError> {
    match data.battery_remaining {
        BATTERY_REMAINING_UNKNOWN => Ok(None),
        pct @ 0..=100 => Ok(Some(TelemetryDelta {
            battery: Some(pct as u8),
            ..Default::default()
        })),
        other => Err(malformed(
            "SYS_STATUS",
            format!("battery_remaining {} outside 0-100", other),
        )),
    }
}

fn decode_heartbeat(data: &HEARTBEAT_DATA) -> Option<TelemetryDelta> {
    if !is_vehicle_type(data.mavtype) {
        return None;
    }

    Some(TelemetryDelta {
        mode: Some(mode_string(data)),
        armed: Some(is_armed(data)),
        ..Default::default()
    })
}

fn decode_gps_raw(data: &GPS_RAW_INT_DATA) -> TelemetryDelta {
    TelemetryDelta {
        fix_type: Some(data.fix_type as u8),
        satellites: (data.satellites_visible != SATELLITES_UNKNOWN).then_some(data.satellites_visible),
        ..Default::default()
    }
}
