//! # Flight-Stack Mode Tables
//!
//! Maps heartbeat `custom_mode` values to mode names and back, per
//! autopilot family. The decoder uses these to render the mode string; the
//! command gateway uses them as the set of modes the connected vehicle
//! accepts.
//!
//! ArduPilot picks its table from `MAV_TYPE`. PX4 encodes
//! `main << 16 | sub << 24` in `custom_mode`.

use mavlink::common::{MavAutopilot, MavModeFlag, MavType, HEARTBEAT_DATA};

/// Autopilot firmware family, as far as mode numbering is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightStack {
    ArduCopter,
    ArduPlane,
    ArduRover,
    ArduSub,
    AntennaTracker,
    Px4,
}

const COPTER_MODES: &[(&str, u32)] = &[
    ("STABILIZE", 0),
    ("ACRO", 1),
    ("ALT_HOLD", 2),
    ("AUTO", 3),
    ("GUIDED", 4),
    ("LOITER", 5),
    ("RTL", 6),
    ("CIRCLE", 7),
    ("POSITION", 8),
    ("LAND", 9),
    ("OF_LOITER", 10),
    ("DRIFT", 11),
    ("SPORT", 13),
    ("FLIP", 14),
    ("AUTOTUNE", 15),
    ("POSHOLD", 16),
    ("BRAKE", 17),
    ("THROW", 18),
    ("AVOID_ADSB", 19),
    ("GUIDED_NOGPS", 20),
    ("SMART_RTL", 21),
    ("FLOWHOLD", 22),
    ("FOLLOW", 23),
    ("ZIGZAG", 24),
    ("SYSTEMID", 25),
    ("AUTOROTATE", 26),
    ("AUTO_RTL", 27),
];

const PLANE_MODES: &[(&str, u32)] = &[
    ("MANUAL", 0),
    ("CIRCLE", 1),
    ("STABILIZE", 2),
    ("TRAINING", 3),
    ("ACRO", 4),
    ("FBWA", 5),
    ("FBWB", 6),
    ("CRUISE", 7),
    ("AUTOTUNE", 8),
    ("AUTO", 10),
    ("RTL", 11),
    ("LOITER", 12),
    ("TAKEOFF", 13),
    ("AVOID_ADSB", 14),
    ("GUIDED", 15),
    ("INITIALISING", 16),
    ("QSTABILIZE", 17),
    ("QHOVER", 18),
    ("QLOITER", 19),
    ("QLAND", 20),
    ("QRTL", 21),
    ("QAUTOTUNE", 22),
    ("QACRO", 23),
    ("THERMAL", 24),
    ("LOITERALTQLAND", 25),
];

const ROVER_MODES: &[(&str, u32)] = &[
    ("MANUAL", 0),
    ("ACRO", 1),
    ("LEARNING", 2),
    ("STEERING", 3),
    ("HOLD", 4),
    ("LOITER", 5),
    ("FOLLOW", 6),
    ("SIMPLE", 7),
    ("DOCK", 8),
    ("CIRCLE", 9),
    ("AUTO", 10),
    ("RTL", 11),
    ("SMART_RTL", 12),
    ("GUIDED", 15),
    ("INITIALISING", 16),
];

const SUB_MODES: &[(&str, u32)] = &[
    ("STABILIZE", 0),
    ("ACRO", 1),
    ("ALT_HOLD", 2),
    ("AUTO", 3),
    ("GUIDED", 4),
    ("CIRCLE", 7),
    ("SURFACE", 9),
    ("POSHOLD", 16),
    ("MANUAL", 19),
];

const TRACKER_MODES: &[(&str, u32)] = &[
    ("MANUAL", 0),
    ("STOP", 1),
    ("SCAN", 2),
    ("SERVO_TEST", 3),
    ("AUTO", 10),
    ("INITIALISING", 16),
];

const fn px4_mode(main: u32, sub: u32) -> u32 {
    (main << 16) | (sub << 24)
}

const PX4_MODES: &[(&str, u32)] = &[
    ("MANUAL", px4_mode(1, 0)),
    ("ALTCTL", px4_mode(2, 0)),
    ("POSCTL", px4_mode(3, 0)),
    ("READY", px4_mode(4, 1)),
    ("TAKEOFF", px4_mode(4, 2)),
    ("LOITER", px4_mode(4, 3)),
    ("MISSION", px4_mode(4, 4)),
    ("RTL", px4_mode(4, 5)),
    ("LAND", px4_mode(4, 6)),
    ("RTGS", px4_mode(4, 7)),
    ("FOLLOWME", px4_mode(4, 8)),
    ("PRECLAND", px4_mode(4, 9)),
    ("ACRO", px4_mode(5, 0)),
    ("OFFBOARD", px4_mode(6, 0)),
    ("STABILIZED", px4_mode(7, 0)),
    ("RATTITUDE", px4_mode(8, 0)),
];

impl FlightStack {
    /// Identify the firmware family from a vehicle heartbeat
    pub fn from_heartbeat(heartbeat: &HEARTBEAT_DATA) -> Option<Self> {
        if heartbeat.autopilot == MavAutopilot::MAV_AUTOPILOT_PX4 {
            return Some(FlightStack::Px4);
        }

        match heartbeat.mavtype {
            MavType::MAV_TYPE_QUADROTOR
            | MavType::MAV_TYPE_HEXAROTOR
            | MavType::MAV_TYPE_OCTOROTOR
            | MavType::MAV_TYPE_TRICOPTER
            | MavType::MAV_TYPE_COAXIAL
            | MavType::MAV_TYPE_HELICOPTER
            | MavType::MAV_TYPE_DODECAROTOR => Some(FlightStack::ArduCopter),
            MavType::MAV_TYPE_FIXED_WING => Some(FlightStack::ArduPlane),
            MavType::MAV_TYPE_GROUND_ROVER | MavType::MAV_TYPE_SURFACE_BOAT => {
                Some(FlightStack::ArduRover)
            }
            MavType::MAV_TYPE_SUBMARINE => Some(FlightStack::ArduSub),
            MavType::MAV_TYPE_ANTENNA_TRACKER => Some(FlightStack::AntennaTracker),
            _ => None,
        }
    }

    /// Every mode this firmware accepts, with its `custom_mode` value
    pub fn modes(self) -> &'static [(&'static str, u32)] {
        match self {
            FlightStack::ArduCopter => COPTER_MODES,
            FlightStack::ArduPlane => PLANE_MODES,
            FlightStack::ArduRover => ROVER_MODES,
            FlightStack::ArduSub => SUB_MODES,
            FlightStack::AntennaTracker => TRACKER_MODES,
            FlightStack::Px4 => PX4_MODES,
        }
    }

    pub fn mode_name(self, custom_mode: u32) -> Option<&'static str> {
        self.modes()
            .iter()
            .find(|(_, id)| *id == custom_mode)
            .map(|(name, _)| *name)
    }

    pub fn custom_mode(self, name: &str) -> Option<u32> {
        self.modes()
            .iter()
            .find(|(mode, _)| *mode == name)
            .map(|(_, id)| *id)
    }

    /// `MAV_CMD_DO_SET_MODE` param2/param3 for a `custom_mode`
    pub fn set_mode_params(self, custom_mode: u32) -> (f32, f32) {
        match self {
            FlightStack::Px4 => (
                ((custom_mode >> 16) & 0xFF) as f32,
                ((custom_mode >> 24) & 0xFF) as f32,
            ),
            _ => (custom_mode as f32, 0.0),
        }
    }
}

/// Human-readable mode for a heartbeat
///
/// Unknown combinations render as `Mode(0x..)` (base mode) or `Mode(n)`
/// (custom mode) rather than failing.
pub fn mode_string(heartbeat: &HEARTBEAT_DATA) -> String {
    let stack = FlightStack::from_heartbeat(heartbeat);

    if stack != Some(FlightStack::Px4)
        && !heartbeat
            .base_mode
            .contains(MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED)
    {
        return format!("Mode(0x{:08x})", heartbeat.base_mode.bits());
    }

    match stack.and_then(|s| s.mode_name(heartbeat.custom_mode)) {
        Some(name) => name.to_string(),
        None if stack == Some(FlightStack::Px4) => format!("Mode(0x{:08x})", heartbeat.custom_mode),
        None => format!("Mode({})", heartbeat.custom_mode),
    }
}

/// Safety-armed bit of the heartbeat base mode
///
/// Only `MAV_MODE_FLAG_SAFETY_ARMED` is consulted.
pub fn is_armed(heartbeat: &HEARTBEAT_DATA) -> bool {
    heartbeat
        .base_mode
        .contains(MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED)
}
