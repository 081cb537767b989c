//! # Command Gateway
//!
//! Translates operator commands into outbound MAVLink directives.
//!
//! The gateway is stateless: it looks up the currently attached
//! [`VehicleLink`] on every call, sends one `COMMAND_LONG`, and returns
//! without waiting. Confirmation arrives later as an ordinary heartbeat
//! through the ingestion path.

use mavlink::common::{MavCmd, MavMessage, MavModeFlag, COMMAND_LONG_DATA};
use serde::Serialize;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

use crate::decode::modes::FlightStack;
use crate::error::{BridgeError, Result};

/// Outbound half of a connected packet link
#[cfg_attr(test, mockall::automock)]
pub trait CommandSink: Send + Sync {
    fn send(&self, message: &MavMessage) -> Result<()>;
}

/// Vehicle reachable for commands, learned from the handshake heartbeat
#[derive(Clone)]
pub struct VehicleLink {
    pub sink: Arc<dyn CommandSink>,
    pub target_system: u8,
    pub target_component: u8,
    /// `None` when the vehicle type has no known mode table
    pub stack: Option<FlightStack>,
}

impl std::fmt::Debug for VehicleLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VehicleLink")
            .field("target_system", &self.target_system)
            .field("target_component", &self.target_component)
            .field("stack", &self.stack)
            .finish_non_exhaustive()
    }
}

/// Shared slot the packet link fills while it is connected
#[derive(Debug, Default)]
pub struct VehicleLinkSlot {
    inner: RwLock<Option<VehicleLink>>,
}

impl VehicleLinkSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, link: VehicleLink) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = Some(link);
    }

    pub fn detach(&self) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn current(&self) -> Option<VehicleLink> {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).is_some()
    }
}

/// `{ok, message}` answer returned to the operator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandReply {
    pub ok: bool,
    pub message: String,
}

impl From<Result<()>> for CommandReply {
    fn from(result: Result<()>) -> Self {
        match result {
            Ok(()) => CommandReply {
                ok: true,
                message: "OK".to_string(),
            },
            Err(e) => CommandReply {
                ok: false,
                message: e.to_string(),
            },
        }
    }
}

/// Operator command entry point
#[derive(Debug, Clone)]
pub struct CommandGateway {
    vehicle: Arc<VehicleLinkSlot>,
}

impl CommandGateway {
    pub fn new(vehicle: Arc<VehicleLinkSlot>) -> Self {
        Self { vehicle }
    }

    /// Request a flight mode change
    ///
    /// `mode` must match a mode name exactly (`"GUIDED"`, not `"guided"`).
    ///
    /// # Errors
    ///
    /// - `NotConnected` if no vehicle link is attached
    /// - `UnsupportedMode` if the connected firmware has no such mode;
    ///   nothing is sent in that case
    pub fn set_mode(&self, mode: &str) -> Result<()> {
        let link = self.vehicle.current().ok_or(BridgeError::NotConnected)?;

        let (stack, custom_mode) = link
            .stack
            .and_then(|stack| stack.custom_mode(mode).map(|id| (stack, id)))
            .ok_or_else(|| BridgeError::UnsupportedMode(mode.to_string()))?;

        let (main_mode, sub_mode) = stack.set_mode_params(custom_mode);
        let message = command_long(
            &link,
            MavCmd::MAV_CMD_DO_SET_MODE,
            [
                MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED.bits() as f32,
                main_mode,
                sub_mode,
            ],
        );

        link.sink.send(&message).map_err(|e| {
            warn!("Failed to send mode change to {}: {}", mode, e);
            e
        })?;
        info!("Requested mode {} (custom mode {})", mode, custom_mode);
        Ok(())
    }

    /// Request arming or disarming
    ///
    /// # Errors
    ///
    /// `NotConnected` if no vehicle link is attached
    pub fn set_armed(&self, armed: bool) -> Result<()> {
        let link = self.vehicle.current().ok_or(BridgeError::NotConnected)?;

        let message = command_long(
            &link,
            MavCmd::MAV_CMD_COMPONENT_ARM_DISARM,
            [if armed { 1.0 } else { 0.0 }, 0.0, 0.0],
        );

        link.sink.send(&message)?;
        info!("Requested {}", if armed { "arm" } else { "disarm" });
        Ok(())
    }
}

fn command_long(link: &VehicleLink, command: MavCmd, params: [f32; 3]) -> MavMessage {
    MavMessage::COMMAND_LONG(COMMAND_LONG_DATA {
        target_system: link.target_system,
        target_component: link.target_component,
        command,
        confirmation: 0,
        param1: params[0],
        param2: params[1],
        param3: params[2],
        param4: 0.0,
        param5: 0.0,
        param6: 0.0,
        param7: 0.0,
    })
}
