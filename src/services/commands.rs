//! Inbound MQTT commands and the decision whether they warrant a hub call.
//!
//! Dispatch only reads the cache. Whatever the hub does with a call shows up
//! in the cache on a later poll.

use crate::cache::StateCache;
use crate::client::ApiCall;
use crate::models::genius::{mode_code, Attribute, Mode};
use log::debug;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CommandKind {
    SwitchState(bool),
    HeatingSetpoint(f64),
    ThermostatMode(Mode),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub device: String,
    pub kind: CommandKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchError {
    /// The attribute is published by the bridge, not accepted from clients.
    NotACommand(Attribute),
    InvalidPayload {
        device: String,
        attribute: Attribute,
        payload: String,
    },
    UnknownSwitch(String),
    UnknownRoom(String),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::NotACommand(a) => write!(f, "attribute {} is not a command", a),
            DispatchError::InvalidPayload {
                device,
                attribute,
                payload,
            } => write!(f, "invalid {} payload `{}` for {}", attribute, payload, device),
            DispatchError::UnknownSwitch(name) => write!(f, "no switch named `{}`", name),
            DispatchError::UnknownRoom(name) => write!(f, "no room named `{}`", name),
        }
    }
}

impl std::error::Error for DispatchError {}

impl Command {
    /// Interpret a message received on `<prefix>/<device>/<attribute>`.
    ///
    /// Anything other than `on` turns a switch off.
    pub fn parse(device: &str, attribute: Attribute, payload: &str) -> Result<Self, DispatchError> {
        let invalid = || DispatchError::InvalidPayload {
            device: device.to_string(),
            attribute,
            payload: payload.to_string(),
        };
        let kind = match attribute {
            Attribute::Switch => CommandKind::SwitchState(payload == "on"),
            Attribute::HeatingSetpoint => {
                let setpoint = payload.trim().parse::<f64>().map_err(|_| invalid())?;
                if !setpoint.is_finite() {
                    return Err(invalid());
                }
                CommandKind::HeatingSetpoint(setpoint)
            }
            Attribute::ThermostatMode => CommandKind::ThermostatMode(payload.parse::<Mode>().map_err(|_| invalid())?),
            other => return Err(DispatchError::NotACommand(other)),
        };
        Ok(Command {
            device: device.to_string(),
            kind,
        })
    }
}

/// Decide which hub call, if any, brings the device to the requested state.
///
/// `Ok(None)` means the cache already reflects the request.
pub fn dispatch(cache: &StateCache, command: &Command) -> Result<Option<ApiCall>, DispatchError> {
    let name = command.device.as_str();
    match command.kind {
        CommandKind::SwitchState(on) => {
            let cached = cache
                .find_switch_by_name(name)
                .ok_or_else(|| DispatchError::UnknownSwitch(name.to_string()))?;
            if cached.state == on {
                return Ok(None);
            }
            debug!("Received request to set {} ({}) state to {}", name, cached.id, on);
            Ok(Some(ApiCall::SetSwitchState {
                zone_id: cached.id,
                on,
            }))
        }
        CommandKind::HeatingSetpoint(setpoint) => {
            let cached = cache
                .find_room_by_name(name)
                .ok_or_else(|| DispatchError::UnknownRoom(name.to_string()))?;
            debug!("Received request to set {} ({}) setpoint to {}", name, cached.id, setpoint);
            if cached.setpoint == setpoint {
                debug!("{} setpoint already {}", name, setpoint);
                return Ok(None);
            }
            Ok(Some(ApiCall::SetRoomSetpoint {
                zone_id: cached.id,
                setpoint,
            }))
        }
        CommandKind::ThermostatMode(mode) => {
            let cached = cache
                .find_room_by_name(name)
                .ok_or_else(|| DispatchError::UnknownRoom(name.to_string()))?;
            debug!("Received request to set {} ({}) mode to {}", name, cached.id, mode);
            if cached.mode == mode {
                debug!("{} mode already {}", name, mode);
                return Ok(None);
            }
            let call = match mode {
                Mode::Heat => ApiCall::SetZoneToOverride {
                    zone_id: cached.id,
                    duration: Some(cached.default_override_duration),
                },
                Mode::Off => ApiCall::SetZoneMode {
                    zone_id: cached.id,
                    mode: mode_code::OFF,
                },
                Mode::Auto | Mode::Unknown => ApiCall::SetZoneMode {
                    zone_id: cached.id,
                    mode: cached.default_mode,
                },
            };
            Ok(Some(call))
        }
    }
}
