//! Models for the Genius Hub v3 zone API and the bridge's normalized view of it.
//!
//! Raw types mirror the hub JSON (Hungarian-notation field names). Normalized
//! types carry only what the bridge tracks and publishes.

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

// =====================
// Identifiers and codes
// =====================

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(transparent)]
pub struct ZoneId(pub i64);

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Zone type codes (`iType`).
pub mod zone_type {
    pub const HOUSE: i64 = 1;
    pub const SWITCH: i64 = 2;
    pub const ROOM: i64 = 3;
}

/// Zone mode codes (`iMode`).
pub mod mode_code {
    pub const OFF: i64 = 1;
    pub const TIMER: i64 = 2;
    pub const FOOTPRINT: i64 = 4;
    pub const AWAY: i64 = 8;
    pub const BOOST: i64 = 16;
    pub const EARLY: i64 = 32;
    pub const TEST: i64 = 64;
    pub const LINKED: i64 = 128;
    pub const OTHER: i64 = 256;
}

/// Datapoint address tags aggregated into room readings.
pub const BATTERY_ADDR: &str = "Battery";
pub const LUMINANCE_ADDR: &str = "LUMINANCE";

// =====================
// Raw hub records
// =====================

/// Envelope of `GET /v3/zones`.
#[derive(Debug, Clone, Deserialize)]
pub struct ZonesResponse {
    pub data: Vec<serde_json::Value>,
}

/// Only the type code, read first to decide how to decode the rest.
#[derive(Debug, Clone, Deserialize)]
pub struct RawZoneHeader {
    #[serde(rename = "iType")]
    pub zone_type: i64,
    #[serde(rename = "iID", default)]
    pub id: Option<ZoneId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawSwitchZone {
    #[serde(rename = "iID")]
    pub id: ZoneId,
    #[serde(rename = "strName")]
    pub name: String,
    #[serde(rename = "fSP")]
    pub setpoint: f64,
    pub nodes: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawRoomZone {
    #[serde(rename = "iID")]
    pub id: ZoneId,
    #[serde(rename = "strName")]
    pub name: String,
    #[serde(rename = "iMode")]
    pub mode: i64,
    #[serde(rename = "iBaseMode")]
    pub base_mode: i64,
    #[serde(rename = "iOverrideDuration")]
    pub override_duration: u64,
    #[serde(rename = "fPV")]
    pub process_value: f64,
    #[serde(rename = "fSP")]
    pub setpoint: f64,
    #[serde(default)]
    pub datapoints: Vec<RawDatapoint>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawDatapoint {
    pub addr: String,
    pub val: f64,
}

// =====================
// Normalized model
// =====================

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Mode {
    Off,
    Auto,
    Heat,
    Unknown,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Off => "off",
            Mode::Auto => "auto",
            Mode::Heat => "heat",
            Mode::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(Mode::Off),
            "auto" => Ok(Mode::Auto),
            "heat" => Ok(Mode::Heat),
            "unknown" => Ok(Mode::Unknown),
            other => Err(format!("unrecognised thermostat mode `{other}`")),
        }
    }
}

/// Heating-loop relay zone.
#[derive(Debug, Clone, PartialEq)]
pub struct Switch {
    pub id: ZoneId,
    pub name: String,
    pub state: bool,
}

/// Thermostat-controlled zone.
#[derive(Debug, Clone, PartialEq)]
pub struct Room {
    pub id: ZoneId,
    pub name: String,
    pub mode: Mode,
    /// Raw mode code the room returns to when it leaves `off`.
    pub default_mode: i64,
    /// Seconds.
    pub default_override_duration: u64,
    pub temperature: f64,
    pub setpoint: f64,
    /// Lowest reported battery level; `None` when the room has no battery datapoint.
    pub battery: Option<f64>,
    /// Highest reported luminance; `None` when the room has no luminance datapoint.
    pub luminance: Option<f64>,
}

/// Anything addressable by its hub-assigned name.
pub trait Named {
    fn id(&self) -> ZoneId;
    fn name(&self) -> &str;
}

impl Named for Switch {
    fn id(&self) -> ZoneId {
        self.id
    }
    fn name(&self) -> &str {
        &self.name
    }
}

impl Named for Room {
    fn id(&self) -> ZoneId {
        self.id
    }
    fn name(&self) -> &str {
        &self.name
    }
}

/// One normalized fetch. House zones only contribute their id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZoneSet {
    pub houses: BTreeSet<ZoneId>,
    pub switches: BTreeMap<ZoneId, Switch>,
    pub rooms: BTreeMap<ZoneId, Room>,
}

impl ZoneSet {
    pub fn len(&self) -> usize {
        self.houses.len() + self.switches.len() + self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =====================
// MQTT attributes
// =====================

/// Per-device attribute segment of a topic.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Attribute {
    Switch,
    ThermostatMode,
    HeatingSetpoint,
    Temperature,
    Battery,
    Luminance,
}

impl Attribute {
    pub fn as_str(&self) -> &'static str {
        match self {
            Attribute::Switch => "switch",
            Attribute::ThermostatMode => "thermostatMode",
            Attribute::HeatingSetpoint => "heatingSetpoint",
            Attribute::Temperature => "temperature",
            Attribute::Battery => "battery",
            Attribute::Luminance => "luminance",
        }
    }

    /// Attributes accepted as inbound commands.
    pub fn is_command(&self) -> bool {
        matches!(
            self,
            Attribute::Switch | Attribute::ThermostatMode | Attribute::HeatingSetpoint
        )
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Attribute {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "switch" => Ok(Attribute::Switch),
            "thermostatMode" => Ok(Attribute::ThermostatMode),
            "heatingSetpoint" => Ok(Attribute::HeatingSetpoint),
            "temperature" => Ok(Attribute::Temperature),
            "battery" => Ok(Attribute::Battery),
            "luminance" => Ok(Attribute::Luminance),
            other => Err(format!("unknown attribute `{other}`")),
        }
    }
}

/// One retained value to publish under `<prefix>/<device>/<attribute>`.
#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    pub device: String,
    pub attribute: Attribute,
    pub payload: String,
}
