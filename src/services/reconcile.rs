//! Per-field diff between the cache and a fresh fetch.
//!
//! Every tracked field is its own change unit: a room whose setpoint and
//! temperature both moved yields two publications, one per attribute.

use crate::cache::StateCache;
use crate::models::genius::{Attribute, Mode, Named, Publication, Room, Switch, ZoneId, ZoneSet};
use chrono::Utc;
use log::{debug, info};
use std::fmt;

/// Value of a tracked field, compared with plain equality.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    Float(f64),
    Reading(Option<f64>),
    Mode(Mode),
}

impl FieldValue {
    /// MQTT payload; `None` when there is nothing to report.
    pub fn payload(&self) -> Option<String> {
        match self {
            FieldValue::Bool(true) => Some("on".to_string()),
            FieldValue::Bool(false) => Some("off".to_string()),
            FieldValue::Float(v) => Some(v.to_string()),
            FieldValue::Reading(v) => v.map(|v| v.to_string()),
            FieldValue::Mode(m) => Some(m.as_str().to_string()),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bool(v) => write!(f, "{v}"),
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::Reading(Some(v)) => write!(f, "{v}"),
            FieldValue::Reading(None) => f.write_str("-"),
            FieldValue::Mode(m) => write!(f, "{m}"),
        }
    }
}

/// Accessors for one tracked field of `T` and the attribute it is published under.
pub struct TrackedField<T> {
    pub name: &'static str,
    pub attribute: Attribute,
    pub read: fn(&T) -> FieldValue,
    pub copy: fn(&mut T, &T),
}

impl<T> TrackedField<T> {
    pub fn publication(&self, entity: &T) -> Option<Publication>
    where
        T: Named,
    {
        (self.read)(entity).payload().map(|payload| Publication {
            device: entity.name().to_string(),
            attribute: self.attribute,
            payload,
        })
    }
}

pub static SWITCH_FIELDS: [TrackedField<Switch>; 1] = [TrackedField {
    name: "state",
    attribute: Attribute::Switch,
    read: switch_state,
    copy: copy_switch_state,
}];

pub static ROOM_FIELDS: [TrackedField<Room>; 5] = [
    TrackedField {
        name: "mode",
        attribute: Attribute::ThermostatMode,
        read: room_mode,
        copy: copy_room_mode,
    },
    TrackedField {
        name: "setpoint",
        attribute: Attribute::HeatingSetpoint,
        read: room_setpoint,
        copy: copy_room_setpoint,
    },
    TrackedField {
        name: "temperature",
        attribute: Attribute::Temperature,
        read: room_temperature,
        copy: copy_room_temperature,
    },
    TrackedField {
        name: "battery",
        attribute: Attribute::Battery,
        read: room_battery,
        copy: copy_room_battery,
    },
    TrackedField {
        name: "luminance",
        attribute: Attribute::Luminance,
        read: room_luminance,
        copy: copy_room_luminance,
    },
];

fn switch_state(s: &Switch) -> FieldValue {
    FieldValue::Bool(s.state)
}
fn copy_switch_state(cached: &mut Switch, current: &Switch) {
    cached.state = current.state;
}
fn room_mode(r: &Room) -> FieldValue {
    FieldValue::Mode(r.mode)
}
fn copy_room_mode(cached: &mut Room, current: &Room) {
    cached.mode = current.mode;
}
fn room_setpoint(r: &Room) -> FieldValue {
    FieldValue::Float(r.setpoint)
}
fn copy_room_setpoint(cached: &mut Room, current: &Room) {
    cached.setpoint = current.setpoint;
}
fn room_temperature(r: &Room) -> FieldValue {
    FieldValue::Float(r.temperature)
}
fn copy_room_temperature(cached: &mut Room, current: &Room) {
    cached.temperature = current.temperature;
}
fn room_battery(r: &Room) -> FieldValue {
    FieldValue::Reading(r.battery)
}
fn copy_room_battery(cached: &mut Room, current: &Room) {
    cached.battery = current.battery;
}
fn room_luminance(r: &Room) -> FieldValue {
    FieldValue::Reading(r.luminance)
}
fn copy_room_luminance(cached: &mut Room, current: &Room) {
    cached.luminance = current.luminance;
}

/// Copy `field` from `current` into `cached` if it differs, then hand `current` to `publish`.
///
/// Returns whether the field changed. Without a callback only the cache is updated.
pub fn check_for_change<T: Named>(
    cached: &mut T,
    current: &T,
    field: &TrackedField<T>,
    publish: Option<&mut dyn FnMut(&T)>,
) -> bool {
    let before = (field.read)(cached);
    let after = (field.read)(current);
    if before == after {
        return false;
    }

    info!(
        "{} ({}) {} changed from {} to {}",
        current.name(),
        current.id(),
        field.name,
        before,
        after
    );
    (field.copy)(cached, current);

    if let Some(publish) = publish {
        publish(current);
    }
    true
}

#[derive(Debug, Default, PartialEq)]
pub struct ReconcileReport {
    /// Number of fields that changed.
    pub changes: usize,
    /// Values to publish, in detection order. Empty when publishing was off.
    pub publications: Vec<Publication>,
    /// Names of devices seen for the first time in this pass.
    pub new_devices: Vec<String>,
    /// New names of known devices renamed on the hub.
    pub renamed_devices: Vec<String>,
}

/// Fold a fresh fetch into the cache.
///
/// First-seen devices are inserted as-is and reported, not published. Devices
/// missing from `current` stay in the cache untouched. Names and defaults of
/// known devices follow the hub without being published.
pub fn reconcile(cache: &mut StateCache, current: &ZoneSet, publish: bool) -> ReconcileReport {
    let mut report = ReconcileReport::default();

    for (id, switch) in &current.switches {
        match cache.switch_mut(*id) {
            Some(cached) => {
                report.renamed_devices.extend(refresh_switch(cached, switch));
                diff_fields(cached, switch, &SWITCH_FIELDS, publish, &mut report);
            }
            None => {
                debug!("New switch {} ({})", switch.name, id);
                report.new_devices.push(switch.name.clone());
                cache.upsert_switch(switch.clone());
            }
        }
    }

    for (id, room) in &current.rooms {
        match cache.room_mut(*id) {
            Some(cached) => {
                report.renamed_devices.extend(refresh_room(cached, room));
                diff_fields(cached, room, &ROOM_FIELDS, publish, &mut report);
            }
            None => {
                debug!("New room {} ({})", room.name, id);
                report.new_devices.push(room.name.clone());
                cache.upsert_room(room.clone());
            }
        }
    }

    cache.upsert_houses(&current.houses);
    cache.mark_synced(Utc::now());
    report
}

fn refresh_switch(cached: &mut Switch, current: &Switch) -> Option<String> {
    rename(&mut cached.name, &current.name, current.id)
}

fn refresh_room(cached: &mut Room, current: &Room) -> Option<String> {
    cached.default_mode = current.default_mode;
    cached.default_override_duration = current.default_override_duration;
    rename(&mut cached.name, &current.name, current.id)
}

/// Returns the new name if it differs from the cached one.
fn rename(cached: &mut String, current: &str, id: ZoneId) -> Option<String> {
    if cached == current {
        return None;
    }
    info!("Zone {} renamed from {} to {}", id, cached, current);
    *cached = current.to_string();
    Some(current.to_string())
}

fn diff_fields<T: Named>(
    cached: &mut T,
    current: &T,
    fields: &[TrackedField<T>],
    publish: bool,
    report: &mut ReconcileReport,
) {
    for field in fields {
        let publications = &mut report.publications;
        let mut push = |entity: &T| {
            if let Some(p) = field.publication(entity) {
                publications.push(p);
            }
        };
        let callback: Option<&mut dyn FnMut(&T)> = if publish {
            Some(&mut push as &mut dyn FnMut(&T))
        } else {
            None
        };
        if check_for_change(cached, current, field, callback) {
            report.changes += 1;
        }
    }
}

/// Every tracked attribute of every cached device, for a full retained refresh.
pub fn snapshot(cache: &StateCache) -> Vec<Publication> {
    let switches = cache
        .switches()
        .values()
        .flat_map(|s| SWITCH_FIELDS.iter().filter_map(move |f| f.publication(s)));
    let rooms = cache
        .rooms()
        .values()
        .flat_map(|r| ROOM_FIELDS.iter().filter_map(move |f| f.publication(r)));
    switches.chain(rooms).collect()
}
