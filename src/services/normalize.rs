use crate::models::genius::{
    mode_code, zone_type, Mode, RawDatapoint, RawRoomZone, RawSwitchZone, RawZoneHeader, Room, Switch,
    ZoneSet, BATTERY_ADDR, LUMINANCE_ADDR,
};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;

/// A raw record that could not be decoded. Carries the JSON path of the offending field.
#[derive(Debug)]
pub struct NormalizeError {
    pub index: usize,
    pub path: String,
    pub source: serde_json::Error,
}

impl fmt::Display for NormalizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "zone record #{} malformed at `{}`: {}", self.index, self.path, self.source)
    }
}

impl std::error::Error for NormalizeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Collapse a hub mode code into the bridge's thermostat mode.
pub fn parse_mode(code: i64) -> Mode {
    match code {
        mode_code::OFF => Mode::Off,
        mode_code::TIMER | mode_code::FOOTPRINT | mode_code::AWAY | mode_code::EARLY | mode_code::LINKED => {
            Mode::Auto
        }
        mode_code::BOOST => Mode::Heat,
        mode_code::TEST | mode_code::OTHER => Mode::Unknown,
        _ => Mode::Unknown,
    }
}

/// Normalize a full `zones` payload. Malformed records are skipped with a warning.
pub fn parse_zone_data(raw: &[Value]) -> ZoneSet {
    let mut zones = ZoneSet::default();
    for (index, record) in raw.iter().enumerate() {
        if let Err(e) = parse_zone_record(index, record, &mut zones) {
            warn!("Skipping {}", e);
        }
    }
    zones
}

fn parse_zone_record(index: usize, record: &Value, zones: &mut ZoneSet) -> Result<(), NormalizeError> {
    let header: RawZoneHeader = decode(index, record)?;
    match header.zone_type {
        zone_type::HOUSE => {
            if let Some(id) = header.id {
                zones.houses.insert(id);
            }
        }
        zone_type::SWITCH => {
            let raw: RawSwitchZone = decode(index, record)?;
            // Switch zones without nodes are hot water; not handled.
            if raw.nodes.is_empty() {
                debug!("Ignoring hot water zone {} ({})", raw.name, raw.id);
                return Ok(());
            }
            let switch = switch_from_raw(raw);
            zones.switches.insert(switch.id, switch);
        }
        zone_type::ROOM => {
            let raw: RawRoomZone = decode(index, record)?;
            let room = room_from_raw(raw);
            zones.rooms.insert(room.id, room);
        }
        other => debug!("Ignoring zone record #{} with unknown type {}", index, other),
    }
    Ok(())
}

fn decode<T: DeserializeOwned>(index: usize, record: &Value) -> Result<T, NormalizeError> {
    serde_path_to_error::deserialize(record.clone()).map_err(|e| NormalizeError {
        index,
        path: e.path().to_string(),
        source: e.into_inner(),
    })
}

fn switch_from_raw(raw: RawSwitchZone) -> Switch {
    Switch {
        id: raw.id,
        name: raw.name,
        state: raw.setpoint == 1.0,
    }
}

fn room_from_raw(raw: RawRoomZone) -> Room {
    Room {
        id: raw.id,
        name: raw.name,
        mode: parse_mode(raw.mode),
        default_mode: raw.base_mode,
        default_override_duration: raw.override_duration,
        temperature: raw.process_value,
        setpoint: raw.setpoint,
        battery: datapoint_values(&raw.datapoints, BATTERY_ADDR).reduce(f64::min),
        luminance: datapoint_values(&raw.datapoints, LUMINANCE_ADDR).reduce(f64::max),
    }
}

fn datapoint_values<'a>(datapoints: &'a [RawDatapoint], addr: &'a str) -> impl Iterator<Item = f64> + 'a {
    datapoints.iter().filter(move |d| d.addr == addr).map(|d| d.val)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::genius::ZoneId;
    use serde_json::json;

    fn load_fixture() -> Vec<Value> {
        let json = std::fs::read_to_string("tests/data/zones.json").expect("fixture present");
        let envelope: crate::models::genius::ZonesResponse = serde_json::from_str(&json).expect("parse zones");
        envelope.data
    }

    fn room_record(datapoints: Value) -> Value {
        json!({
            "iType": 3,
            "iID": 7,
            "strName": "Study",
            "iMode": 2,
            "iBaseMode": 2,
            "iOverrideDuration": 3600,
            "fPV": 19.5,
            "fSP": 20.0,
            "nodes": [{"addr": "5"}],
            "datapoints": datapoints,
        })
    }

    #[test]
    fn mode_table_matches_hub_codes() {
        let cases = [
            (1, Mode::Off),
            (2, Mode::Auto),
            (4, Mode::Auto),
            (8, Mode::Auto),
            (16, Mode::Heat),
            (32, Mode::Auto),
            (64, Mode::Unknown),
            (128, Mode::Auto),
            (256, Mode::Unknown),
            (0, Mode::Unknown),
            (3, Mode::Unknown),
            (-1, Mode::Unknown),
            (512, Mode::Unknown),
        ];
        for (code, expected) in cases {
            assert_eq!(parse_mode(code), expected, "code {code}");
        }
    }

    #[test]
    fn fixture_normalizes_into_switches_and_rooms() {
        let zones = parse_zone_data(&load_fixture());

        assert_eq!(zones.houses.len(), 1);
        assert!(zones.houses.contains(&ZoneId(0)));

        // zone 2 is hot water (no nodes)
        assert_eq!(zones.switches.len(), 1);
        let boiler = &zones.switches[&ZoneId(3)];
        assert_eq!(boiler.name, "Boiler");
        assert!(boiler.state);
        assert!(!zones.switches.contains_key(&ZoneId(2)));

        assert_eq!(zones.rooms.len(), 2);
        let lounge = &zones.rooms[&ZoneId(5)];
        assert_eq!(lounge.name, "Lounge");
        assert_eq!(lounge.mode, Mode::Auto);
        assert_eq!(lounge.default_mode, 2);
        assert_eq!(lounge.default_override_duration, 3600);
        assert_eq!(lounge.temperature, 19.5);
        assert_eq!(lounge.setpoint, 20.0);
        assert_eq!(lounge.battery, Some(60.0));
        assert_eq!(lounge.luminance, Some(48.0));

        let bedroom = &zones.rooms[&ZoneId(6)];
        assert_eq!(bedroom.mode, Mode::Heat);
        assert_eq!(bedroom.battery, None);
        assert_eq!(bedroom.luminance, None);
    }

    #[test]
    fn switch_without_nodes_is_hot_water() {
        let raw = vec![json!({"iType": 2, "iID": 9, "strName": "Hot Water", "fSP": 1.0, "nodes": []})];
        assert!(parse_zone_data(&raw).switches.is_empty());
    }

    #[test]
    fn switch_state_is_on_only_for_setpoint_one() {
        let raw = vec![
            json!({"iType": 2, "iID": 1, "strName": "A", "fSP": 1, "nodes": [{}]}),
            json!({"iType": 2, "iID": 2, "strName": "B", "fSP": 0, "nodes": [{}]}),
            json!({"iType": 2, "iID": 3, "strName": "C", "fSP": 0.5, "nodes": [{}]}),
        ];
        let zones = parse_zone_data(&raw);
        assert!(zones.switches[&ZoneId(1)].state);
        assert!(!zones.switches[&ZoneId(2)].state);
        assert!(!zones.switches[&ZoneId(3)].state);
    }

    #[test]
    fn battery_takes_minimum_and_luminance_maximum() {
        let raw = vec![room_record(json!([
            {"addr": "Battery", "val": 80},
            {"addr": "Battery", "val": 60},
            {"addr": "LUMINANCE", "val": 12},
            {"addr": "LUMINANCE", "val": 30},
            {"addr": "TEMPERATURE", "val": 99},
        ]))];
        let room = &parse_zone_data(&raw).rooms[&ZoneId(7)];
        assert_eq!(room.battery, Some(60.0));
        assert_eq!(room.luminance, Some(30.0));
    }

    #[test]
    fn missing_datapoints_leave_readings_absent() {
        let raw = vec![room_record(json!([]))];
        let room = &parse_zone_data(&raw).rooms[&ZoneId(7)];
        assert_eq!(room.battery, None);
        assert_eq!(room.luminance, None);
    }

    #[test]
    fn malformed_record_is_skipped_not_fatal() {
        let raw = vec![
            json!({"iType": 3, "iID": 1, "strName": "Broken", "iMode": "two"}),
            json!({"strName": "no type"}),
            room_record(json!([])),
        ];
        let zones = parse_zone_data(&raw);
        assert_eq!(zones.rooms.len(), 1);
        assert!(zones.rooms.contains_key(&ZoneId(7)));
    }

    #[test]
    fn decode_error_names_the_field_path() {
        let record = json!({"iType": 3, "iID": 1, "strName": "Broken", "iMode": "two"});
        let err = decode::<RawRoomZone>(4, &record).expect_err("iMode is not a number");
        assert_eq!(err.index, 4);
        assert_eq!(err.path, "iMode");
    }

    #[test]
    fn unknown_zone_types_are_ignored() {
        let raw = vec![json!({"iType": 9, "iID": 1, "strName": "Mystery"})];
        assert!(parse_zone_data(&raw).is_empty());
    }
}
