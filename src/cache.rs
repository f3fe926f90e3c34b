//! In-memory view of the hub's last known state.
//!
//! The cache is rebuilt from the first fetch after every start and then only
//! mutated by the reconcile pass. Everything that touches it goes through
//! [`SharedCache`], so a reader never sees a half-applied pass.

use crate::models::genius::{Named, Room, Switch, ZoneId};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
pub struct StateCache {
    houses: BTreeSet<ZoneId>,
    switches: BTreeMap<ZoneId, Switch>,
    rooms: BTreeMap<ZoneId, Room>,
    last_synced: Option<DateTime<Utc>>,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn switch(&self, id: ZoneId) -> Option<&Switch> {
        self.switches.get(&id)
    }

    pub fn switch_mut(&mut self, id: ZoneId) -> Option<&mut Switch> {
        self.switches.get_mut(&id)
    }

    pub fn room(&self, id: ZoneId) -> Option<&Room> {
        self.rooms.get(&id)
    }

    pub fn room_mut(&mut self, id: ZoneId) -> Option<&mut Room> {
        self.rooms.get_mut(&id)
    }

    pub fn switches(&self) -> &BTreeMap<ZoneId, Switch> {
        &self.switches
    }

    pub fn rooms(&self) -> &BTreeMap<ZoneId, Room> {
        &self.rooms
    }

    pub fn houses(&self) -> &BTreeSet<ZoneId> {
        &self.houses
    }

    pub fn upsert_switch(&mut self, switch: Switch) {
        self.switches.insert(switch.id, switch);
    }

    pub fn upsert_room(&mut self, room: Room) {
        self.rooms.insert(room.id, room);
    }

    pub fn upsert_houses(&mut self, houses: &BTreeSet<ZoneId>) {
        self.houses.extend(houses.iter().copied());
    }

    pub fn find_switch_by_name(&self, name: &str) -> Option<&Switch> {
        find_by_name(&self.switches, name)
    }

    pub fn find_room_by_name(&self, name: &str) -> Option<&Room> {
        find_by_name(&self.rooms, name)
    }

    /// Names of every cached switch and room, deduplicated.
    pub fn device_names(&self) -> BTreeSet<String> {
        self.switches
            .values()
            .map(|s| s.name.clone())
            .chain(self.rooms.values().map(|r| r.name.clone()))
            .collect()
    }

    pub fn last_synced(&self) -> Option<DateTime<Utc>> {
        self.last_synced
    }

    pub fn mark_synced(&mut self, at: DateTime<Utc>) {
        self.last_synced = Some(at);
    }
}

/// Linear scan by device name.
///
/// Names are not unique on the hub. The first match in ascending zone id wins;
/// any other zone with the same name is unreachable by name.
pub fn find_by_name<'a, T: Named>(entities: &'a BTreeMap<ZoneId, T>, name: &str) -> Option<&'a T> {
    entities.values().find(|e| e.name() == name)
}

/// Single exclusive owner of the cache, shared by the loops and the MQTT handler.
#[derive(Debug, Clone, Default)]
pub struct SharedCache(Arc<Mutex<StateCache>>);

impl SharedCache {
    pub fn new(cache: StateCache) -> Self {
        SharedCache(Arc::new(Mutex::new(cache)))
    }

    /// Poisoning is ignored: every mutation is a whole-field assignment.
    pub fn lock(&self) -> MutexGuard<'_, StateCache> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::genius::Mode;

    fn room(id: i64, name: &str) -> Room {
        Room {
            id: ZoneId(id),
            name: name.to_string(),
            mode: Mode::Auto,
            default_mode: 2,
            default_override_duration: 3600,
            temperature: 19.0,
            setpoint: 20.0,
            battery: None,
            luminance: None,
        }
    }

    #[test]
    fn upsert_replaces_by_id() {
        let mut cache = StateCache::new();
        cache.upsert_room(room(1, "Lounge"));
        let mut renamed = room(1, "Living Room");
        renamed.setpoint = 18.0;
        cache.upsert_room(renamed);

        assert_eq!(cache.rooms().len(), 1);
        assert_eq!(cache.room(ZoneId(1)).map(|r| r.name.as_str()), Some("Living Room"));
        assert_eq!(cache.room(ZoneId(1)).map(|r| r.setpoint), Some(18.0));
    }

    #[test]
    fn duplicate_names_resolve_to_lowest_id() {
        let mut cache = StateCache::new();
        cache.upsert_room(room(9, "Bedroom"));
        cache.upsert_room(room(4, "Bedroom"));
        cache.upsert_room(room(6, "Office"));

        assert_eq!(cache.find_room_by_name("Bedroom").map(|r| r.id), Some(ZoneId(4)));
        assert_eq!(cache.find_room_by_name("Office").map(|r| r.id), Some(ZoneId(6)));
        assert!(cache.find_room_by_name("bedroom").is_none());
    }

    #[test]
    fn switch_lookup_does_not_see_rooms() {
        let mut cache = StateCache::new();
        cache.upsert_room(room(1, "Lounge"));
        cache.upsert_switch(Switch {
            id: ZoneId(2),
            name: "Boiler".into(),
            state: false,
        });

        assert!(cache.find_switch_by_name("Lounge").is_none());
        assert_eq!(cache.find_switch_by_name("Boiler").map(|s| s.id), Some(ZoneId(2)));
        assert_eq!(
            cache.device_names().into_iter().collect::<Vec<_>>(),
            vec!["Boiler".to_string(), "Lounge".to_string()]
        );
    }

    #[test]
    fn shared_cache_survives_poisoning() {
        let shared = SharedCache::new(StateCache::new());
        let clone = shared.clone();
        let _ = std::thread::spawn(move || {
            let _guard = clone.lock();
            panic!("poison");
        })
        .join();

        shared.lock().upsert_room(room(1, "Lounge"));
        assert_eq!(shared.lock().rooms().len(), 1);
    }
}
