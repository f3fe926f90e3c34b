use crate::cache::SharedCache;
use crate::client::{ApiCall, HubApi};
use crate::models::genius::ZoneSet;
use crate::mqtt::PublishSink;
use crate::services::api_worker::ApiQueue;
use crate::services::normalize::parse_zone_data;
use crate::services::reconcile::{self, ReconcileReport};
use log::{debug, info, warn};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

fn fetch(api: &dyn HubApi) -> Result<ZoneSet, String> {
    let raw = api.fetch_zones().map_err(|e| format!("fetch zones failed: {}", e))?;
    info!("Data for {} zones fetched", raw.len());
    Ok(parse_zone_data(&raw))
}

/// Initial synchronous population of an empty cache. Nothing is published.
pub fn warm_up(api: &dyn HubApi, cache: &SharedCache) -> Result<ReconcileReport, String> {
    let zones = fetch(api)?;
    let report = reconcile::reconcile(&mut cache.lock(), &zones, false);
    info!(
        "Cache populated: {} switch(es), {} room(s), {} house(s)",
        zones.switches.len(),
        zones.rooms.len(),
        zones.houses.len()
    );
    Ok(report)
}

/// Repeat [`warm_up`] every `retry` until the hub answers.
pub fn wait_for_hub(api: &dyn HubApi, cache: &SharedCache, retry: Duration) -> ReconcileReport {
    loop {
        match warm_up(api, cache) {
            Ok(report) => return report,
            Err(e) => {
                warn!("Hub not reachable yet, retrying in {}s: {}", retry.as_secs(), e);
                thread::sleep(retry);
            }
        }
    }
}

/// One poll tick: fetch, reconcile under the lock, then publish and subscribe outside it.
///
/// A failed fetch leaves the cache as it was.
pub fn poll_once(api: &dyn HubApi, cache: &SharedCache, sink: &dyn PublishSink) -> Result<ReconcileReport, String> {
    let zones = fetch(api)?;
    let report = reconcile::reconcile(&mut cache.lock(), &zones, true);

    for publication in &report.publications {
        sink.publish(publication);
    }
    for device in &report.new_devices {
        info!("Discovered new device {}", device);
        sink.subscribe_device(device);
    }
    for device in &report.renamed_devices {
        sink.subscribe_device(device);
    }
    debug!(
        "Poll complete: {} change(s), {} new device(s)",
        report.changes,
        report.new_devices.len()
    );
    Ok(report)
}

/// Queue an override for every cached switch so none falls back to its schedule.
///
/// Returns the number of calls queued.
pub fn refresh_overrides(cache: &SharedCache, api: &ApiQueue, duration: Duration) -> usize {
    let zone_ids: Vec<_> = cache.lock().switches().keys().copied().collect();
    info!("Setting {} switch(es) to override", zone_ids.len());
    for zone_id in &zone_ids {
        api.submit(ApiCall::SetZoneToOverride {
            zone_id: *zone_id,
            duration: Some(duration.as_secs()),
        });
    }
    zone_ids.len()
}

/// Run `tick` forever on a steady cadence, starting immediately.
fn run_every(interval: Duration, mut tick: impl FnMut()) -> ! {
    loop {
        let tick_start = Instant::now();
        tick();

        // Maintain steady cadence
        let elapsed = tick_start.elapsed();
        if elapsed < interval {
            thread::sleep(interval - elapsed);
        }
    }
}

pub fn spawn_poll_loop(
    api: std::sync::Arc<dyn HubApi>,
    cache: SharedCache,
    sink: std::sync::Arc<dyn PublishSink>,
    interval: Duration,
) -> Result<JoinHandle<()>, String> {
    info!("Starting poll loop: interval={}s", interval.as_secs());
    thread::Builder::new()
        .name("poll".into())
        .spawn(move || {
            run_every(interval, || {
                if let Err(e) = poll_once(api.as_ref(), &cache, sink.as_ref()) {
                    let since = cache
                        .lock()
                        .last_synced()
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "-".to_string());
                    warn!("Poll failed, keeping cached state from {}: {}", since, e);
                }
            })
        })
        .map_err(|e| format!("spawning poll loop failed: {}", e))
}

pub fn spawn_override_loop(
    cache: SharedCache,
    api: ApiQueue,
    interval: Duration,
    duration: Duration,
) -> Result<JoinHandle<()>, String> {
    info!(
        "Starting override refresh loop: interval={}s, duration={}s",
        interval.as_secs(),
        duration.as_secs()
    );
    thread::Builder::new()
        .name("override-refresh".into())
        .spawn(move || {
            run_every(interval, || {
                refresh_overrides(&cache, &api, duration);
            })
        })
        .map_err(|e| format!("spawning override loop failed: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::StateCache;
    use crate::models::genius::{Attribute, Mode, ZoneId};
    use crate::mqtt::testing::RecordingSink;
    use crate::services::api_worker::testing::FakeHub;
    use serde_json::{Value, json};
    use std::sync::mpsc;

    fn zones(lounge_setpoint: f64, boiler_on: bool) -> Vec<Value> {
        vec![
            json!({"iType": 1, "iID": 0, "strName": "Home"}),
            json!({"iType": 2, "iID": 3, "strName": "Boiler", "fSP": if boiler_on { 1 } else { 0 }, "nodes": [{}]}),
            json!({
                "iType": 3, "iID": 5, "strName": "Lounge", "iMode": 2, "iBaseMode": 2,
                "iOverrideDuration": 3600, "fPV": 19.5, "fSP": lounge_setpoint,
                "datapoints": [{"addr": "Battery", "val": 80}]
            }),
        ]
    }

    #[test]
    fn warm_up_fills_cache_silently() {
        let hub = FakeHub::new(zones(20.0, false));
        let cache = SharedCache::new(StateCache::new());

        let report = warm_up(&hub, &cache).expect("warm up");

        assert_eq!(report.changes, 0);
        assert!(report.publications.is_empty());
        assert_eq!(report.new_devices.len(), 2);
        let cache = cache.lock();
        assert_eq!(cache.rooms()[&ZoneId(5)].mode, Mode::Auto);
        assert!(!cache.switches()[&ZoneId(3)].state);
        assert!(cache.houses().contains(&ZoneId(0)));
    }

    #[test]
    fn startup_waits_for_a_booting_hub() {
        let hub = FakeHub::new(zones(20.0, false)).unreachable_for(2);
        let cache = SharedCache::new(StateCache::new());

        let report = wait_for_hub(&hub, &cache, Duration::from_millis(1));

        assert_eq!(hub.fetches(), 3);
        assert_eq!(report.new_devices.len(), 2);
        assert!(cache.lock().last_synced().is_some());
        assert_eq!(cache.lock().rooms()[&ZoneId(5)].setpoint, 20.0);
    }

    #[test]
    fn poll_publishes_only_deltas() {
        let hub = FakeHub::new(zones(20.0, false));
        let cache = SharedCache::new(StateCache::new());
        warm_up(&hub, &cache).expect("warm up");
        let sink = RecordingSink::default();

        poll_once(&hub, &cache, &sink).expect("unchanged poll");
        assert!(sink.published.lock().unwrap().is_empty());

        hub.set_zones(Some(zones(21.5, true)));
        poll_once(&hub, &cache, &sink).expect("changed poll");

        let published: Vec<_> = sink
            .published
            .lock()
            .unwrap()
            .iter()
            .map(|p| (p.device.clone(), p.attribute, p.payload.clone()))
            .collect();
        assert_eq!(
            published,
            vec![
                ("Boiler".to_string(), Attribute::Switch, "on".to_string()),
                ("Lounge".to_string(), Attribute::HeatingSetpoint, "21.5".to_string()),
            ]
        );
        assert!(sink.subscribed.lock().unwrap().is_empty());
    }

    #[test]
    fn failed_fetch_keeps_cache() {
        let hub = FakeHub::new(zones(20.0, false));
        let cache = SharedCache::new(StateCache::new());
        warm_up(&hub, &cache).expect("warm up");
        let sink = RecordingSink::default();

        hub.set_zones(None);
        assert!(poll_once(&hub, &cache, &sink).is_err());

        assert_eq!(cache.lock().rooms()[&ZoneId(5)].setpoint, 20.0);
        assert!(sink.published.lock().unwrap().is_empty());
    }

    #[test]
    fn devices_appearing_later_get_subscribed() {
        let hub = FakeHub::new(zones(20.0, false));
        let cache = SharedCache::new(StateCache::new());
        warm_up(&hub, &cache).expect("warm up");
        let sink = RecordingSink::default();

        let mut later = zones(20.0, false);
        later.push(json!({
            "iType": 3, "iID": 8, "strName": "Attic", "iMode": 1, "iBaseMode": 2,
            "iOverrideDuration": 3600, "fPV": 12.0, "fSP": 4.0
        }));
        hub.set_zones(Some(later));
        let report = poll_once(&hub, &cache, &sink).expect("poll");

        assert_eq!(report.new_devices, vec!["Attic".to_string()]);
        assert_eq!(*sink.subscribed.lock().unwrap(), vec!["Attic".to_string()]);
        assert!(sink.published.lock().unwrap().is_empty());
        assert_eq!(cache.lock().find_room_by_name("Attic").map(|r| r.mode), Some(Mode::Off));
    }

    #[test]
    fn renamed_device_gets_subscribed_under_new_name() {
        let hub = FakeHub::new(zones(20.0, false));
        let cache = SharedCache::new(StateCache::new());
        warm_up(&hub, &cache).expect("warm up");
        let sink = RecordingSink::default();

        let mut renamed = zones(20.0, false);
        renamed[2]["strName"] = json!("Living Room");
        hub.set_zones(Some(renamed));
        poll_once(&hub, &cache, &sink).expect("poll");

        assert_eq!(*sink.subscribed.lock().unwrap(), vec!["Living Room".to_string()]);
        assert!(cache.lock().find_room_by_name("Living Room").is_some());
    }

    #[test]
    fn override_refresh_queues_one_call_per_switch() {
        let hub = FakeHub::new(vec![
            json!({"iType": 2, "iID": 3, "strName": "Boiler", "fSP": 1, "nodes": [{}]}),
            json!({"iType": 2, "iID": 4, "strName": "Pump", "fSP": 0, "nodes": [{}]}),
            json!({"iType": 2, "iID": 9, "strName": "Hot Water", "fSP": 0, "nodes": []}),
        ]);
        let cache = SharedCache::new(StateCache::new());
        warm_up(&hub, &cache).expect("warm up");
        let (tx, rx) = mpsc::channel();

        let queued = refresh_overrides(&cache, &ApiQueue::new(tx), Duration::from_secs(23 * 60 * 60));

        assert_eq!(queued, 2);
        let calls: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            calls,
            vec![
                ApiCall::SetZoneToOverride {
                    zone_id: ZoneId(3),
                    duration: Some(82_800),
                },
                ApiCall::SetZoneToOverride {
                    zone_id: ZoneId(4),
                    duration: Some(82_800),
                },
            ]
        );
    }
}
