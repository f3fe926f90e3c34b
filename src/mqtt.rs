//! MQTT side of the bridge.
//!
//! Topics are `<prefix>/<device>/<attribute>`. The bridge publishes retained
//! device state and listens on `<prefix>/<device>/#` for commands.

use crate::cache::SharedCache;
use crate::models::genius::{Attribute, Publication};
use crate::services::api_worker::ApiQueue;
use crate::services::commands::{self, Command};
use crate::services::reconcile::{self, ROOM_FIELDS};
use log::{debug, info, warn};
use rumqttc::{Client, Connection, ConnectionError, Event, MqttOptions, Packet, Publish, QoS};
use std::collections::BTreeSet;
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

pub const DEFAULT_MQTT_PORT: u16 = 1883;
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const MIN_REQUEST_CAPACITY: usize = 64;

/// Where the scheduler sends state changes and newly found devices.
pub trait PublishSink: Send + Sync {
    fn publish(&self, publication: &Publication);
    fn subscribe_device(&self, device: &str);
}

/// Broker address parsed from `mqtt://[user[:pass]@]host[:port]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    pub credentials: Option<(String, String)>,
}

impl BrokerAddress {
    pub fn parse(url: &str) -> Result<Self, String> {
        let rest = url
            .strip_prefix("mqtt://")
            .or_else(|| url.strip_prefix("tcp://"))
            .unwrap_or(url)
            .trim_end_matches('/');

        let (credentials, host_port) = match rest.rsplit_once('@') {
            Some((userinfo, host_port)) => {
                let (user, pass) = userinfo.split_once(':').unwrap_or((userinfo, ""));
                (Some((user.to_string(), pass.to_string())), host_port)
            }
            None => (None, rest),
        };

        let (host, port) = match host_port.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| format!("invalid MQTT port `{}` in {}", port, url))?;
                (host, port)
            }
            None => (host_port, DEFAULT_MQTT_PORT),
        };
        if host.is_empty() {
            return Err(format!("MQTT URL has no host: {}", url));
        }

        Ok(BrokerAddress {
            host: host.to_string(),
            port,
            credentials,
        })
    }
}

/// Client request queue size for `devices` known devices.
///
/// One subscription and at most one publication per tracked field for each
/// device, doubled for devices discovered later.
pub fn request_capacity(devices: usize) -> usize {
    let per_device = 1 + ROOM_FIELDS.len();
    (2 * devices * per_device).max(MIN_REQUEST_CAPACITY)
}

pub fn device_topic(prefix: &str, device: &str, attribute: Attribute) -> String {
    format!("{}/{}/{}", prefix, device, attribute)
}

pub fn device_filter(prefix: &str, device: &str) -> String {
    format!("{}/{}/#", prefix, device)
}

/// Split `<prefix>/<device>/<attribute>[/...]` into device and attribute segments.
pub fn split_topic<'a>(prefix: &str, topic: &'a str) -> Option<(&'a str, &'a str)> {
    let mut parts = topic.split('/');
    if parts.next()? != prefix {
        return None;
    }
    let device = parts.next()?;
    let attribute = parts.next()?;
    Some((device, attribute))
}

pub struct MqttBridge {
    client: Client,
    prefix: String,
    devices: Mutex<BTreeSet<String>>,
    publish_snapshot: bool,
}

impl MqttBridge {
    /// Nothing is sent until [`MqttBridge::run`] drives the returned connection.
    ///
    /// With `publish_snapshot` every tracked value is published again on each
    /// (re)connect.
    pub fn connect(
        address: &BrokerAddress,
        client_id: &str,
        prefix: &str,
        capacity: usize,
        publish_snapshot: bool,
    ) -> (Self, Connection) {
        let mut options = MqttOptions::new(client_id, address.host.as_str(), address.port);
        options.set_keep_alive(KEEP_ALIVE);
        if let Some((user, pass)) = &address.credentials {
            options.set_credentials(user.as_str(), pass.as_str());
        }
        let (client, connection) = Client::new(options, capacity);
        let bridge = MqttBridge {
            client,
            prefix: prefix.to_string(),
            devices: Mutex::new(BTreeSet::new()),
            publish_snapshot,
        };
        (bridge, connection)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Remember a device; its filter is subscribed on the next ConnAck.
    pub fn track_device(&self, device: &str) -> bool {
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(device.to_string())
    }

    // All client calls are try_*: the queue is only drained by the connection thread.
    fn subscribe_filter(&self, device: &str) -> bool {
        let filter = device_filter(&self.prefix, device);
        match self.client.try_subscribe(filter.as_str(), QoS::AtMostOnce) {
            Ok(()) => {
                info!("Subscribed to topic {}", filter);
                true
            }
            Err(e) => {
                warn!("Subscribing to {} failed: {}", filter, e);
                false
            }
        }
    }

    fn queue_publish(&self, publication: &Publication) -> bool {
        let topic = device_topic(&self.prefix, &publication.device, publication.attribute);
        debug!("Publishing {} = {}", topic, publication.payload);
        match self
            .client
            .try_publish(topic.as_str(), QoS::AtLeastOnce, true, publication.payload.as_bytes())
        {
            Ok(()) => true,
            Err(e) => {
                warn!("Publishing {} failed: {}", topic, e);
                false
            }
        }
    }

    fn resubscribe_all(&self) -> usize {
        let devices = self.devices.lock().unwrap_or_else(PoisonError::into_inner).clone();
        devices.iter().filter(|device| self.subscribe_filter(device)).count()
    }

    /// Subscribe every tracked device and, if enabled, queue the cache snapshot.
    ///
    /// Returns the number of requests queued.
    pub fn on_connected(&self, cache: &SharedCache) -> usize {
        let mut queued = self.resubscribe_all();
        if self.publish_snapshot {
            let snapshot = reconcile::snapshot(&cache.lock());
            info!("Publishing state snapshot ({} value(s))", snapshot.len());
            queued += snapshot.iter().filter(|p| self.queue_publish(p)).count();
        }
        queued
    }

    /// Drive the connection until the process exits. Incoming commands are
    /// dispatched against `cache` and resulting hub calls go to `api`.
    pub fn run(&self, mut connection: Connection, cache: &SharedCache, api: &ApiQueue) {
        for event in connection.iter() {
            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("Connected to MQTT broker");
                    self.on_connected(cache);
                }
                Ok(Event::Incoming(Packet::Publish(message))) => {
                    handle_publish(&self.prefix, &message, cache, api);
                }
                Ok(_) => {}
                Err(e) => {
                    log_connection_error(&e);
                    thread::sleep(RECONNECT_DELAY);
                }
            }
        }
    }
}

impl PublishSink for MqttBridge {
    fn publish(&self, publication: &Publication) {
        self.queue_publish(publication);
    }

    fn subscribe_device(&self, device: &str) {
        if self.track_device(device) {
            self.subscribe_filter(device);
        }
    }
}

fn log_connection_error(e: &ConnectionError) {
    warn!("MQTT connection error: {}; retrying in {}s", e, RECONNECT_DELAY.as_secs());
}

/// Entry point for every inbound PUBLISH.
///
/// A broker sets the retain flag only when replaying stored messages to a new
/// subscription. Those are the bridge's own state publications, not commands.
pub fn handle_publish(prefix: &str, message: &Publish, cache: &SharedCache, api: &ApiQueue) {
    let payload = String::from_utf8_lossy(&message.payload);
    if message.retain {
        debug!("Ignoring retained {}: {}", message.topic, payload);
        return;
    }
    debug!("Received: {}: {}", message.topic, payload);
    handle_message(prefix, &message.topic, &payload, cache, api);
}

/// Turn one inbound message into at most one queued hub call.
///
/// The cache lock is released before the call is queued. Errors are logged and
/// the message dropped.
pub fn handle_message(prefix: &str, topic: &str, payload: &str, cache: &SharedCache, api: &ApiQueue) {
    let Some((device, attribute)) = split_topic(prefix, topic) else {
        debug!("Ignoring message on {}", topic);
        return;
    };
    // State topics echo back our own publications; only command attributes matter.
    let attribute = match attribute.parse::<Attribute>() {
        Ok(a) if a.is_command() => a,
        _ => return,
    };

    let decision = Command::parse(device, attribute, payload).and_then(|command| {
        let cache = cache.lock();
        commands::dispatch(&cache, &command)
    });

    match decision {
        Ok(Some(call)) => api.submit(call),
        Ok(None) => {}
        Err(e) => warn!("Dropping command on {}: {}", topic, e),
    }
}
