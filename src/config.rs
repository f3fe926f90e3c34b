//! Minimal runtime configuration helpers.
//! Defaults: poll every 5 s, refresh switch overrides every 3 h for 23 h.

use crate::mqtt::BrokerAddress;
use std::str::FromStr;
use std::time::Duration;
use std::{fs, path::Path};

pub const DEFAULT_MQTT_URL: &str = "mqtt://localhost:1883";
pub const DEFAULT_TOPIC_PREFIX: &str = "genius";
pub const DEFAULT_POLL_SECS: u64 = 5;
pub const DEFAULT_OVERRIDE_REFRESH_SECS: u64 = 3 * 60 * 60;
pub const DEFAULT_SWITCH_OVERRIDE_SECS: u64 = 23 * 60 * 60;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct Config {
    /// Hub IP or hostname on the local network.
    pub hub_address: String,
    /// Hub API token, sent as HTTP Basic credentials.
    pub hub_token: String,
    pub mqtt: BrokerAddress,
    pub mqtt_client_id: String,
    pub topic_prefix: String,
    pub poll_interval: Duration,
    pub override_refresh_interval: Duration,
    /// How long each refresh keeps a switch in override.
    pub switch_override_duration: Duration,
    /// Upper bound for a single hub HTTP call.
    pub request_timeout: Duration,
    /// Publish every tracked attribute on each broker (re)connect.
    pub publish_initial_state: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let hub_address = match std::env::var("GENIUSHUB_IP") {
            Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
            _ => return Err("Missing hub address: set GENIUSHUB_IP".to_string()),
        };
        // Prefer env var; fallback to token.txt in working directory
        let hub_token = match std::env::var("GENIUSHUB_TOKEN") {
            Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
            _ => match fs::read_to_string(Path::new("token.txt")) {
                Ok(s) if !s.trim().is_empty() => s.trim().to_string(),
                _ => {
                    return Err(
                        "Missing hub token: set GENIUSHUB_TOKEN or provide token.txt in working directory".to_string(),
                    );
                }
            },
        };

        let mqtt_url = std::env::var("MQTT_URL").unwrap_or_else(|_| DEFAULT_MQTT_URL.to_string());
        let mqtt = BrokerAddress::parse(&mqtt_url)?;
        let mqtt_client_id = match std::env::var("MQTT_CLIENT_ID") {
            Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
            _ => format!("genius-mqtt-{:08x}", rand::random::<u32>()),
        };
        let topic_prefix = std::env::var("MQTT_TOPIC_PREFIX")
            .ok()
            .map(|s| s.trim().trim_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_TOPIC_PREFIX.to_string());

        let poll_secs: u64 = env_parse("POLL_INTERVAL_SECS", DEFAULT_POLL_SECS)?;
        let override_refresh_secs: u64 = env_parse("OVERRIDE_REFRESH_SECS", DEFAULT_OVERRIDE_REFRESH_SECS)?;
        let switch_override_secs: u64 = env_parse("SWITCH_OVERRIDE_SECS", DEFAULT_SWITCH_OVERRIDE_SECS)?;
        let request_timeout_secs: u64 = env_parse("REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?;
        if poll_secs == 0 || override_refresh_secs == 0 {
            return Err("POLL_INTERVAL_SECS and OVERRIDE_REFRESH_SECS must be positive".to_string());
        }

        let publish_initial_state = std::env::var("PUBLISH_INITIAL_STATE")
            .ok()
            .map(|s| parse_flag(&s))
            .unwrap_or(true);

        Ok(Config {
            hub_address,
            hub_token,
            mqtt,
            mqtt_client_id,
            topic_prefix,
            poll_interval: Duration::from_secs(poll_secs),
            override_refresh_interval: Duration::from_secs(override_refresh_secs),
            switch_override_duration: Duration::from_secs(switch_override_secs),
            request_timeout: Duration::from_secs(request_timeout_secs),
            publish_initial_state,
        })
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T, String> {
    match std::env::var(key) {
        Ok(s) if !s.trim().is_empty() => s
            .trim()
            .parse::<T>()
            .map_err(|_| format!("{} must be a number, got `{}`", key, s)),
        _ => Ok(default),
    }
}

fn parse_flag(s: &str) -> bool {
    matches!(s.trim(), "1" | "true" | "TRUE" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_accept_common_truthy_spellings() {
        assert!(parse_flag("1"));
        assert!(parse_flag(" true "));
        assert!(parse_flag("yes"));
        assert!(!parse_flag("0"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag(""));
    }

    #[test]
    fn env_parse_falls_back_and_rejects_garbage() {
        // Variable names unique to this test; nothing else reads them.
        unsafe {
            std::env::remove_var("GENIUS_MQTT_TEST_UNSET");
            std::env::set_var("GENIUS_MQTT_TEST_BAD", "five");
            std::env::set_var("GENIUS_MQTT_TEST_GOOD", " 42 ");
        }
        assert_eq!(env_parse::<u64>("GENIUS_MQTT_TEST_UNSET", 7), Ok(7));
        assert!(env_parse::<u64>("GENIUS_MQTT_TEST_BAD", 7).is_err());
        assert_eq!(env_parse::<u64>("GENIUS_MQTT_TEST_GOOD", 7), Ok(42));
    }
}
