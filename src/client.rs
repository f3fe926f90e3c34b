//! Blocking HTTP client for the Genius Hub local API (v3).
//!
//! - `ureq` agent with a global timeout so a hung hub cannot stall a loop.
//! - Reads go through `GET zones`; every mutation is a `PATCH zone/<id>`.
//! - Authentication is a static Basic token issued by the hub.

use crate::models::genius::{ZoneId, ZonesResponse, mode_code};
use http::StatusCode;
use serde_json::{Value, json};
use std::fmt;
use std::time::Duration;

const API_PORT: u16 = 1223;
const API_VERSION: &str = "v3";

#[derive(Debug)]
pub enum GeniusClientError {
    Transport(String),
    Http { status: u16, message: String },
    Json(String),
}

impl fmt::Display for GeniusClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeniusClientError::Transport(s) => write!(f, "transport error: {}", s),
            GeniusClientError::Http { status, message } => write!(f, "http {}: {}", status, message),
            GeniusClientError::Json(s) => write!(f, "json error: {}", s),
        }
    }
}

impl std::error::Error for GeniusClientError {}

impl From<ureq::Error> for GeniusClientError {
    fn from(value: ureq::Error) -> Self {
        GeniusClientError::Transport(value.to_string())
    }
}

/// A single zone mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
    /// Put the zone into override (boost), optionally for a bounded number of seconds.
    SetZoneToOverride { zone_id: ZoneId, duration: Option<u64> },
    SetSwitchState { zone_id: ZoneId, on: bool },
    SetZoneMode { zone_id: ZoneId, mode: i64 },
    SetRoomSetpoint { zone_id: ZoneId, setpoint: f64 },
}

impl ApiCall {
    pub fn zone_id(&self) -> ZoneId {
        match self {
            ApiCall::SetZoneToOverride { zone_id, .. }
            | ApiCall::SetSwitchState { zone_id, .. }
            | ApiCall::SetZoneMode { zone_id, .. }
            | ApiCall::SetRoomSetpoint { zone_id, .. } => *zone_id,
        }
    }

    /// PATCH body understood by the hub.
    pub fn body(&self) -> Value {
        match self {
            ApiCall::SetZoneToOverride { duration: Some(secs), .. } => {
                json!({ "iMode": mode_code::BOOST, "iBoostTimeRemaining": secs })
            }
            ApiCall::SetZoneToOverride { duration: None, .. } => json!({ "iMode": mode_code::BOOST }),
            ApiCall::SetSwitchState { on, .. } => json!({ "fBoostSP": if *on { 1 } else { 0 } }),
            ApiCall::SetZoneMode { mode, .. } => json!({ "iMode": mode }),
            ApiCall::SetRoomSetpoint { setpoint, .. } => json!({ "fBoostSP": setpoint }),
        }
    }
}

impl fmt::Display for ApiCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiCall::SetZoneToOverride { zone_id, duration: Some(secs) } => {
                write!(f, "set zone {} to override for {} sec", zone_id, secs)
            }
            ApiCall::SetZoneToOverride { zone_id, duration: None } => {
                write!(f, "set zone {} to override", zone_id)
            }
            ApiCall::SetSwitchState { zone_id, on } => write!(f, "set switch {} state to {}", zone_id, on),
            ApiCall::SetZoneMode { zone_id, mode } => write!(f, "set zone {} mode to {}", zone_id, mode),
            ApiCall::SetRoomSetpoint { zone_id, setpoint } => {
                write!(f, "set room {} setpoint to {}", zone_id, setpoint)
            }
        }
    }
}

/// The hub operations the bridge depends on.
pub trait HubApi: Send + Sync {
    /// Raw zone records, undecoded so malformed entries can be skipped one by one.
    fn fetch_zones(&self) -> Result<Vec<Value>, GeniusClientError>;
    fn execute(&self, call: &ApiCall) -> Result<(), GeniusClientError>;
}

pub struct GeniusClient {
    agent: ureq::Agent,
    base_url: String,
    authorization: String,
}

impl GeniusClient {
    pub fn new(hub_address: &str, token: &str, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();

        GeniusClient {
            agent,
            base_url: format!("http://{}:{}/{}", hub_address, API_PORT, API_VERSION),
            authorization: format!("Basic {}", token),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn check_status(response: &mut http::Response<ureq::Body>) -> Result<(), GeniusClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let message = response
            .body_mut()
            .read_to_string()
            .unwrap_or_else(|_| String::from("<no body>"));
        Err(GeniusClientError::Http {
            status: status.as_u16(),
            message: if message.is_empty() {
                status.canonical_reason().unwrap_or("").to_string()
            } else {
                message
            },
        })
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, GeniusClientError> {
        let mut response = self
            .agent
            .get(&self.url(path))
            .header("Authorization", self.authorization.as_str())
            .header("Accept", "application/json")
            .call()?;
        Self::check_status(&mut response)?;
        response
            .body_mut()
            .read_json::<T>()
            .map_err(|e| GeniusClientError::Json(e.to_string()))
    }

    fn patch_json(&self, path: &str, body: &Value) -> Result<StatusCode, GeniusClientError> {
        let mut response = self
            .agent
            .patch(&self.url(path))
            .header("Authorization", self.authorization.as_str())
            .send_json(body)?;
        Self::check_status(&mut response)?;
        Ok(response.status())
    }
}

impl HubApi for GeniusClient {
    fn fetch_zones(&self) -> Result<Vec<Value>, GeniusClientError> {
        let envelope: ZonesResponse = self.get_json("zones")?;
        Ok(envelope.data)
    }

    fn execute(&self, call: &ApiCall) -> Result<(), GeniusClientError> {
        self.patch_json(&format!("zone/{}", call.zone_id()), &call.body())
            .map(|_| ())
    }
}
