pub mod models {
    pub mod genius;
}

pub mod cache;
pub mod client;
pub mod config;
pub mod mqtt;
pub mod services {
    pub mod api_worker;
    pub mod commands;
    pub mod normalize;
    pub mod reconcile;
    pub mod scheduler;
}

use crate::cache::{SharedCache, StateCache};
use crate::client::{GeniusClient, HubApi};
use crate::config::Config;
use crate::mqtt::{MqttBridge, PublishSink};
use crate::services::{api_worker, scheduler};
use log::{error, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

#[derive(Debug)]
struct LoadedEnvFile {
    path: PathBuf,
    explicit: bool,
}

pub fn run() -> Result<(), String> {
    // 1) Load config
    let cfg = Config::from_env()?;
    info!(
        "Config loaded (hub={}, mqtt={}:{}, prefix={}, poll={}s, override_refresh={}s, switch_override={}s, timeout={}s)",
        cfg.hub_address,
        cfg.mqtt.host,
        cfg.mqtt.port,
        cfg.topic_prefix,
        cfg.poll_interval.as_secs(),
        cfg.override_refresh_interval.as_secs(),
        cfg.switch_override_duration.as_secs(),
        cfg.request_timeout.as_secs()
    );

    // 2) Hub client and the worker that runs its mutations
    let hub: Arc<dyn HubApi> = Arc::new(GeniusClient::new(&cfg.hub_address, &cfg.hub_token, cfg.request_timeout));
    let (api_queue, api_worker) = api_worker::spawn(hub.clone())?;

    // 3) Initial population of the cache, waiting for the hub if it is still booting
    let cache = SharedCache::new(StateCache::new());
    let warm = scheduler::wait_for_hub(hub.as_ref(), &cache, cfg.poll_interval);
    info!("Tracking {} device(s)", warm.new_devices.len());

    // 4) MQTT: known devices are subscribed (and the snapshot published) on ConnAck
    let devices = cache.lock().device_names();
    let (bridge, connection) = MqttBridge::connect(
        &cfg.mqtt,
        &cfg.mqtt_client_id,
        &cfg.topic_prefix,
        mqtt::request_capacity(devices.len()),
        cfg.publish_initial_state,
    );
    let bridge = Arc::new(bridge);
    info!(
        "MQTT client {} connecting to {}:{} (prefix {})",
        cfg.mqtt_client_id,
        cfg.mqtt.host,
        cfg.mqtt.port,
        bridge.prefix()
    );
    for device in &devices {
        bridge.track_device(device);
    }

    let mqtt_thread = {
        let bridge = bridge.clone();
        let cache = cache.clone();
        let api_queue = api_queue.clone();
        thread::Builder::new()
            .name("mqtt".into())
            .spawn(move || bridge.run(connection, &cache, &api_queue))
            .map_err(|e| format!("spawning mqtt thread failed: {}", e))?
    };

    // 5) Periodic loops
    let sink: Arc<dyn PublishSink> = bridge;
    let poll = scheduler::spawn_poll_loop(hub, cache.clone(), sink, cfg.poll_interval)?;
    let overrides = scheduler::spawn_override_loop(
        cache,
        api_queue,
        cfg.override_refresh_interval,
        cfg.switch_override_duration,
    )?;

    // Nothing below returns under normal operation; exit is the only way out.
    for (name, handle) in [
        ("poll", poll),
        ("override-refresh", overrides),
        ("mqtt", mqtt_thread),
        ("api-worker", api_worker),
    ] {
        if handle.join().is_err() {
            return Err(format!("{} thread panicked", name));
        }
    }
    Ok(())
}

fn configure_env_from_cli() -> Result<Option<LoadedEnvFile>, String> {
    let mut args = std::env::args_os();
    args.next(); // skip program name

    let mut env_file: Option<PathBuf> = None;
    while let Some(arg) = args.next() {
        let path = match arg.to_str() {
            Some("--env-file") => args
                .next()
                .map(PathBuf::from)
                .ok_or_else(|| "`--env-file` requires a path argument".to_string())?,
            Some(s) if s.starts_with("--env-file=") => PathBuf::from(&s["--env-file=".len()..]),
            Some("--") => break,
            Some(other) => return Err(format!("unrecognised argument: {}", other)),
            None => return Err("argument contains invalid UTF-8".to_string()),
        };
        if env_file.replace(path).is_some() {
            return Err("`--env-file` provided more than once".to_string());
        }
    }

    match env_file {
        Some(path) => {
            if !path.is_file() {
                return Err(format!("env file not found: {}", path.display()));
            }
            load_env_file(&path)?;
            Ok(Some(LoadedEnvFile { path, explicit: true }))
        }
        None => {
            let default_path = Path::new(".env").to_path_buf();
            if !default_path.is_file() {
                return Ok(None);
            }
            load_env_file(&default_path)?;
            Ok(Some(LoadedEnvFile {
                path: default_path,
                explicit: false,
            }))
        }
    }
}

fn load_env_file(path: &Path) -> Result<(), String> {
    let content = std::fs::read_to_string(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    for (index, line) in content.lines().enumerate() {
        let assignment =
            parse_env_assignment(line).map_err(|e| format!("{}:{}: {}", path.display(), index + 1, e))?;
        if let Some((key, value)) = assignment {
            // Values already in the process environment win.
            if std::env::var_os(&key).is_none() {
                // Updating process-level environment variables is unsafe on some targets.
                unsafe {
                    std::env::set_var(key, value);
                }
            }
        }
    }
    Ok(())
}

fn parse_env_assignment(line: &str) -> Result<Option<(String, String)>, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    let trimmed = trimmed.strip_prefix("export ").map(str::trim_start).unwrap_or(trimmed);

    let (key, raw_value) = trimmed
        .split_once('=')
        .ok_or_else(|| "missing '=' in assignment".to_string())?;
    let key = key.trim();
    if key.is_empty() || key.chars().any(char::is_whitespace) {
        return Err(format!("invalid environment variable name `{}`", key));
    }

    let raw_value = raw_value.trim();
    let value = match raw_value.chars().next() {
        Some(quote @ ('"' | '\'')) => {
            let inner = &raw_value[1..];
            let end = inner
                .find(quote)
                .ok_or_else(|| format!("unterminated {} quoted value", quote))?;
            let rest = inner[end + 1..].trim();
            if !rest.is_empty() && !rest.starts_with('#') {
                return Err("unexpected characters after closing quote".to_string());
            }
            inner[..end].to_string()
        }
        _ => raw_value.split('#').next().unwrap_or_default().trim_end().to_string(),
    };
    Ok(Some((key.to_string(), value)))
}

fn main() {
    let loaded_env = match configure_env_from_cli() {
        Ok(info) => info,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, info.path.display());
    }

    info!(
        "genius-mqtt {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run() {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
