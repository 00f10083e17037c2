//! Configuration loader for the `codemetal-soilwatch` dashboard.
//!
//! All runtime configuration values and their defaults are loaded here from
//! environment variables (with optional `.env` file support provided by the
//! caller), so no other module reads `env::var` directly.
//!
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::stream::StreamSettings;

/// Parse an optional integer environment variable with a default value.
macro_rules! parse_env_u32 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<u32>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Same as `parse_env_u32!`, for millisecond values.
macro_rules! parse_env_u64 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<u64>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .map_err(|_| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Strongly typed application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// Device registry base URL, e.g. `http://127.0.0.1:8000/api`.
    pub registry_url: String,

    /// Live stream endpoint, e.g. `ws://127.0.0.1:8000/ws/updates`.
    pub stream_url: String,

    /// Pre-shared stream subscription key (sent as the WebSocket sub-protocol).
    pub stream_key: String,

    /// Readings kept per device.
    pub series_capacity: usize,

    /// Readings requested per history backfill.
    pub history_limit: u32,

    /// Wait between stream reconnect attempts.
    pub reconnect_delay: Duration,

    /// Where the operator session is persisted.
    pub session_file: PathBuf,

    /// Bind address of the local view server.
    pub view_addr: SocketAddr,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `REGISTRY_URL` – device registry base URL
/// - `STREAM_URL` – live stream WebSocket URL
/// - `STREAM_KEY` – stream subscription key
///
/// Optional:
/// - `SERIES_CAPACITY` – readings kept per device (default: 100)
/// - `HISTORY_LIMIT` – readings fetched per backfill (default: 100)
/// - `RECONNECT_DELAY_MS` – stream reconnect backoff (default: 2000)
/// - `SESSION_FILE` – session file path (default: `.soilwatch-session.json`)
/// - `VIEW_ADDR` – view server bind address (default: `127.0.0.1:8090`)
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let registry_url = require_env!("REGISTRY_URL");
    let stream_url = require_env!("STREAM_URL");
    let stream_key = require_env!("STREAM_KEY");
    let series_capacity = parse_env_u32!("SERIES_CAPACITY", 100);
    let history_limit = parse_env_u32!("HISTORY_LIMIT", 100);
    let reconnect_delay_ms = parse_env_u64!("RECONNECT_DELAY_MS", 2000);

    if series_capacity == 0 {
        return Err(anyhow!("Invalid SERIES_CAPACITY: must be at least 1"));
    }

    let session_file = env::var("SESSION_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(".soilwatch-session.json"));

    let view_addr = env::var("VIEW_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:8090".to_string())
        .parse::<SocketAddr>()
        .map_err(|e| anyhow!("Invalid VIEW_ADDR: {}", e))?;

    Ok(Config {
        registry_url,
        stream_url,
        stream_key,
        series_capacity: series_capacity as usize,
        history_limit,
        reconnect_delay: Duration::from_millis(reconnect_delay_ms),
        session_file,
        view_addr,
    })
}

impl Config {
    // ---
    pub fn stream_settings(&self) -> StreamSettings {
        StreamSettings {
            url: self.stream_url.clone(),
            subscription_key: self.stream_key.clone(),
            reconnect_delay: self.reconnect_delay,
        }
    }

    /// Log the loaded configuration for debugging purposes.
    ///
    /// The subscription key is masked.
    pub fn log_config(&self) {
        // ---
        tracing::info!("Configuration loaded:");
        tracing::info!("  REGISTRY_URL       : {}", self.registry_url);
        tracing::info!("  STREAM_URL         : {}", self.stream_url);
        tracing::info!("  STREAM_KEY         : {}", mask_secret(&self.stream_key));
        tracing::info!("  SERIES_CAPACITY    : {}", self.series_capacity);
        tracing::info!("  HISTORY_LIMIT      : {}", self.history_limit);
        tracing::info!(
            "  RECONNECT_DELAY_MS : {}",
            self.reconnect_delay.as_millis()
        );
        tracing::info!("  SESSION_FILE       : {}", self.session_file.display());
        tracing::info!("  VIEW_ADDR          : {}", self.view_addr);
    }
}

/// Keep the first two characters of a secret, star out the rest.
fn mask_secret(secret: &str) -> String {
    // ---
    let shown: String = secret.chars().take(2).collect();
    if secret.chars().count() <= 4 {
        return "****".to_string();
    }
    format!("{shown}****")
}
