//! Configuration types and loading.
//!
//! Config is loaded from an optional JSON file (`--config` or `GOWA_CONFIG_PATH`) and then
//! overridden by environment (`PORT`, `SESSION_PATH`, `WEBHOOK_URL`, `BIND`, `BRIDGE_URL`).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP listener settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Session storage and coordinator tuning.
    #[serde(default)]
    pub session: SessionConfig,

    /// Protocol bridge endpoint.
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Reserved for outbound event delivery; not used yet.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

/// Gateway bind and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// HTTP port (default 3000).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "0.0.0.0").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Directory holding the credential store (default "./sessions").
    #[serde(default = "default_session_path")]
    pub path: PathBuf,

    /// Capacity of the client event buffer (default 100).
    #[serde(default = "default_event_buffer_capacity")]
    pub event_buffer_capacity: usize,

    /// Upper bound on a pairing relay's lifetime, in seconds (default 300).
    #[serde(default = "default_pairing_timeout_secs")]
    pub pairing_timeout_secs: u64,

    /// How long GET /qr waits for the first pairing code, in seconds (default 60).
    #[serde(default = "default_qr_wait_secs")]
    pub qr_wait_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    /// WebSocket URL of the protocol bridge.
    #[serde(default = "default_bridge_url")]
    pub url: String,

    /// Per-request timeout, in seconds (default 30).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_gateway_port() -> u16 {
    3000
}

fn default_gateway_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_session_path() -> PathBuf {
    PathBuf::from("./sessions")
}

fn default_event_buffer_capacity() -> usize {
    100
}

fn default_pairing_timeout_secs() -> u64 {
    300
}

fn default_qr_wait_secs() -> u64 {
    60
}

fn default_bridge_url() -> String {
    "ws://127.0.0.1:3001/ws".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            path: default_session_path(),
            event_buffer_capacity: default_event_buffer_capacity(),
            pairing_timeout_secs: default_pairing_timeout_secs(),
            qr_wait_secs: default_qr_wait_secs(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            url: default_bridge_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl SessionConfig {
    pub fn pairing_timeout(&self) -> Duration {
        Duration::from_secs(self.pairing_timeout_secs)
    }

    pub fn qr_wait(&self) -> Duration {
        Duration::from_secs(self.qr_wait_secs)
    }
}

impl BridgeConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Config {
    /// Apply environment overrides. `lookup` is `std::env::var` in production.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        if let Some(port) = get("PORT") {
            self.gateway.port = port
                .parse()
                .with_context(|| format!("invalid PORT {:?}", port))?;
        }
        if let Some(bind) = get("BIND") {
            self.gateway.bind = bind;
        }
        if let Some(path) = get("SESSION_PATH") {
            self.session.path = PathBuf::from(path);
        }
        if let Some(url) = get("WEBHOOK_URL") {
            self.webhook_url = Some(url);
        }
        if let Some(url) = get("BRIDGE_URL") {
            self.bridge.url = url;
        }
        Ok(())
    }

    /// Listen address, `bind:port`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.gateway.bind.trim(), self.gateway.port)
    }
}

/// Config file path from GOWA_CONFIG_PATH, if set.
pub fn default_config_path() -> Option<PathBuf> {
    std::env::var("GOWA_CONFIG_PATH")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
}

/// Load config from `path` (or GOWA_CONFIG_PATH), then apply environment overrides.
/// Missing file => defaults.
pub fn load_config(path: Option<PathBuf>) -> Result<Config> {
    let mut config = match path.or_else(default_config_path) {
        Some(path) => read_config_file(&path)?,
        None => Config::default(),
    };
    config.apply_env(|key| std::env::var(key).ok())?;
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<Config> {
    if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        return Ok(Config::default());
    }
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    serde_json::from_str(&s).with_context(|| format!("parsing config from {}", path.display()))
}
