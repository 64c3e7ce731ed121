//! Server configuration: defaults, optional `sharethings.toml`, and
//! `SHARETHINGS_*` environment overrides, layered in that order.

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "sharethings.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Directory holding `sessions.db` and `content.db`.
    pub db_path: PathBuf,
    /// Root for on-disk chunk payloads.
    pub storage_path: PathBuf,
    /// Session inactivity timeout in milliseconds.
    pub session_timeout: u64,
    pub max_items_per_session: u32,
    /// Bytes; items at or above this are stored but not fanned out.
    pub large_file_threshold: u64,
    /// Maximum inbound WebSocket frame, bytes.
    pub max_frame_size: usize,
    /// Milliseconds between server pings.
    pub heartbeat_interval: u64,
    /// Milliseconds of silence before a connection is dropped.
    pub heartbeat_timeout: u64,
    /// `*` or an exact origin.
    pub cors_origin: String,
    /// Milliseconds between expiry sweeps.
    pub expiry_check_interval: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3001".to_string(),
            db_path: PathBuf::from("./data"),
            storage_path: PathBuf::from("./data"),
            session_timeout: 600_000,
            max_items_per_session: 100,
            large_file_threshold: 10 * 1024 * 1024,
            max_frame_size: 100 * 1024 * 1024,
            heartbeat_interval: 25_000,
            heartbeat_timeout: 60_000,
            cors_origin: "*".to_string(),
            expiry_check_interval: 60_000,
        }
    }
}

impl ServerConfig {
    /// Defaults ← `sharethings.toml` (if present) ← `SHARETHINGS_*` env vars.
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment(DEFAULT_CONFIG_FILE).extract()
    }

    pub fn load_from(path: &str) -> Result<Self, figment::Error> {
        Self::figment(path).extract()
    }

    fn figment(path: &str) -> Figment {
        Figment::from(Serialized::defaults(ServerConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("SHARETHINGS_"))
    }

    pub fn sessions_db_path(&self) -> PathBuf {
        self.db_path.join("sessions.db")
    }

    pub fn content_db_path(&self) -> PathBuf {
        self.db_path.join("content.db")
    }

    pub fn heartbeat_interval_duration(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval)
    }

    pub fn heartbeat_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout)
    }
}
