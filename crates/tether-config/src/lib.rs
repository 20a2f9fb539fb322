//! # tether-config
//!
//! Configuration management for TetherFS.
//!
//! Loads configuration from:
//! 1. `~/.tetherfs/config.toml` (global)
//! 2. Environment variables (highest priority)

pub mod logging;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Current config schema version
pub const CONFIG_VERSION: u32 = 1;

/// Default backing directory exported by the server
pub const DEFAULT_ROOT: &str = "./remoteStore";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Config schema version (for forward compatibility)
    pub config_version: u32,
    pub client: ClientConfig,
    pub server: ServerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_version: CONFIG_VERSION,
            client: ClientConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

/// RPC tunables for the mount client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Per-attempt RPC deadline in milliseconds
    pub deadline_ms: u64,
    /// Attempts per operation before reporting I/O failure
    pub attempts: u32,
    /// Base backoff in milliseconds; attempt k sleeps `base * 2^(k-1)`
    pub backoff_base_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            deadline_ms: 1000,
            attempts: 3,
            backoff_base_ms: 1000,
        }
    }
}

impl ClientConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address for the daemon
    pub listen: String,
    /// Backing directory that materializes the exported namespace
    pub root: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: format!("0.0.0.0:{}", tether_proto::DEFAULT_PORT),
            root: PathBuf::from(DEFAULT_ROOT),
        }
    }
}

impl Config {
    /// Load config from the global location plus environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                let contents = std::fs::read_to_string(&global_path)?;
                config = toml::from_str(&contents)?;
            }
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse a config file at an explicit path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Global config path: ~/.tetherfs/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".tetherfs/config.toml"))
    }

    /// Apply environment variable overrides (highest priority)
    fn apply_env_overrides(&mut self) {
        if let Ok(listen) = std::env::var("TETHERFS_LISTEN") {
            self.server.listen = listen;
        }
        if let Ok(root) = std::env::var("TETHERFS_ROOT") {
            self.server.root = PathBuf::from(root);
        }
        if let Ok(ms) = std::env::var("TETHERFS_DEADLINE_MS") {
            if let Ok(n) = ms.parse() {
                self.client.deadline_ms = n;
            }
        }
        if let Ok(attempts) = std::env::var("TETHERFS_ATTEMPTS") {
            if let Ok(n) = attempts.parse() {
                self.client.attempts = n;
            }
        }
        if let Ok(ms) = std::env::var("TETHERFS_BACKOFF_MS") {
            if let Ok(n) = ms.parse() {
                self.client.backoff_base_ms = n;
            }
        }
    }
}
