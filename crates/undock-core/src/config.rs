//! Configuration system for undock.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $UNDOCK_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/undock/config.toml
//!   3. ~/.config/undock/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UndockConfig {
    /// Services hosted on this node, as reported by the workload supervisor.
    /// Kept first so it serializes ahead of the tables below.
    pub services: Vec<LocalService>,
    pub identity: IdentityConfig,
    pub network: NetworkConfig,
    pub announce: AnnounceConfig,
    pub routing: RoutingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Path to the X25519 overlay keypair. Auto-generated on first run.
    pub keypair_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Interface carrying the link-local announcement multicast.
    pub interface: String,
    /// TCP port for inbound overlay streams. 0 = OS-assigned.
    pub overlay_port: u16,
    /// Port of the local HTTP API.
    pub api_port: u16,
    /// Address the HTTP API binds to.
    pub api_bind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnounceConfig {
    /// Seconds between periodic announcements.
    pub interval_secs: u64,
    /// Drop peers not heard from for this long. 0 = never.
    pub peer_ttl_secs: u64,
    /// How an announcement older than the stored one is treated.
    pub ordering: AnnounceOrdering,
}

/// Policy for announcements arriving out of order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnounceOrdering {
    /// The most recently received announcement replaces the stored one.
    #[default]
    LastWriteWins,
    /// An announcement whose lastSeen is older than the stored one is ignored.
    Monotonic,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Max forwards in flight at once. 0 = unbounded.
    pub max_concurrent_forwards: usize,
}

/// One locally hosted workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalService {
    /// Logical service identifier, shared by every peer hosting it.
    pub id: String,
    /// Container image the workload runs.
    #[serde(default)]
    pub image: String,
    /// Host port the workload's HTTP surface listens on.
    pub port: u16,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            keypair_path: config_dir().join("keypair"),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            interface: String::new(),
            overlay_port: 0,
            api_port: 9101,
            api_bind: "127.0.0.1".to_string(),
        }
    }
}

impl Default for AnnounceConfig {
    fn default() -> Self {
        Self {
            interval_secs: crate::wire::ANNOUNCE_INTERVAL_SECS,
            peer_ttl_secs: 0,
            ordering: AnnounceOrdering::LastWriteWins,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("undock")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl UndockConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            Self::parse(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            UndockConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse a TOML document without touching the environment.
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("UNDOCK_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&UndockConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply UNDOCK_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("UNDOCK_NETWORK__INTERFACE") {
            self.network.interface = v;
        }
        if let Ok(v) = std::env::var("UNDOCK_NETWORK__OVERLAY_PORT") {
            if let Ok(p) = v.parse() {
                self.network.overlay_port = p;
            }
        }
        if let Ok(v) = std::env::var("UNDOCK_NETWORK__API_PORT") {
            if let Ok(p) = v.parse() {
                self.network.api_port = p;
            }
        }
        if let Ok(v) = std::env::var("UNDOCK_ANNOUNCE__INTERVAL_SECS") {
            if let Ok(s) = v.parse() {
                self.announce.interval_secs = s;
            }
        }
        if let Ok(v) = std::env::var("UNDOCK_ANNOUNCE__PEER_TTL_SECS") {
            if let Ok(s) = v.parse() {
                self.announce.peer_ttl_secs = s;
            }
        }
        if let Ok(v) = std::env::var("UNDOCK_ROUTING__MAX_CONCURRENT_FORWARDS") {
            if let Ok(n) = v.parse() {
                self.routing.max_concurrent_forwards = n;
            }
        }
    }
}
