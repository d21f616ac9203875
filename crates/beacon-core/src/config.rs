//! Configuration system for Beacon.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $BEACON_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/beacon/config.toml
//!   3. ~/.config/beacon/config.toml

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use crate::wire::{ANNOUNCE_PERIOD_MS, DEFAULT_GROUP, DEFAULT_PORT};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconConfig {
    pub discovery: DiscoveryConfig,
    pub service: ServiceConfig,
}

/// Settings of the discovery engine. Fixed once the engine is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Multicast group address. IPv4 or IPv6.
    pub group: IpAddr,
    /// UDP port shared by all participants.
    pub port: u16,
    /// Local IPv4 interface to join and send on. 0.0.0.0 = let the OS pick.
    pub interface_addr: Ipv4Addr,
    /// IPv6 interface index. 0 = let the OS pick.
    pub interface_index: u32,
    /// Milliseconds between two announcements.
    pub announce_period_ms: u64,
    /// Multicast TTL / hop limit. 1 keeps announcements on the local link.
    pub multicast_ttl: u32,
    /// Forget a service name not heard from for this long. 0 = never.
    pub entry_ttl_ms: u64,
    /// How often the expiry sweep runs when `entry_ttl_ms` is set.
    pub sweep_interval_ms: u64,
}

/// The service this node announces.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    /// Contact URI. Empty = derived from the local address at startup.
    pub uri: String,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            group: IpAddr::V4(DEFAULT_GROUP),
            port: DEFAULT_PORT,
            interface_addr: Ipv4Addr::UNSPECIFIED,
            interface_index: 0,
            announce_period_ms: ANNOUNCE_PERIOD_MS,
            multicast_ttl: 1,
            entry_ttl_ms: 0,
            sweep_interval_ms: 1000,
        }
    }
}

impl DiscoveryConfig {
    pub fn announce_period(&self) -> Duration {
        Duration::from_millis(self.announce_period_ms)
    }

    /// `None` when entries never expire.
    pub fn entry_ttl(&self) -> Option<Duration> {
        (self.entry_ttl_ms > 0).then(|| Duration::from_millis(self.entry_ttl_ms))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("beacon")
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

impl BeaconConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            Self::from_toml(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            BeaconConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("BEACON_CONFIG")
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
            let text = toml::to_string_pretty(&BeaconConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply BEACON_* overrides. `lookup` is `std::env::var` outside tests.
    /// Unparseable numeric values are ignored.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("BEACON_DISCOVERY__GROUP") {
            if let Ok(group) = v.parse() {
                self.discovery.group = group;
            }
        }
        if let Some(v) = lookup("BEACON_DISCOVERY__PORT") {
            if let Ok(p) = v.parse() {
                self.discovery.port = p;
            }
        }
        if let Some(v) = lookup("BEACON_DISCOVERY__ANNOUNCE_PERIOD_MS") {
            if let Ok(ms) = v.parse() {
                self.discovery.announce_period_ms = ms;
            }
        }
        if let Some(v) = lookup("BEACON_DISCOVERY__ENTRY_TTL_MS") {
            if let Ok(ms) = v.parse() {
                self.discovery.entry_ttl_ms = ms;
            }
        }
        if let Some(v) = lookup("BEACON_SERVICE__NAME") {
            self.service.name = v;
        }
        if let Some(v) = lookup("BEACON_SERVICE__URI") {
            self.service.uri = v;
        }
    }
}
