//! Client configuration.
//!
//! Configuration can be loaded from:
//! - An explicit file named by `CADENCE_CONFIG`
//! - `cadence.toml`, `/etc/cadence/cadence.toml` or
//!   `~/.config/cadence/cadence.toml`
//! - Environment variables (`CADENCE_ORIGIN`) overriding either

use anyhow::{Context, Result};
use cadence_core::{PresenceConfig, ReconnectPolicy};
use cadence_offline::OfflineConfig;
use cadence_transport::endpoint::DEFAULT_CHANNEL_PATH;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application origin, e.g. `https://learn.example.com`.
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Presence channel configuration.
    #[serde(default)]
    pub presence: PresenceSection,

    /// Offline layer configuration.
    #[serde(default)]
    pub offline: OfflineSection,

    /// Connectivity probe configuration.
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Presence channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceSection {
    /// Path of the realtime endpoint.
    #[serde(default = "default_channel_path")]
    pub path: String,

    /// Delay before each reconnect attempt in milliseconds.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,

    /// Attempts allowed between two successful opens.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Handshake timeout in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

/// Offline layer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineSection {
    /// Where cached responses and queued writes are persisted. Empty keeps
    /// them in memory only.
    #[serde(default = "default_storage_path")]
    pub storage_path: String,

    /// Bound on a direct write in milliseconds. Zero disables the bound.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,

    /// Time-to-live of cached reads in minutes.
    #[serde(default = "default_ttl_minutes")]
    pub ttl_minutes: u64,
}

/// Connectivity probe configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Drive connectivity from a reachability probe of the origin.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Probe interval in milliseconds.
    #[serde(default = "default_probe_interval")]
    pub interval_ms: u64,

    /// Probe timeout in milliseconds.
    #[serde(default = "default_probe_timeout")]
    pub timeout_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter.
    #[serde(default)]
    pub enabled: bool,

    /// Exporter port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_origin() -> String {
    "http://localhost:3000".to_string()
}

fn default_channel_path() -> String {
    DEFAULT_CHANNEL_PATH.to_string()
}

fn default_reconnect_delay() -> u64 {
    3_000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_connect_timeout() -> u64 {
    10_000
}

fn default_storage_path() -> String {
    "~/.local/share/cadence/state.json".to_string()
}

fn default_write_timeout() -> u64 {
    15_000
}

fn default_ttl_minutes() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

fn default_probe_interval() -> u64 {
    5_000
}

fn default_probe_timeout() -> u64 {
    2_000
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            presence: PresenceSection::default(),
            offline: OfflineSection::default(),
            probe: ProbeConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for PresenceSection {
    fn default() -> Self {
        Self {
            path: default_channel_path(),
            reconnect_delay_ms: default_reconnect_delay(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

impl Default for OfflineSection {
    fn default() -> Self {
        Self {
            storage_path: default_storage_path(),
            write_timeout_ms: default_write_timeout(),
            ttl_minutes: default_ttl_minutes(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: default_probe_interval(),
            timeout_ms: default_probe_timeout(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults, then apply environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or
    /// `CADENCE_CONFIG` names a file that cannot be read.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("CADENCE_CONFIG") {
            Ok(path) => Self::from_file(shellexpand::tilde(&path).as_ref())?,
            Err(_) => Self::search()?,
        };
        config.apply_env();
        Ok(config)
    }

    fn search() -> Result<Self> {
        let config_paths = [
            "cadence.toml",
            "/etc/cadence/cadence.toml",
            "~/.config/cadence/cadence.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        Ok(Self::default())
    }

    fn apply_env(&mut self) {
        if let Ok(origin) = std::env::var("CADENCE_ORIGIN") {
            if !origin.trim().is_empty() {
                self.origin = origin;
            }
        }
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Presence channel settings.
    #[must_use]
    pub fn presence_config(&self) -> PresenceConfig {
        PresenceConfig::new(self.origin.clone())
            .with_path(self.presence.path.clone())
            .with_reconnect(ReconnectPolicy::new(
                Duration::from_millis(self.presence.reconnect_delay_ms),
                self.presence.max_reconnect_attempts,
            ))
    }

    /// Offline layer settings.
    #[must_use]
    pub fn offline_config(&self) -> OfflineConfig {
        OfflineConfig {
            write_timeout: match self.offline.write_timeout_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
        }
    }

    /// Expanded storage path, or `None` for in-memory storage.
    #[must_use]
    pub fn storage_path(&self) -> Option<PathBuf> {
        let path = self.offline.storage_path.trim();
        if path.is_empty() {
            None
        } else {
            Some(PathBuf::from(shellexpand::tilde(path).as_ref()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.origin, "http://localhost:3000");
        assert_eq!(config.presence.path, "/ws/presence");
        assert_eq!(config.presence.reconnect_delay_ms, 3_000);
        assert_eq!(config.presence.max_reconnect_attempts, 5);
        assert!(config.probe.enabled);
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            origin = "https://learn.example.com"

            [presence]
            max_reconnect_attempts = 2

            [offline]
            storage_path = ""
            write_timeout_ms = 0
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.origin, "https://learn.example.com");
        assert_eq!(config.presence.max_reconnect_attempts, 2);
        assert_eq!(config.presence.reconnect_delay_ms, 3_000);
        assert_eq!(config.storage_path(), None);
        assert_eq!(config.offline_config().write_timeout, None);
        assert_eq!(config.offline.ttl_minutes, 5);
    }

    #[test]
    fn test_presence_config() {
        let config = Config::default();
        let presence = config.presence_config();
        assert_eq!(presence.path, "/ws/presence");
        assert_eq!(presence.reconnect.max_attempts, 5);
        assert_eq!(presence.reconnect.delay, Duration::from_secs(3));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cadence.toml");
        std::fs::write(&path, "origin = \"http://10.0.0.5:8080\"\n[metrics]\nenabled = true\n")
            .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.origin, "http://10.0.0.5:8080");
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.port, 9090);

        std::fs::write(&path, "origin = [").unwrap();
        assert!(Config::from_file(&path).is_err());
    }

    #[test]
    fn test_default_storage_path() {
        let config = Config::default();
        let path = config.storage_path().unwrap();
        assert!(path.ends_with(".local/share/cadence/state.json"));
    }
}
