//! Configuration management for dutkit
//!
//! This module provides:
//! - Timing, path, network and audio-transport settings with defaults
//! - TOML serialization of the whole configuration
//! - A manager for the user-level config file with corrupt-file fallback

use crate::domain::poll::PollConfig;
use crate::domain::ui::UiPacing;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, error, info, instrument};

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur during configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Waits and settle times, in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Upper bound for an audio switch or volume change to show up
    pub settle_timeout_ms: u64,

    /// Delay between two read-backs while waiting
    pub poll_interval_ms: u64,

    /// Pause after each UI click
    pub ui_wait_ms: u64,

    /// Time for a network device or connection to change state
    pub network_settle_ms: u64,

    /// Upper bound for firmware recovery after a subsystem restart
    pub ssr_settle_ms: u64,

    /// Gap between two playback position probes
    pub playback_probe_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            settle_timeout_ms: 10_000,
            poll_interval_ms: 250,
            ui_wait_ms: 5_000,
            network_settle_ms: 20_000,
            ssr_settle_ms: 20_000,
            playback_probe_ms: 10_000,
        }
    }
}

impl TimingConfig {
    pub fn settle(&self) -> PollConfig {
        PollConfig::new(
            Duration::from_millis(self.settle_timeout_ms),
            Duration::from_millis(self.poll_interval_ms),
        )
    }

    pub fn ssr(&self) -> PollConfig {
        PollConfig::new(
            Duration::from_millis(self.ssr_settle_ms),
            Duration::from_millis(self.poll_interval_ms.max(1_000)),
        )
    }

    pub fn ui_wait(&self) -> Duration {
        Duration::from_millis(self.ui_wait_ms)
    }

    pub fn network_settle(&self) -> Duration {
        Duration::from_millis(self.network_settle_ms)
    }

    pub fn playback_probe(&self) -> Duration {
        Duration::from_millis(self.playback_probe_ms)
    }

    /// Pause one poll interval after each click, wait up to `ui_wait_ms`
    /// for each element
    pub fn ui_pacing(&self) -> UiPacing {
        UiPacing::new(
            Duration::from_millis(self.poll_interval_ms),
            PollConfig::new(self.ui_wait(), Duration::from_millis(self.poll_interval_ms)),
        )
    }

    /// Bound for a player to report progress
    pub fn playback_poll(&self) -> PollConfig {
        PollConfig::new(
            self.playback_probe(),
            Duration::from_millis(self.poll_interval_ms),
        )
    }
}

/// Filesystem locations on the DUT
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Prefix for every /proc, /sys and /etc read
    pub sysroot: PathBuf,

    /// Where captured logs and artifacts go
    pub results_dir: PathBuf,

    /// User download directory (screenshots, recordings)
    pub downloads_dir: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            sysroot: PathBuf::from("/"),
            results_dir: PathBuf::from("/usr/local/autotest/results/default"),
            downloads_dir: PathBuf::from("/home/chronos/user/Downloads"),
        }
    }
}

/// Wi-Fi scripts and subsystem-restart hooks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Directory holding the `wifi` connect/disconnect script
    pub script_dir: PathBuf,

    /// remoteproc coredump switch, written with `enabled`
    pub wlan_coredump_path: PathBuf,

    /// debugfs node that crashes the WLAN firmware, written with `assert`
    pub wlan_crash_path: PathBuf,

    /// dmesg line printed once the WLAN firmware is back
    pub wlan_recovery_pattern: String,

    /// Vendor HCI command that resets the Bluetooth controller
    pub bluetooth_ssr_command: Vec<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            script_dir: PathBuf::from("/usr/local/autotest/cros/scripts"),
            wlan_coredump_path: PathBuf::from("/sys/class/remoteproc/remoteproc0/coredump"),
            wlan_crash_path: PathBuf::from(
                "/sys/kernel/debug/ath11k/wcn6750 hw1.0/simulate_fw_crash",
            ),
            wlan_recovery_pattern: "0.wifi: pdev 0 successfully recovered".to_string(),
            bluetooth_ssr_command: ["hcitool", "cmd", "0x3f", "0x0c", "0x26"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// How to reach the Cras control interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub dbus_send: String,
    pub destination: String,
    pub object_path: String,
    pub interface: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            dbus_send: "dbus-send".to_string(),
            destination: "org.chromium.cras".to_string(),
            object_path: "/org/chromium/cras".to_string(),
            interface: "org.chromium.cras.Control".to_string(),
        }
    }
}

/// Complete dutkit configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DutConfig {
    pub timing: TimingConfig,
    pub paths: PathConfig,
    pub network: NetworkConfig,
    pub audio: AudioConfig,
}

impl DutConfig {
    /// Check values that would make every wait meaningless
    pub fn validate(&self) -> Result<()> {
        if self.timing.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "timing.poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.timing.poll_interval_ms > self.timing.settle_timeout_ms {
            return Err(ConfigError::Invalid(
                "timing.poll_interval_ms exceeds timing.settle_timeout_ms".to_string(),
            ));
        }
        if self.network.wlan_recovery_pattern.is_empty() {
            return Err(ConfigError::Invalid(
                "network.wlan_recovery_pattern must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Load configuration from TOML file
    #[instrument(skip(path))]
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = fs::read_to_string(path).await?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;

        debug!("Configuration loaded successfully");
        Ok(config)
    }

    /// Save configuration to TOML file
    #[instrument(skip(self, path))]
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!(path = %path.display(), "Saving configuration");

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let toml_str = toml::to_string_pretty(self)?;
        fs::write(path, toml_str).await?;

        debug!("Configuration saved successfully");
        Ok(())
    }
}

/// Manager for the user-level config file
///
/// Manages `~/.config/dutkit/config.toml`.
pub struct ConfigManager {
    config_dir: PathBuf,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new(config_dir: PathBuf) -> Self {
        let config_path = config_dir.join("config.toml");
        Self {
            config_dir,
            config_path,
        }
    }

    /// Manager for an explicit config file
    pub fn for_file(config_path: PathBuf) -> Self {
        let config_dir = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self {
            config_dir,
            config_path,
        }
    }

    /// Get the default config directory path (`~/.config/dutkit` on Linux)
    pub fn default_config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join("dutkit"))
            .ok_or_else(|| ConfigError::Invalid("Could not determine config directory".to_string()))
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load configuration from file
    ///
    /// A missing file yields the defaults. A corrupt file is logged, copied
    /// aside as `config.toml.corrupt`, and the defaults are returned.
    #[instrument(skip(self))]
    pub async fn load(&self) -> DutConfig {
        if !self.config_path.exists() {
            info!(
                path = %self.config_path.display(),
                "Config file not found, using defaults"
            );
            return DutConfig::default();
        }

        match DutConfig::load_from_file(&self.config_path).await {
            Ok(config) => config,
            Err(e) => {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to load config, using defaults"
                );

                let backup_path = self.config_path.with_extension("toml.corrupt");
                if let Err(copy_err) = fs::copy(&self.config_path, &backup_path).await {
                    error!(
                        path = %backup_path.display(),
                        error = %copy_err,
                        "Failed to backup corrupt config"
                    );
                }

                DutConfig::default()
            }
        }
    }

    /// Save configuration to file
    #[instrument(skip(self, config))]
    pub async fn save(&self, config: &DutConfig) -> Result<()> {
        fs::create_dir_all(&self.config_dir).await?;
        config.save_to_file(&self.config_path).await
    }

    /// Delete the config file if present
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<()> {
        if self.config_path.exists() {
            fs::remove_file(&self.config_path).await?;
            info!(path = %self.config_path.display(), "Configuration cleared");
        }
        Ok(())
    }

    pub fn exists(&self) -> bool {
        self.config_path.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_serialization() {
        let config = DutConfig::default();

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: DutConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config, parsed);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: DutConfig = toml::from_str(
            r#"
            [timing]
            settle_timeout_ms = 3000

            [paths]
            sysroot = "/tmp/fake-dut"
            "#,
        )
        .unwrap();

        assert_eq!(parsed.timing.settle_timeout_ms, 3000);
        assert_eq!(parsed.timing.poll_interval_ms, 250);
        assert_eq!(parsed.paths.sysroot, PathBuf::from("/tmp/fake-dut"));
        assert_eq!(parsed.audio.destination, "org.chromium.cras");
    }

    #[test]
    fn test_timing_conversions() {
        let timing = TimingConfig::default();
        let settle = timing.settle();
        assert_eq!(settle.timeout, Duration::from_secs(10));
        assert_eq!(settle.interval, Duration::from_millis(250));
        assert_eq!(timing.ssr().interval, Duration::from_secs(1));

        let pacing = timing.ui_pacing();
        assert_eq!(pacing.appear.timeout, Duration::from_secs(5));
        assert_eq!(pacing.pause, Duration::from_millis(250));
        assert!(!pacing.cancel.is_cancelled());

        let playback = timing.playback_poll();
        assert_eq!(playback.timeout, Duration::from_secs(10));
        assert_eq!(playback.interval, Duration::from_millis(250));
    }

    #[test]
    fn test_validate() {
        let mut config = DutConfig::default();
        assert!(config.validate().is_ok());

        config.timing.poll_interval_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.timing.poll_interval_ms = 20_000;
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_save_and_load_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let mut config = DutConfig::default();
        config.timing.ssr_settle_ms = 1234;
        config.save_to_file(&config_path).await.unwrap();

        assert!(config_path.exists());

        let loaded = DutConfig::load_from_file(&config_path).await.unwrap();
        assert_eq!(loaded.timing.ssr_settle_ms, 1234);
    }

    #[tokio::test]
    async fn test_manager_missing_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::new(temp_dir.path().to_path_buf());

        assert!(!manager.exists());
        assert_eq!(manager.load().await, DutConfig::default());
    }

    #[tokio::test]
    async fn test_manager_backs_up_corrupt_file() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::new(temp_dir.path().to_path_buf());
        tokio::fs::write(manager.config_path(), "timing = [not toml")
            .await
            .unwrap();

        let config = manager.load().await;
        assert_eq!(config, DutConfig::default());
        assert!(temp_dir.path().join("config.toml.corrupt").exists());
    }

    #[tokio::test]
    async fn test_manager_save_and_clear() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::for_file(temp_dir.path().join("dutkit.toml"));

        manager.save(&DutConfig::default()).await.unwrap();
        assert!(manager.exists());

        manager.clear().await.unwrap();
        assert!(!manager.exists());
    }
}
