//! Wi-Fi connection and subsystem-restart domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

/// Errors raised by network helpers
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Command `{command}` failed: {reason}")]
    Command { command: String, reason: String },

    #[error("Failed to connect to {ssid}: {reason}")]
    ConnectFailed { ssid: String, reason: String },

    #[error("Failed to disconnect from {ssid}: {reason}")]
    DisconnectFailed { ssid: String, reason: String },

    /// The firmware never reported recovery after a forced crash
    #[error("{target} subsystem restart not observed: {reason}")]
    RecoveryNotObserved { target: SsrTarget, reason: String },

    #[error("Network device error: {0}")]
    Device(String),

    #[error("Unknown security mode: {0}")]
    UnknownSecurity(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, NetworkError>;

/// Security mode argument of the `wifi connect` script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WifiSecurity {
    None,
    Wep,
    Psk,
    Ieee8021x,
}

impl WifiSecurity {
    pub fn as_str(&self) -> &'static str {
        match self {
            WifiSecurity::None => "none",
            WifiSecurity::Wep => "wep",
            WifiSecurity::Psk => "psk",
            WifiSecurity::Ieee8021x => "802_1x",
        }
    }
}

impl FromStr for WifiSecurity {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "open" => Ok(WifiSecurity::None),
            "wep" => Ok(WifiSecurity::Wep),
            "psk" | "wpa" | "wpa2" => Ok(WifiSecurity::Psk),
            "802_1x" | "8021x" | "eap" => Ok(WifiSecurity::Ieee8021x),
            other => Err(NetworkError::UnknownSecurity(other.to_string())),
        }
    }
}

impl fmt::Display for WifiSecurity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Firmware targeted by a subsystem restart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SsrTarget {
    Wlan,
    Bluetooth,
}

impl fmt::Display for SsrTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SsrTarget::Wlan => f.write_str("WLAN"),
            SsrTarget::Bluetooth => f.write_str("Bluetooth"),
        }
    }
}

/// Whether any output line contains `needle`
pub fn output_contains(lines: &[String], needle: &str) -> bool {
    lines.iter().any(|line| line.contains(needle))
}

/// Number of output lines containing `needle`
pub fn count_matching(lines: &[String], needle: &str) -> usize {
    lines.iter().filter(|line| line.contains(needle)).count()
}

/// Result of running the `wifi connect` script
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    AlreadyConnected,
    Failed(String),
}

/// Classify the output lines of the `wifi connect` script
pub fn classify_connect_output(lines: &[String]) -> ConnectOutcome {
    let lower: Vec<String> = lines.iter().map(|l| l.to_lowercase()).collect();
    if output_contains(&lower, "already connected") {
        ConnectOutcome::AlreadyConnected
    } else if let Some(line) = lower
        .iter()
        .zip(lines)
        .find(|(l, _)| l.contains("fail") || l.contains("error"))
        .map(|(_, line)| line)
    {
        ConnectOutcome::Failed(line.clone())
    } else {
        ConnectOutcome::Connected
    }
}

/// Whether `wifi disconnect` reported that there was nothing to disconnect
pub fn is_benign_disconnect(lines: &[String]) -> bool {
    let lower: Vec<String> = lines.iter().map(|l| l.to_lowercase()).collect();
    ["already disconnected", "not connected"]
        .iter()
        .any(|b| output_contains(&lower, b))
}

/// Whether the output of `wifi disconnect` means the DUT is now disconnected
pub fn disconnect_succeeded(lines: &[String]) -> bool {
    if is_benign_disconnect(lines) {
        return true;
    }
    !lines.iter().any(|l| {
        let l = l.to_lowercase();
        l.contains("fail") || l.contains("error")
    })
}

/// Network technology toggles exposed by the browser networking API
pub trait NetworkDevices {
    /// Technologies currently enabled, e.g. `WiFi`, `Ethernet`
    fn enabled_devices(&self) -> Result<Vec<String>>;

    fn enable_device(&self, device: &str) -> Result<()>;

    fn disable_device(&self, device: &str) -> Result<()>;
}

pub const WIFI_DEVICE: &str = "WiFi";

/// Enable Wi-Fi if it is not already on; returns whether a change was made
pub fn ensure_wifi_enabled<D: NetworkDevices + ?Sized>(devices: &D) -> Result<bool> {
    let enabled = devices.enabled_devices()?;
    if enabled.iter().any(|d| d == WIFI_DEVICE) {
        return Ok(false);
    }
    info!("Enabling WiFi network device");
    devices.enable_device(WIFI_DEVICE)?;
    Ok(true)
}
