//! Parsers for DUT system information
//!
//! Pure functions over the text of `/proc` files, `/etc/lsb-release` and
//! command output. Reading the files and running the commands is done by
//! the probe in the `infra` crate.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::warn;

/// Errors raised while collecting system information
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// External command missing or exited non-zero
    #[error("Command `{command}` failed: {reason}")]
    Command { command: String, reason: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Path not mounted: {0}")]
    NotMounted(PathBuf),

    #[error("Invalid path: {0}")]
    InvalidPath(PathBuf),

    #[error("Already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

pub type Result<T> = std::result::Result<T, ProbeError>;

/// One processor block of `/proc/cpuinfo`
pub type CpuInfo = BTreeMap<String, String>;

fn cpuinfo_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?P<key>[^\t]*)\t*: ?(?P<value>.*)$").expect("valid regex"))
}

fn meminfo_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\w+)(\((\w+)\))?:\s+(\d+)").expect("valid regex"))
}

/// Split `/proc/cpuinfo` into per-processor maps
pub fn parse_cpuinfo(text: &str) -> Vec<CpuInfo> {
    let mut cpus = Vec::new();
    let mut cpu = CpuInfo::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            if !cpu.is_empty() {
                cpus.push(std::mem::take(&mut cpu));
            }
            continue;
        }
        match cpuinfo_re().captures(line) {
            Some(caps) => {
                cpu.insert(caps["key"].trim().to_string(), caps["value"].to_string());
            }
            None => warn!(line, "Unrecognised cpuinfo line"),
        }
    }
    // cpuinfo usually ends in a blank line
    if !cpu.is_empty() {
        cpus.push(cpu);
    }
    cpus
}

/// Processor numbers listed in `/proc/cpuinfo`
pub fn cpu_online_map(cpus: &[CpuInfo]) -> Vec<String> {
    cpus.iter()
        .filter_map(|cpu| cpu.get("processor").cloned())
        .collect()
}

/// Parse `/proc/meminfo` into kB values
///
/// `Active(anon)` is stored as `Active_anon`.
pub fn parse_meminfo(text: &str) -> BTreeMap<String, u64> {
    let mut info = BTreeMap::new();
    for line in text.lines() {
        if let Some(caps) = meminfo_re().captures(line) {
            let name = match caps.get(3) {
                Some(qualifier) => format!("{}_{}", &caps[1], qualifier.as_str()),
                None => caps[1].to_string(),
            };
            if let Ok(value) = caps[4].parse() {
                info.insert(name, value);
            }
        }
    }
    info
}

/// One line of `/proc/mounts`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountEntry {
    pub source: String,
    pub target: String,
    pub fs_type: String,
}

pub fn parse_mounts(text: &str) -> Vec<MountEntry> {
    text.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            Some(MountEntry {
                source: fields.next()?.to_string(),
                target: fields.next()?.to_string(),
                fs_type: fields.next()?.to_string(),
            })
        })
        .collect()
}

/// First column of each `mount` output line
pub fn parse_mount_devices(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// Value of `KEY=value` in `/etc/lsb-release`
pub fn lsb_release_property(text: &str, key: &str) -> Option<String> {
    text.lines().find_map(|line| {
        let (k, v) = line.split_once('=')?;
        (k.trim() == key).then(|| v.trim().to_string())
    })
}

/// A device listed by `lsusb`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbDevice {
    pub bus: u16,
    pub device: u16,
    pub vendor_id: String,
    pub product_id: String,
    pub description: String,
}

/// Parse `Bus 001 Device 002: ID 8087:0024 Intel Corp. Hub` lines
pub fn parse_lsusb(text: &str) -> Vec<UsbDevice> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"^Bus (\d+) Device (\d+): ID ([0-9a-fA-F]{4}):([0-9a-fA-F]{4})\s*(.*)$")
            .expect("valid regex")
    });

    text.lines()
        .filter_map(|line| {
            let caps = re.captures(line.trim())?;
            Some(UsbDevice {
                bus: caps[1].parse().ok()?,
                device: caps[2].parse().ok()?,
                vendor_id: caps[3].to_lowercase(),
                product_id: caps[4].to_lowercase(),
                description: caps[5].trim().to_string(),
            })
        })
        .collect()
}

/// Thermal zone reading in millidegrees to degrees Celsius
pub fn parse_millidegrees(text: &str) -> Result<f64> {
    let trimmed = text.trim();
    trimmed
        .parse::<f64>()
        .map(|milli| milli * 0.001)
        .map_err(|_| ProbeError::Parse(format!("not a temperature: {:?}", trimmed)))
}

/// Whether any line matches `pattern`
pub fn list_grep<'a, I>(lines: I, pattern: &Regex) -> bool
where
    I: IntoIterator<Item = &'a str>,
{
    lines.into_iter().any(|line| pattern.is_match(line))
}
