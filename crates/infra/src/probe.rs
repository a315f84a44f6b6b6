//! System information probe for the device under test
//!
//! File reads are resolved under a configurable sysroot so the probe can
//! run against a captured filesystem tree. Commands go through a
//! [`CommandRunner`].

use crate::shell::{command_line, CommandRunner, SystemRunner};
use dutkit_core::domain::sysinfo::{
    self, CpuInfo, MountEntry, ProbeError, Result, UsbDevice,
};
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

const LSB_RELEASE: &str = "/etc/lsb-release";
const CPUFREQ_DIR: &str = "/sys/devices/system/cpu/cpufreq";
const THERMAL_DIR: &str = "/sys/class/thermal";

pub struct DutProbe<R: CommandRunner = SystemRunner> {
    runner: R,
    sysroot: PathBuf,
}

impl DutProbe<SystemRunner> {
    pub fn new(sysroot: impl Into<PathBuf>) -> Self {
        Self::with_runner(SystemRunner, sysroot)
    }
}

impl<R: CommandRunner> DutProbe<R> {
    pub fn with_runner(runner: R, sysroot: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            sysroot: sysroot.into(),
        }
    }

    pub fn sysroot(&self) -> &Path {
        &self.sysroot
    }

    /// Map an absolute DUT path into the sysroot
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        self.sysroot
            .join(path.strip_prefix("/").unwrap_or(path))
    }

    fn read(&self, path: impl AsRef<Path>) -> Result<String> {
        let resolved = self.resolve(path);
        fs::read_to_string(&resolved).map_err(|e| {
            debug!(path = %resolved.display(), error = %e, "Read failed");
            ProbeError::Io(e)
        })
    }

    /// Run a command and return its stdout, failing on non-zero exit
    pub fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        let output = self
            .runner
            .run(program, args, None)
            .map_err(|e| ProbeError::Command {
                command: command_line(program, args),
                reason: e.to_string(),
            })?;
        if !output.success {
            return Err(ProbeError::Command {
                command: command_line(program, args),
                reason: output.failure_reason(),
            });
        }
        Ok(output.stdout)
    }

    fn run_trimmed(&self, program: &str, args: &[&str]) -> Result<String> {
        Ok(self.run(program, args)?.trim().to_string())
    }

    // ========================================================================
    // Logs and devices
    // ========================================================================

    /// Raw `lsusb` output
    pub fn usb_listing(&self) -> Result<String> {
        self.run("lsusb", &[])
    }

    pub fn usb_devices(&self) -> Result<Vec<UsbDevice>> {
        let devices = sysinfo::parse_lsusb(&self.usb_listing()?);
        debug!(count = devices.len(), "USB devices");
        Ok(devices)
    }

    pub fn dmesg(&self) -> Result<String> {
        self.run("dmesg", &[])
    }

    /// Coreboot log of the last boot
    pub fn cbmem_log(&self) -> Result<String> {
        self.run("cbmem", &["-1"])
    }

    /// Write a command's stdout to `dir/file_name`
    #[instrument(skip(self, args))]
    pub fn capture_to_file(
        &self,
        program: &str,
        args: &[&str],
        file_name: &str,
        dir: &Path,
    ) -> Result<PathBuf> {
        let stdout = self.run(program, args)?;
        fs::create_dir_all(dir)?;
        let path = dir.join(file_name);
        fs::write(&path, stdout)?;
        info!(path = %path.display(), "Captured command output");
        Ok(path)
    }

    // ========================================================================
    // Build and firmware identity
    // ========================================================================

    /// Value of `key` in `/etc/lsb-release`
    pub fn board_property(&self, key: &str) -> Result<Option<String>> {
        Ok(sysinfo::lsb_release_property(&self.read(LSB_RELEASE)?, key))
    }

    fn required_property(&self, key: &str) -> Result<String> {
        self.board_property(key)?
            .ok_or_else(|| ProbeError::NotFound(format!("{} in {}", key, LSB_RELEASE)))
    }

    pub fn board(&self) -> Result<String> {
        self.required_property("BOARD")
    }

    pub fn chromeos_version(&self) -> Result<String> {
        self.required_property("CHROMEOS_RELEASE_VERSION")
    }

    /// Model name from `cros_config`, or the board name when it has none
    pub fn platform_name(&self) -> Result<String> {
        match self.run_trimmed("cros_config", &["/", "name"]) {
            Ok(name) if !name.is_empty() => Ok(name),
            Ok(_) => self.board(),
            Err(e) => {
                warn!(error = %e, "cros_config unavailable, using board name");
                self.board()
            }
        }
    }

    pub fn firmware_version(&self) -> Result<String> {
        self.run_trimmed("crossystem", &["fwid"])
    }

    pub fn hardware_id(&self) -> Result<String> {
        self.run_trimmed("crossystem", &["hwid"])
    }

    pub fn kernel_version(&self) -> Result<String> {
        self.run_trimmed("uname", &["-r"])
    }

    pub fn kernel_arch(&self) -> Result<String> {
        self.run_trimmed("uname", &["-m"])
    }

    /// Disk holding the root filesystem, e.g. `/dev/sda`
    pub fn root_device(&self) -> Result<String> {
        self.run_trimmed("rootdev", &["-s", "-d"])
    }

    /// Source column of every mounted filesystem
    pub fn mount_devices(&self) -> Result<Vec<String>> {
        Ok(sysinfo::parse_mount_devices(&self.run("mount", &[])?))
    }

    // ========================================================================
    // CPU and memory
    // ========================================================================

    pub fn cpuinfo(&self) -> Result<Vec<CpuInfo>> {
        Ok(sysinfo::parse_cpuinfo(&self.read("/proc/cpuinfo")?))
    }

    /// Number of processors, never less than one
    pub fn count_cpus(&self) -> Result<usize> {
        Ok(self.cpuinfo()?.len().max(1))
    }

    pub fn cpu_online_map(&self) -> Result<Vec<String>> {
        Ok(sysinfo::cpu_online_map(&self.cpuinfo()?))
    }

    /// `/proc/meminfo` values in kB
    pub fn meminfo(&self) -> Result<BTreeMap<String, u64>> {
        Ok(sysinfo::parse_meminfo(&self.read("/proc/meminfo")?))
    }

    pub fn mem_total_kb(&self) -> Result<u64> {
        self.meminfo()?
            .get("MemTotal")
            .copied()
            .ok_or_else(|| ProbeError::NotFound("MemTotal in /proc/meminfo".to_string()))
    }

    // ========================================================================
    // Mounts
    // ========================================================================

    pub fn mounts(&self) -> Result<Vec<MountEntry>> {
        Ok(sysinfo::parse_mounts(&self.read("/proc/mounts")?))
    }

    pub fn is_mountpoint(&self, path: &str) -> Result<bool> {
        Ok(self.mounts()?.iter().any(|m| m.target == path))
    }

    pub fn require_mountpoint(&self, path: &str) -> Result<()> {
        if self.is_mountpoint(path)? {
            Ok(())
        } else {
            Err(ProbeError::NotMounted(PathBuf::from(path)))
        }
    }

    // ========================================================================
    // Thermal and cpufreq
    // ========================================================================

    /// Sorted entries of `dir` whose names start with `prefix`
    fn entries_with_prefix(&self, dir: &str, prefix: &str) -> Result<Vec<(String, PathBuf)>> {
        let resolved = self.resolve(dir);
        let mut entries = Vec::new();
        for entry in fs::read_dir(&resolved)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(prefix) {
                entries.push((name, entry.path()));
            }
        }
        entries.sort();
        Ok(entries)
    }

    /// Temperature of every readable thermal zone, in degrees Celsius
    pub fn thermal_zone_temperatures(&self) -> Result<Vec<f64>> {
        let zones = match self.entries_with_prefix(THERMAL_DIR, "thermal_zone") {
            Ok(zones) => zones,
            Err(ProbeError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("No thermal zones exposed");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let mut temperatures = Vec::new();
        for (name, path) in zones {
            // Reserved zones fail to read
            let reading = fs::read_to_string(path.join("temp"))
                .map_err(ProbeError::from)
                .and_then(|text| sysinfo::parse_millidegrees(&text));
            match reading {
                Ok(celsius) => temperatures.push(celsius),
                Err(e) => warn!(zone = %name, error = %e, "Skipping thermal zone"),
            }
        }
        Ok(temperatures)
    }

    /// Contents of `file` in every cpufreq policy directory
    fn per_policy(&self, file: &str) -> Result<BTreeMap<String, String>> {
        let mut values = BTreeMap::new();
        for (policy, path) in self.entries_with_prefix(CPUFREQ_DIR, "policy")? {
            match fs::read_to_string(path.join(file)) {
                Ok(value) => {
                    values.insert(policy, value.trim().to_string());
                }
                Err(e) => warn!(%policy, file, error = %e, "Unreadable cpufreq attribute"),
            }
        }
        Ok(values)
    }

    fn per_policy_khz(&self, file: &str) -> Result<BTreeMap<String, u64>> {
        self.per_policy(file)?
            .into_iter()
            .map(|(policy, value)| {
                value
                    .parse::<u64>()
                    .map(|khz| (policy, khz))
                    .map_err(|_| ProbeError::Parse(format!("{}: {:?}", file, value)))
            })
            .collect()
    }

    pub fn scaling_governors(&self) -> Result<BTreeMap<String, String>> {
        self.per_policy("scaling_governor")
    }

    /// Current frequency per policy, in kHz
    pub fn scaling_frequencies(&self) -> Result<BTreeMap<String, u64>> {
        self.per_policy_khz("scaling_cur_freq")
    }

    pub fn cpu_max_frequencies(&self) -> Result<BTreeMap<String, u64>> {
        self.per_policy_khz("cpuinfo_max_freq")
    }

    pub fn cpu_min_frequencies(&self) -> Result<BTreeMap<String, u64>> {
        self.per_policy_khz("cpuinfo_min_freq")
    }

    // ========================================================================
    // Pattern search
    // ========================================================================

    fn read_regular_file(&self, path: &Path) -> Result<String> {
        let resolved = self.resolve(path);
        if !resolved.is_file() {
            return Err(ProbeError::InvalidPath(path.to_path_buf()));
        }
        Ok(fs::read_to_string(resolved)?)
    }

    /// Whether any line of `path` matches `pattern`
    pub fn file_contains_pattern(&self, path: &Path, pattern: &str) -> Result<bool> {
        let re = Regex::new(pattern)?;
        let text = self.read_regular_file(path)?;
        Ok(sysinfo::list_grep(text.lines(), &re))
    }

    /// Every match of `pattern` in `path`
    pub fn search_file(&self, path: &Path, pattern: &str) -> Result<Vec<String>> {
        let re = Regex::new(pattern)?;
        let text = self.read_regular_file(path)?;
        Ok(re.find_iter(&text).map(|m| m.as_str().to_string()).collect())
    }
}
