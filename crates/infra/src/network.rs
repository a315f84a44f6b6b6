//! Wi-Fi connection scripts and firmware subsystem restarts

use crate::shell::{
    command_line, redacted_line, CommandOutput, CommandRunner, SystemRunner, REDACTED,
};
use dutkit_core::domain::config::NetworkConfig;
use dutkit_core::domain::network::{
    classify_connect_output, count_matching, disconnect_succeeded, is_benign_disconnect,
    ConnectOutcome, NetworkError, Result, SsrTarget, WifiSecurity,
};
use dutkit_core::domain::poll::{poll_until, CancelToken, PollConfig, PollError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

const WIFI_SCRIPT: &str = "./wifi";
const RESET_LOG: &str = "reset_log.txt";

fn run<R: CommandRunner + ?Sized>(
    runner: &R,
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
) -> Result<CommandOutput> {
    runner
        .run(program, args, cwd)
        .map_err(|e| NetworkError::Command {
            command: command_line(program, args),
            reason: e.to_string(),
        })
}

/// Driver for the `wifi` helper script
pub struct WifiScripts<R: CommandRunner = SystemRunner> {
    runner: R,
    script_dir: PathBuf,
}

impl WifiScripts<SystemRunner> {
    pub fn new(script_dir: impl Into<PathBuf>) -> Self {
        Self::with_runner(SystemRunner, script_dir)
    }
}

impl<R: CommandRunner> WifiScripts<R> {
    pub fn with_runner(runner: R, script_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            script_dir: script_dir.into(),
        }
    }

    /// `./wifi connect <ssid> <passphrase> <security>`
    #[instrument(skip(self, passphrase))]
    pub fn connect(
        &self,
        ssid: &str,
        passphrase: &str,
        security: WifiSecurity,
    ) -> Result<ConnectOutcome> {
        let args = ["connect", ssid, passphrase, security.as_str()];
        let output = self
            .runner
            .run_secret(WIFI_SCRIPT, &args, Some(&self.script_dir), passphrase)
            .map_err(|e| {
                let mut reason = e.to_string();
                if !passphrase.is_empty() {
                    reason = reason.replace(passphrase, REDACTED);
                }
                NetworkError::Command {
                    command: redacted_line(WIFI_SCRIPT, &args, passphrase),
                    reason,
                }
            })?;
        let lines = output.lines();

        match classify_connect_output(&lines) {
            ConnectOutcome::AlreadyConnected => {
                info!(ssid, "Already connected");
                Ok(ConnectOutcome::AlreadyConnected)
            }
            ConnectOutcome::Connected if output.success => {
                info!(ssid, "Connected");
                Ok(ConnectOutcome::Connected)
            }
            ConnectOutcome::Connected => Err(NetworkError::ConnectFailed {
                ssid: ssid.to_string(),
                reason: output.failure_reason(),
            }),
            ConnectOutcome::Failed(reason) => Err(NetworkError::ConnectFailed {
                ssid: ssid.to_string(),
                reason,
            }),
        }
    }

    /// `./wifi disconnect <ssid>`; being already disconnected is success
    #[instrument(skip(self))]
    pub fn disconnect(&self, ssid: &str) -> Result<()> {
        let output = run(&self.runner, WIFI_SCRIPT, &["disconnect", ssid], Some(&self.script_dir))?;
        let lines = output.lines();

        if is_benign_disconnect(&lines) || (output.success && disconnect_succeeded(&lines)) {
            info!(ssid, "Disconnected");
            return Ok(());
        }
        Err(NetworkError::DisconnectFailed {
            ssid: ssid.to_string(),
            reason: lines
                .last()
                .cloned()
                .unwrap_or_else(|| output.failure_reason()),
        })
    }
}

/// Forces firmware crashes and waits for recovery
pub struct SsrDriver<R: CommandRunner = SystemRunner> {
    runner: R,
    config: NetworkConfig,
    results_dir: PathBuf,
    poll: PollConfig,
    cancel: CancelToken,
}

impl<R: CommandRunner> SsrDriver<R> {
    pub fn new(runner: R, config: NetworkConfig, results_dir: impl Into<PathBuf>, poll: PollConfig) -> Self {
        Self {
            runner,
            config,
            results_dir: results_dir.into(),
            poll,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn write_node(path: &Path, value: &str) -> Result<()> {
        debug!(path = %path.display(), value, "Writing fault-injection node");
        fs::write(path, value)?;
        Ok(())
    }

    /// Crash the WLAN firmware and wait for a new recovery line in dmesg
    ///
    /// Recovery lines already in the ring buffer before the crash do not
    /// count. The last dmesg read is kept in `reset_log.txt` under the
    /// results directory whatever the outcome; its path is returned on
    /// success.
    #[instrument(skip(self))]
    pub fn wlan_ssr(&self) -> Result<PathBuf> {
        let pattern = self.config.wlan_recovery_pattern.as_str();
        let baseline = count_matching(&run(&self.runner, "dmesg", &[], None)?.lines(), pattern);
        debug!(baseline, "Recovery lines before crash");

        Self::write_node(&self.config.wlan_coredump_path, "enabled")?;
        Self::write_node(&self.config.wlan_crash_path, "assert")?;
        info!("WLAN firmware crash triggered");

        let mut last_log = String::new();
        let outcome = poll_until(self.poll, &self.cancel, || {
            let output = run(&self.runner, "dmesg", &[], None)?;
            let recovered = count_matching(&output.lines(), pattern) > baseline;
            last_log = output.stdout;
            Ok::<_, NetworkError>(recovered.then_some(()))
        })?;

        fs::create_dir_all(&self.results_dir)?;
        let log_path = self.results_dir.join(RESET_LOG);
        fs::write(&log_path, &last_log)?;

        match outcome {
            Ok(()) => {
                info!(log = %log_path.display(), "WLAN subsystem restart completed");
                Ok(log_path)
            }
            Err(e) => {
                let reason = match e {
                    PollError::Timeout(after) => {
                        format!("{:?} not seen in dmesg within {:?}", pattern, after)
                    }
                    PollError::Cancelled => "cancelled".to_string(),
                };
                warn!(%reason, "WLAN subsystem restart not observed");
                Err(NetworkError::RecoveryNotObserved {
                    target: SsrTarget::Wlan,
                    reason,
                })
            }
        }
    }

    /// Send the vendor reset command to the Bluetooth controller
    #[instrument(skip(self))]
    pub fn bluetooth_ssr(&self) -> Result<Vec<String>> {
        let (program, args) = self
            .config
            .bluetooth_ssr_command
            .split_first()
            .ok_or_else(|| NetworkError::Command {
                command: String::new(),
                reason: "network.bluetooth_ssr_command is empty".to_string(),
            })?;
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        let output = run(&self.runner, program, &args, None)?;
        if !output.success {
            return Err(NetworkError::RecoveryNotObserved {
                target: SsrTarget::Bluetooth,
                reason: output.failure_reason(),
            });
        }
        info!("Bluetooth subsystem restart command sent");
        Ok(output.lines())
    }
}
