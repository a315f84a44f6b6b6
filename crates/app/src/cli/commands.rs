//! Subcommand implementations
//!
//! Everything here blocks; `main` runs it on the blocking pool.

use anyhow::{bail, Context as _, Result};
use clap::{Subcommand, ValueEnum};
use dutkit_core::domain::audio::{checked_volume, AudioControl, Direction, NodeType};
use dutkit_core::domain::config::DutConfig;
use dutkit_core::domain::controller::NodeController;
use dutkit_core::domain::network::WifiSecurity;
use dutkit_core::domain::poll::{settle, CancelToken};
use dutkit_core::domain::selector::Selection;
use dutkit_infra::cras::{DbusSendCras, InMemoryCras};
use dutkit_infra::files;
use dutkit_infra::network::{SsrDriver, WifiScripts};
use dutkit_infra::probe::DutProbe;
use dutkit_infra::shell::SystemRunner;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Subcommand)]
pub enum Commands {
    /// List audio nodes reported by Cras
    Nodes {
        #[arg(long)]
        json: bool,
    },

    /// Select active node types (one type: exclusive, several: additive)
    Select {
        #[arg(long, num_args = 1..)]
        output: Vec<String>,

        #[arg(long, num_args = 1..)]
        input: Vec<String>,
    },

    /// Move output from one node type to another and verify
    Switch { from: String, to: String },

    /// Print the id of the unique node of a type
    NodeId {
        node_type: String,

        /// Look among input nodes
        #[arg(long)]
        input: bool,
    },

    /// Set the active output volume and verify it
    Volume {
        #[arg(value_parser = clap::value_parser!(u32).range(0..=100))]
        level: u32,
    },

    /// Mute then unmute the active output, verifying each step
    MuteCheck,

    /// Board, firmware, kernel, CPU and memory summary
    Info {
        #[arg(long)]
        json: bool,
    },

    /// List USB devices
    Usb,

    /// Newest screenshot in the downloads directory
    Screenshot {
        /// Smallest acceptable size in bytes
        #[arg(long, default_value_t = 1024)]
        min_size: u64,
    },

    /// Move the downloads directory contents into the results directory
    CollectDownloads {
        /// Destination instead of `<results_dir>/downloads`
        #[arg(long)]
        dest: Option<PathBuf>,
    },

    /// Wi-Fi helper script
    Wifi {
        #[command(subcommand)]
        action: WifiAction,
    },

    /// Force a firmware subsystem restart and wait for recovery
    Ssr {
        #[arg(value_enum)]
        target: SsrArg,
    },
}

#[derive(Subcommand)]
pub enum WifiAction {
    Connect {
        ssid: String,
        passphrase: String,
        /// none, wep, psk or 802_1x
        security: String,
    },
    Disconnect {
        ssid: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum SsrArg {
    Wlan,
    Bluetooth,
}

pub struct Context {
    pub config: DutConfig,
    pub simulate: bool,
    pub cancel: CancelToken,
}

impl Context {
    fn audio(&self) -> Box<dyn AudioControl> {
        if self.simulate {
            info!("Using simulated audio server");
            Box::new(InMemoryCras::laptop())
        } else {
            Box::new(DbusSendCras::new(self.config.audio.clone()))
        }
    }
}

fn node_type(name: &str) -> NodeType {
    NodeType::from(name.to_ascii_uppercase())
}

pub fn run(command: Commands, ctx: &Context) -> Result<()> {
    match command {
        Commands::Nodes { json } => list_nodes(ctx, json),
        Commands::Select { output, input } => select(ctx, output, input),
        Commands::Switch { from, to } => {
            let audio = ctx.audio();
            let mut controller = controller(ctx, audio.as_ref());
            controller.switch_output(&node_type(&from), &node_type(&to))?;
            println!("{} -> {}", node_type(&from), node_type(&to));
            Ok(())
        }
        Commands::NodeId { node_type: name, input } => {
            let direction = Direction::from_is_input(input);
            let snapshot = ctx.audio().snapshot()?;
            let id = snapshot.node_id_of(&node_type(&name), direction)?;
            println!("{} (device {})", id, id.device_index()?);
            Ok(())
        }
        Commands::Volume { level } => {
            let volume = checked_volume(level)?;
            let audio = ctx.audio();
            controller(ctx, audio.as_ref()).change_volume(volume)?;
            println!("volume {}", volume);
            Ok(())
        }
        Commands::MuteCheck => {
            let audio = ctx.audio();
            controller(ctx, audio.as_ref()).mute_unmute()?;
            println!("mute/unmute ok");
            Ok(())
        }
        Commands::Info { json } => info_summary(ctx, json),
        Commands::Usb => {
            let probe = DutProbe::new(&ctx.config.paths.sysroot);
            for device in probe.usb_devices()? {
                println!(
                    "{:03}:{:03} {}:{} {}",
                    device.bus, device.device, device.vendor_id, device.product_id, device.description
                );
            }
            Ok(())
        }
        Commands::Screenshot { min_size } => {
            let path = files::confirm_screenshot(&ctx.config.paths.downloads_dir, min_size)?;
            println!("{}", path.display());
            Ok(())
        }
        Commands::CollectDownloads { dest } => {
            let dest = dest.unwrap_or_else(|| ctx.config.paths.results_dir.join("downloads"));
            let moved = files::move_downloads_to(&ctx.config.paths.downloads_dir, &dest)?;
            println!("moved {} file(s) to {}", moved.len(), dest.display());
            Ok(())
        }
        Commands::Wifi { action } => wifi(ctx, action),
        Commands::Ssr { target } => ssr(ctx, target),
    }
}

fn controller<'a>(
    ctx: &Context,
    audio: &'a (dyn AudioControl + 'a),
) -> NodeController<'a, dyn AudioControl + 'a> {
    NodeController::new(audio, ctx.config.timing.settle()).with_cancel(ctx.cancel.clone())
}

fn list_nodes(ctx: &Context, json: bool) -> Result<()> {
    let nodes = ctx.audio().list_nodes()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&nodes)?);
        return Ok(());
    }

    for node in &nodes {
        println!(
            "{:>20}  {:<6}  {:<18}  {:<3}  {:>3}  {}",
            node.id.to_string(),
            node.direction().to_string(),
            node.node_type.to_string(),
            if node.active { "*" } else { "" },
            node.volume,
            node.name
        );
    }
    Ok(())
}

fn select(ctx: &Context, output: Vec<String>, input: Vec<String>) -> Result<()> {
    if output.is_empty() && input.is_empty() {
        bail!("nothing to select: pass --output and/or --input");
    }

    let mut selection = Selection::new();
    if !output.is_empty() {
        selection = selection.output(output.iter().map(|t| node_type(t)));
    }
    if !input.is_empty() {
        selection = selection.input(input.iter().map(|t| node_type(t)));
    }

    let audio = ctx.audio();
    let report = controller(ctx, audio.as_ref()).select(&selection)?;
    for diff in report.output.iter().chain(report.input.iter()) {
        println!(
            "{}: +{} -{}",
            diff.direction,
            diff.to_activate.len(),
            diff.to_deactivate.len()
        );
    }
    Ok(())
}

#[derive(Serialize, Default)]
struct Info {
    board: Option<String>,
    chromeos_version: Option<String>,
    platform: Option<String>,
    firmware: Option<String>,
    hardware_id: Option<String>,
    kernel: Option<String>,
    arch: Option<String>,
    root_device: Option<String>,
    cpus: Option<usize>,
    mem_total_kb: Option<u64>,
}

fn optional<T, E: std::fmt::Display>(what: &str, result: std::result::Result<T, E>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(what, error = %e, "Probe unavailable");
            None
        }
    }
}

fn info_summary(ctx: &Context, json: bool) -> Result<()> {
    let probe = DutProbe::new(&ctx.config.paths.sysroot);
    let info = Info {
        board: optional("board", probe.board()),
        chromeos_version: optional("version", probe.chromeos_version()),
        platform: optional("platform", probe.platform_name()),
        firmware: optional("firmware", probe.firmware_version()),
        hardware_id: optional("hwid", probe.hardware_id()),
        kernel: optional("kernel", probe.kernel_version()),
        arch: optional("arch", probe.kernel_arch()),
        root_device: optional("root device", probe.root_device()),
        cpus: optional("cpus", probe.count_cpus()),
        mem_total_kb: optional("memory", probe.mem_total_kb()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    let value = serde_json::to_value(&info)?;
    if let Some(fields) = value.as_object() {
        for (key, value) in fields {
            let shown = match value {
                serde_json::Value::Null => "-".to_string(),
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            println!("{:<18} {}", key, shown);
        }
    }
    Ok(())
}

fn wifi(ctx: &Context, action: WifiAction) -> Result<()> {
    let scripts = WifiScripts::new(&ctx.config.network.script_dir);
    match action {
        WifiAction::Connect {
            ssid,
            passphrase,
            security,
        } => {
            let security: WifiSecurity = security.parse()?;
            let outcome = scripts.connect(&ssid, &passphrase, security)?;
            settle(ctx.config.timing.network_settle(), &ctx.cancel)
                .context("waiting for the connection to settle")?;
            println!("{:?}", outcome);
        }
        WifiAction::Disconnect { ssid } => {
            scripts.disconnect(&ssid)?;
            println!("disconnected from {}", ssid);
        }
    }
    Ok(())
}

fn ssr(ctx: &Context, target: SsrArg) -> Result<()> {
    let driver = SsrDriver::new(
        SystemRunner,
        ctx.config.network.clone(),
        &ctx.config.paths.results_dir,
        ctx.config.timing.ssr(),
    )
    .with_cancel(ctx.cancel.clone());

    match target {
        SsrArg::Wlan => {
            let log = driver.wlan_ssr()?;
            println!("WLAN recovered, log at {}", log.display());
        }
        SsrArg::Bluetooth => {
            for line in driver.bluetooth_ssr()? {
                println!("{}", line);
            }
        }
    }
    Ok(())
}
