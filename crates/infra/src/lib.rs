//! Transports and probes that touch the device under test
//!
//! - `shell`: external command execution
//! - `cras`: Cras audio server clients (`dbus-send`, in-memory)
//! - `probe`: system information from `/proc`, `/sys` and tools
//! - `files`: file and artifact helpers
//! - `network`: Wi-Fi scripts and subsystem restarts

pub mod cras;
pub mod files;
pub mod network;
pub mod probe;
pub mod shell;

pub use cras::{DbusSendCras, InMemoryCras};
pub use probe::DutProbe;
pub use shell::{CommandOutput, CommandRunner, SystemRunner};
