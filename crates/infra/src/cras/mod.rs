//! Cras audio server clients
//!
//! - `dbus_send`: the real server, driven through the `dbus-send` tool
//! - `memory`: an in-process server with the same activation semantics

pub mod dbus_send;
pub mod memory;

pub use dbus_send::{parse_get_nodes, DbusSendCras};
pub use memory::InMemoryCras;
