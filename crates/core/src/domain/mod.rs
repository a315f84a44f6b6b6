//! Domain entities and business rules

pub mod audio;
pub mod config;
pub mod controller;
pub mod network;
pub mod poll;
pub mod selector;
pub mod sysinfo;
pub mod ui;

// Re-export specific items to avoid ambiguous glob imports
pub use audio::{
    checked_volume, node_type_is_plugged, AudioControl, Direction, Node, NodeError, NodeId,
    NodeRegistry, NodeSnapshot, NodeType,
};
pub use config::{
    AudioConfig, ConfigError, ConfigManager, DutConfig, NetworkConfig, PathConfig, TimingConfig,
};
pub use controller::{NodeController, SwitchReport, SwitchState};
pub use network::{NetworkDevices, NetworkError, SsrTarget, WifiSecurity};
pub use poll::{poll_until, settle, CancelToken, PollConfig, PollError};
pub use selector::{compute_diff, NodeDiff, Selection, SelectionMode};
pub use sysinfo::{CpuInfo, MountEntry, ProbeError, UsbDevice};
pub use ui::{
    KeyboardPlayback, MediaPlayer, NameMatcher, Shortcut, UiAutomation, UiElement, UiError,
    UiPacing, UiQuery,
};
