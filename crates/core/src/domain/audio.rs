//! Cras audio node abstractions and domain models
//!
//! This module defines the node model reported by the Cras audio server and
//! the platform-agnostic interfaces used to query and drive it. Transports
//! (the `dbus-send` tool, an in-memory server) live in the `infra` crate.

use crate::domain::poll::PollError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur while talking to the audio server
#[derive(Debug, Error)]
pub enum NodeError {
    /// The audio control interface is unreachable (not running on a DUT,
    /// tool missing, bus down)
    #[error("Audio control unavailable: {0}")]
    Transport(String),

    /// Requested node or value was not reported by the server
    #[error("Node not found: {0}")]
    NotFound(String),

    /// A type lookup matched zero or several nodes
    #[error("Can not find unique {direction} node of type {node_type} ({count} matches)")]
    Ambiguous {
        node_type: NodeType,
        direction: Direction,
        count: usize,
    },

    /// The device index encoded in a node id is zero
    #[error("Got invalid device id 0 from node {0}")]
    InvalidDeviceId(NodeId),

    /// Volume outside 0..=100
    #[error("Invalid volume: {0}")]
    InvalidVolume(u32),

    /// Read-back state does not match what was requested
    #[error("Verification failed: {0}")]
    Verification(String),

    /// Reply from the audio server could not be understood
    #[error("Parse error: {0}")]
    Parse(String),

    /// A bounded wait expired
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A wait was cancelled by the caller
    #[error("Operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, NodeError>;

impl From<PollError> for NodeError {
    fn from(e: PollError) -> Self {
        match e {
            PollError::Timeout(after) => NodeError::Timeout(after),
            PollError::Cancelled => NodeError::Cancelled,
        }
    }
}

/// Cras node identifier
///
/// The upper 32 bits carry the device index, the lower 32 bits the node
/// index within that device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn from_parts(device: u32, node: u32) -> Self {
        Self(((device as u64) << 32) | node as u64)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// Device index of this node, rejecting the reserved index 0
    pub fn device_index(&self) -> Result<u32> {
        match (self.0 >> 32) as u32 {
            0 => Err(NodeError::InvalidDeviceId(*self)),
            device => Ok(device),
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Node direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    pub fn is_input(&self) -> bool {
        matches!(self, Direction::Input)
    }

    pub fn from_is_input(is_input: bool) -> Self {
        if is_input {
            Direction::Input
        } else {
            Direction::Output
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => write!(f, "input"),
            Direction::Output => write!(f, "output"),
        }
    }
}

/// Hardware category reported in the `Type` field of a node
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeType {
    Headphone,
    InternalSpeaker,
    Hdmi,
    Usb,
    Bluetooth,
    Lineout,
    Unknown,
    AlsaLoopback,
    Mic,
    InternalMic,
    PostDspLoopback,
    PostMixLoopback,
    KeyboardMic,
    Hotword,
    FrontMic,
    RearMic,
    EchoReference,
    /// A type string not in the known Cras set
    Other(String),
}

impl NodeType {
    /// Types Cras may report for output nodes
    pub const OUTPUT_TYPES: [NodeType; 8] = [
        NodeType::Headphone,
        NodeType::InternalSpeaker,
        NodeType::Hdmi,
        NodeType::Usb,
        NodeType::Bluetooth,
        NodeType::Lineout,
        NodeType::Unknown,
        NodeType::AlsaLoopback,
    ];

    /// Types Cras may report for input nodes
    pub const INPUT_TYPES: [NodeType; 12] = [
        NodeType::Mic,
        NodeType::InternalMic,
        NodeType::Usb,
        NodeType::Bluetooth,
        NodeType::PostDspLoopback,
        NodeType::PostMixLoopback,
        NodeType::Unknown,
        NodeType::KeyboardMic,
        NodeType::Hotword,
        NodeType::FrontMic,
        NodeType::RearMic,
        NodeType::EchoReference,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            NodeType::Headphone => "HEADPHONE",
            NodeType::InternalSpeaker => "INTERNAL_SPEAKER",
            NodeType::Hdmi => "HDMI",
            NodeType::Usb => "USB",
            NodeType::Bluetooth => "BLUETOOTH",
            NodeType::Lineout => "LINEOUT",
            NodeType::Unknown => "UNKNOWN",
            NodeType::AlsaLoopback => "ALSA_LOOPBACK",
            NodeType::Mic => "MIC",
            NodeType::InternalMic => "INTERNAL_MIC",
            NodeType::PostDspLoopback => "POST_DSP_LOOPBACK",
            NodeType::PostMixLoopback => "POST_MIX_LOOPBACK",
            NodeType::KeyboardMic => "KEYBOARD_MIC",
            NodeType::Hotword => "HOTWORD",
            NodeType::FrontMic => "FRONT_MIC",
            NodeType::RearMic => "REAR_MIC",
            NodeType::EchoReference => "ECHO_REFERENCE",
            NodeType::Other(name) => name,
        }
    }

    /// Whether the type belongs to the known Cras set
    pub fn is_known(&self) -> bool {
        !matches!(self, NodeType::Other(_))
    }
}

impl FromStr for NodeType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "HEADPHONE" => NodeType::Headphone,
            "INTERNAL_SPEAKER" => NodeType::InternalSpeaker,
            "HDMI" => NodeType::Hdmi,
            "USB" => NodeType::Usb,
            "BLUETOOTH" => NodeType::Bluetooth,
            "LINEOUT" => NodeType::Lineout,
            "UNKNOWN" => NodeType::Unknown,
            "ALSA_LOOPBACK" => NodeType::AlsaLoopback,
            "MIC" => NodeType::Mic,
            "INTERNAL_MIC" => NodeType::InternalMic,
            "POST_DSP_LOOPBACK" => NodeType::PostDspLoopback,
            "POST_MIX_LOOPBACK" => NodeType::PostMixLoopback,
            "KEYBOARD_MIC" => NodeType::KeyboardMic,
            "HOTWORD" => NodeType::Hotword,
            "FRONT_MIC" => NodeType::FrontMic,
            "REAR_MIC" => NodeType::RearMic,
            "ECHO_REFERENCE" => NodeType::EchoReference,
            other => NodeType::Other(other.to_string()),
        })
    }
}

impl From<String> for NodeType {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(node_type) => node_type,
            Err(never) => match never {},
        }
    }
}

impl From<NodeType> for String {
    fn from(node_type: NodeType) -> Self {
        node_type.as_str().to_string()
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node as reported by one `GetNodes` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub is_input: bool,
    pub node_type: NodeType,
    pub active: bool,
    /// Node volume, 0..=100
    pub volume: u8,
    #[serde(default)]
    pub name: String,
}

impl Node {
    pub fn new(id: NodeId, direction: Direction, node_type: NodeType) -> Self {
        Self {
            id,
            is_input: direction.is_input(),
            node_type,
            active: false,
            volume: 100,
            name: String::new(),
        }
    }

    pub fn active(mut self) -> Self {
        self.active = true;
        self
    }

    pub fn with_volume(mut self, volume: u8) -> Self {
        self.volume = volume;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn direction(&self) -> Direction {
        Direction::from_is_input(self.is_input)
    }
}

/// Validate a 0..=100 volume
pub fn checked_volume(volume: u32) -> Result<u8> {
    if volume > 100 {
        return Err(NodeError::InvalidVolume(volume));
    }
    Ok(volume as u8)
}

/// Source of node listings
pub trait NodeRegistry: Send + Sync {
    /// List every node currently reported by the audio server
    fn list_nodes(&self) -> Result<Vec<Node>>;

    /// Take a snapshot for repeated queries against one listing
    fn snapshot(&self) -> Result<NodeSnapshot> {
        self.list_nodes().map(NodeSnapshot::new)
    }
}

/// Control calls of the audio server
///
/// Input and output variants of the Cras methods are folded into one call
/// with a `Direction` argument.
pub trait AudioControl: NodeRegistry {
    /// Make `id` the only active node of its direction
    fn set_active_node(&self, direction: Direction, id: NodeId) -> Result<()>;

    /// Add `id` to the active nodes of its direction
    fn add_active_node(&self, direction: Direction, id: NodeId) -> Result<()>;

    /// Remove `id` from the active nodes of its direction
    fn remove_active_node(&self, direction: Direction, id: NodeId) -> Result<()>;

    /// Set the system output volume (0..=100)
    fn set_output_volume(&self, volume: u8) -> Result<()>;

    /// Set the volume of one output node (0..=100)
    fn set_output_node_volume(&self, id: NodeId, volume: u8) -> Result<()>;
}

/// One `GetNodes` result with the derived queries the tests rely on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeSnapshot {
    nodes: Vec<Node>,
}

impl NodeSnapshot {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn into_nodes(self) -> Vec<Node> {
        self.nodes
    }

    pub fn in_direction(&self, direction: Direction) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(move |n| n.direction() == direction)
    }

    /// Ids of the active nodes as `(outputs, inputs)`
    ///
    /// Several nodes may be selected at once in either direction.
    pub fn selected_node_ids(&self) -> (Vec<NodeId>, Vec<NodeId>) {
        let mut outputs = Vec::new();
        let mut inputs = Vec::new();
        for node in self.nodes.iter().filter(|n| n.active) {
            if node.is_input {
                inputs.push(node.id);
            } else {
                outputs.push(node.id);
            }
        }
        (outputs, inputs)
    }

    /// Types of the nodes accepted by `filter`, as `(outputs, inputs)`
    pub fn filtered_node_types<F>(&self, filter: F) -> (Vec<NodeType>, Vec<NodeType>)
    where
        F: Fn(&Node) -> bool,
    {
        let mut outputs = Vec::new();
        let mut inputs = Vec::new();
        for node in self.nodes.iter().filter(|n| filter(n)) {
            if !node.node_type.is_known() {
                warn!(node_type = %node.node_type, "Node type is not a known Cras type");
            }
            if node.is_input {
                inputs.push(node.node_type.clone());
            } else {
                outputs.push(node.node_type.clone());
            }
        }
        (outputs, inputs)
    }

    /// Types of the active nodes
    pub fn selected_node_types(&self) -> (Vec<NodeType>, Vec<NodeType>) {
        self.filtered_node_types(|n| n.active)
    }

    /// Types of the plugged nodes
    ///
    /// Cras only reports plugged nodes. `UNKNOWN` nodes are left out since
    /// their number depends on redundant devices created on the card.
    pub fn plugged_node_types(&self) -> (Vec<NodeType>, Vec<NodeType>) {
        self.filtered_node_types(|n| n.node_type != NodeType::Unknown)
    }

    /// The unique node of `node_type` in `direction`
    pub fn node_id_of(&self, node_type: &NodeType, direction: Direction) -> Result<NodeId> {
        let found: Vec<NodeId> = self
            .in_direction(direction)
            .filter(|n| &n.node_type == node_type)
            .map(|n| n.id)
            .collect();

        match found.as_slice() {
            [id] => {
                debug!(%node_type, %direction, id = %id, "Resolved node id");
                Ok(*id)
            }
            _ => Err(NodeError::Ambiguous {
                node_type: node_type.clone(),
                direction,
                count: found.len(),
            }),
        }
    }

    /// Device index of the unique node of `node_type` in `direction`
    pub fn device_id_of(&self, node_type: &NodeType, direction: Direction) -> Result<u32> {
        self.node_id_of(node_type, direction)?.device_index()
    }

    /// Volume of the first active output node
    pub fn active_output_volume(&self) -> Result<u8> {
        self.in_direction(Direction::Output)
            .find(|n| n.active)
            .map(|n| n.volume)
            .ok_or_else(|| NodeError::NotFound("no active output node volume".to_string()))
    }

    /// Type of the first active output node
    pub fn selected_output_type(&self) -> Option<NodeType> {
        self.in_direction(Direction::Output)
            .find(|n| n.active)
            .map(|n| n.node_type.clone())
    }
}

/// Check raw `GetNodes` reply text for a plugged node of `node_type`
///
/// Used where only the `dbus-send` output is available, e.g. when the
/// command ran on the DUT and the text was collected elsewhere.
pub fn node_type_is_plugged(nodes_info: &str, node_type: &NodeType) -> bool {
    let pattern = format!(
        r#"string "Type"\s+variant\s+string "{}""#,
        regex::escape(node_type.as_str())
    );
    match Regex::new(&pattern) {
        Ok(re) => re.is_match(nodes_info),
        Err(e) => {
            warn!(error = %e, "Invalid node type pattern");
            false
        }
    }
}
