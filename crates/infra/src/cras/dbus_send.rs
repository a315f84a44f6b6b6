//! Cras control through `dbus-send --print-reply`

use crate::shell::{command_line, CommandRunner, SystemRunner};
use dutkit_core::domain::audio::{
    AudioControl, Direction, Node, NodeError, NodeId, NodeRegistry, NodeType, Result,
};
use dutkit_core::domain::config::AudioConfig;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, trace, warn};

/// Cras client that shells out to `dbus-send` for every call
pub struct DbusSendCras<R: CommandRunner = SystemRunner> {
    runner: R,
    config: AudioConfig,
}

impl DbusSendCras<SystemRunner> {
    pub fn new(config: AudioConfig) -> Self {
        Self::with_runner(SystemRunner, config)
    }
}

impl<R: CommandRunner> DbusSendCras<R> {
    pub fn with_runner(runner: R, config: AudioConfig) -> Self {
        Self { runner, config }
    }

    /// Command line of a `GetNodes` query, for running the query elsewhere
    pub fn get_nodes_command(&self) -> String {
        let args = self.method_args("GetNodes", &[]);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        command_line(&self.config.dbus_send, &args)
    }

    fn method_args(&self, method: &str, params: &[String]) -> Vec<String> {
        let mut args = vec![
            "--system".to_string(),
            "--type=method_call".to_string(),
            "--print-reply".to_string(),
            format!("--dest={}", self.config.destination),
            self.config.object_path.clone(),
            format!("{}.{}", self.config.interface, method),
        ];
        args.extend(params.iter().cloned());
        args
    }

    /// Invoke one Control method and return the printed reply
    fn call(&self, method: &str, params: &[String]) -> Result<String> {
        let args = self.method_args(method, params);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        trace!(command = %command_line(&self.config.dbus_send, &args), "Calling Cras");
        let output = self
            .runner
            .run(&self.config.dbus_send, &args, None)
            .map_err(|e| NodeError::Transport(format!("{}: {}", self.config.dbus_send, e)))?;

        if !output.success {
            return Err(NodeError::Transport(format!(
                "{} failed: {}",
                method,
                output.failure_reason()
            )));
        }
        Ok(output.stdout)
    }

    fn call_with_node(&self, method: &str, id: NodeId) -> Result<()> {
        self.call(method, &[format!("uint64:{}", id.value())])?;
        Ok(())
    }
}

fn direction_method(prefix: &str, direction: Direction) -> String {
    match direction {
        Direction::Output => format!("{}OutputNode", prefix),
        Direction::Input => format!("{}InputNode", prefix),
    }
}

impl<R: CommandRunner> NodeRegistry for DbusSendCras<R> {
    #[instrument(skip(self))]
    fn list_nodes(&self) -> Result<Vec<Node>> {
        let reply = self.call("GetNodes", &[])?;
        let nodes = parse_get_nodes(&reply)?;
        debug!(count = nodes.len(), "Listed Cras nodes");
        Ok(nodes)
    }
}

impl<R: CommandRunner> AudioControl for DbusSendCras<R> {
    fn set_active_node(&self, direction: Direction, id: NodeId) -> Result<()> {
        info!(%direction, id = %id, "SetActive node");
        self.call_with_node(&direction_method("SetActive", direction), id)
    }

    fn add_active_node(&self, direction: Direction, id: NodeId) -> Result<()> {
        info!(%direction, id = %id, "AddActive node");
        self.call_with_node(&direction_method("AddActive", direction), id)
    }

    fn remove_active_node(&self, direction: Direction, id: NodeId) -> Result<()> {
        info!(%direction, id = %id, "RemoveActive node");
        self.call_with_node(&direction_method("RemoveActive", direction), id)
    }

    fn set_output_volume(&self, volume: u8) -> Result<()> {
        info!(volume, "SetOutputVolume");
        self.call("SetOutputVolume", &[format!("int32:{}", volume)])?;
        Ok(())
    }

    fn set_output_node_volume(&self, id: NodeId, volume: u8) -> Result<()> {
        info!(id = %id, volume, "SetOutputNodeVolume");
        self.call(
            "SetOutputNodeVolume",
            &[format!("uint64:{}", id.value()), format!("int32:{}", volume)],
        )?;
        Ok(())
    }
}

/// A `variant <type> <value>` line with string quotes removed
fn variant_value(line: &str) -> Option<String> {
    let rest = line.trim().strip_prefix("variant")?.trim_start();
    let (_, value) = rest.split_once(char::is_whitespace)?;
    let value = value.trim();
    Some(
        value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value)
            .to_string(),
    )
}

fn parse_bool(fields: &BTreeMap<String, String>, key: &str) -> Result<bool> {
    match fields.get(key).map(String::as_str) {
        Some("true") => Ok(true),
        Some("false") | None => Ok(false),
        Some(other) => Err(NodeError::Parse(format!("{} is not a boolean: {}", key, other))),
    }
}

fn node_from_fields(fields: &BTreeMap<String, String>) -> Result<Node> {
    let id = fields
        .get("Id")
        .ok_or_else(|| NodeError::Parse("node without Id".to_string()))?
        .parse::<u64>()
        .map_err(|e| NodeError::Parse(format!("bad node Id: {}", e)))?;

    let node_type = fields
        .get("Type")
        .map(|t| NodeType::from(t.clone()))
        .unwrap_or(NodeType::Unknown);
    let direction = Direction::from_is_input(parse_bool(fields, "IsInput")?);

    let mut node = Node::new(NodeId::new(id), direction, node_type);
    node.active = parse_bool(fields, "Active")?;
    if let Some(volume) = fields.get("NodeVolume") {
        let volume = volume
            .parse::<u64>()
            .map_err(|e| NodeError::Parse(format!("bad NodeVolume: {}", e)))?;
        node.volume = volume.min(100) as u8;
    }
    if let Some(name) = fields.get("Name").or_else(|| fields.get("DeviceName")) {
        node.name = name.clone();
    }
    Ok(node)
}

/// Parse the printed reply of `GetNodes`
///
/// Each top-level `array [` holds the `dict entry( string "Key" variant
/// <type> <value> )` lines of one node. Nested arrays are skipped.
pub fn parse_get_nodes(reply: &str) -> Result<Vec<Node>> {
    let mut nodes = Vec::new();
    let mut fields: BTreeMap<String, String> = BTreeMap::new();
    let mut depth = 0usize;
    let mut key: Option<String> = None;

    for line in reply.lines() {
        let trimmed = line.trim();
        // Also matches `variant array [` opening a nested value
        if trimmed.ends_with("array [") {
            depth += 1;
            if depth == 1 {
                fields.clear();
            } else {
                key = None;
            }
            continue;
        }
        if trimmed == "]" {
            if depth == 1 {
                nodes.push(node_from_fields(&fields)?);
            }
            depth = depth.saturating_sub(1);
            continue;
        }
        if depth != 1 {
            continue;
        }

        if let Some(name) = trimmed.strip_prefix("string \"") {
            key = name.strip_suffix('"').map(str::to_string);
        } else if trimmed.starts_with("variant") {
            match (key.take(), variant_value(trimmed)) {
                (Some(k), Some(v)) => {
                    fields.insert(k, v);
                }
                (k, _) => warn!(key = ?k, line = trimmed, "Unparsed node field"),
            }
        }
    }

    if depth != 0 {
        return Err(NodeError::Parse("unterminated node array".to_string()));
    }
    Ok(nodes)
}
