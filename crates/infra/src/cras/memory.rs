//! In-process Cras stand-in
//!
//! Keeps a node table and applies control calls with the server's
//! activation rules. Backs `--simulate` and the scenario tests.

use dutkit_core::domain::audio::{
    AudioControl, Direction, Node, NodeError, NodeId, NodeRegistry, NodeType, Result,
};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug)]
struct State {
    nodes: Vec<Node>,
    system_volume: u8,
    calls: Vec<String>,
}

#[derive(Debug)]
pub struct InMemoryCras {
    state: Mutex<State>,
}

impl InMemoryCras {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self {
            state: Mutex::new(State {
                nodes,
                system_volume: 100,
                calls: Vec::new(),
            }),
        }
    }

    /// A laptop with speaker, headphone jack, HDMI and two microphones
    pub fn laptop() -> Self {
        Self::new(vec![
            Node::new(NodeId::from_parts(1, 0), Direction::Output, NodeType::InternalSpeaker)
                .active()
                .with_volume(75)
                .with_name("Speaker"),
            Node::new(NodeId::from_parts(2, 0), Direction::Output, NodeType::Headphone)
                .with_volume(50)
                .with_name("Headphone"),
            Node::new(NodeId::from_parts(3, 0), Direction::Output, NodeType::Hdmi)
                .with_name("HDMI/DP,pcm=5"),
            Node::new(NodeId::from_parts(4, 0), Direction::Input, NodeType::InternalMic)
                .active()
                .with_name("Internal Mic"),
            Node::new(NodeId::from_parts(5, 0), Direction::Input, NodeType::Mic)
                .with_name("Mic"),
        ])
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| NodeError::Transport("in-memory server lock poisoned".to_string()))
    }

    /// Add a node as if a device had been plugged in
    pub fn plug(&self, node: Node) -> Result<()> {
        self.lock()?.nodes.push(node);
        Ok(())
    }

    /// Remove a node as if its device had been unplugged
    pub fn unplug(&self, id: NodeId) -> Result<()> {
        self.lock()?.nodes.retain(|n| n.id != id);
        Ok(())
    }

    pub fn system_volume(&self) -> Result<u8> {
        Ok(self.lock()?.system_volume)
    }

    /// Control calls received so far, e.g. `SetActiveOutputNode 4294967296`
    pub fn calls(&self) -> Result<Vec<String>> {
        Ok(self.lock()?.calls.clone())
    }

    fn with_node<F>(&self, call: String, direction: Direction, id: NodeId, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<Node>, usize),
    {
        let mut state = self.lock()?;
        debug!(call = %call, "In-memory Cras call");
        state.calls.push(call);
        let index = state
            .nodes
            .iter()
            .position(|n| n.id == id && n.direction() == direction)
            .ok_or_else(|| NodeError::NotFound(format!("{} node {}", direction, id)))?;
        apply(&mut state.nodes, index);
        Ok(())
    }
}

fn call_name(prefix: &str, direction: Direction, id: NodeId) -> String {
    let dir = match direction {
        Direction::Output => "Output",
        Direction::Input => "Input",
    };
    format!("{}{}Node {}", prefix, dir, id)
}

impl NodeRegistry for InMemoryCras {
    fn list_nodes(&self) -> Result<Vec<Node>> {
        Ok(self.lock()?.nodes.clone())
    }
}

impl AudioControl for InMemoryCras {
    fn set_active_node(&self, direction: Direction, id: NodeId) -> Result<()> {
        self.with_node(call_name("SetActive", direction, id), direction, id, |nodes, index| {
            for (i, node) in nodes.iter_mut().enumerate() {
                if node.direction() == direction {
                    node.active = i == index;
                }
            }
        })
    }

    fn add_active_node(&self, direction: Direction, id: NodeId) -> Result<()> {
        self.with_node(call_name("AddActive", direction, id), direction, id, |nodes, index| {
            nodes[index].active = true;
        })
    }

    fn remove_active_node(&self, direction: Direction, id: NodeId) -> Result<()> {
        self.with_node(call_name("RemoveActive", direction, id), direction, id, |nodes, index| {
            nodes[index].active = false;
        })
    }

    fn set_output_volume(&self, volume: u8) -> Result<()> {
        let mut state = self.lock()?;
        state.calls.push(format!("SetOutputVolume {}", volume));
        state.system_volume = volume.min(100);
        Ok(())
    }

    fn set_output_node_volume(&self, id: NodeId, volume: u8) -> Result<()> {
        self.with_node(
            format!("SetOutputNodeVolume {} {}", id, volume),
            Direction::Output,
            id,
            |nodes, index| nodes[index].volume = volume.min(100),
        )
    }
}
