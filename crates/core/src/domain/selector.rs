//! Node selection diffing
//!
//! Turns "these node types should be active" into the concrete set of node
//! ids to activate and deactivate. Pure functions only; the controller
//! applies the result.

use crate::domain::audio::{Direction, Node, NodeId, NodeType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How a diff must be applied
///
/// A single requested type uses "set active" semantics, the way the Chrome
/// UI selects one node. Several requested types use add/remove so that more
/// than one node can stay active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionMode {
    Exclusive,
    Additive,
}

/// Operations needed to reach a selection in one direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDiff {
    pub direction: Direction,
    pub mode: SelectionMode,
    pub to_activate: BTreeSet<NodeId>,
    pub to_deactivate: BTreeSet<NodeId>,
    /// Requested types with no node present in this direction
    pub missing: BTreeSet<NodeType>,
}

impl NodeDiff {
    fn empty(direction: Direction, mode: SelectionMode) -> Self {
        Self {
            direction,
            mode,
            to_activate: BTreeSet::new(),
            to_deactivate: BTreeSet::new(),
            missing: BTreeSet::new(),
        }
    }

    /// No control call is needed
    pub fn is_empty(&self) -> bool {
        self.to_activate.is_empty() && self.to_deactivate.is_empty()
    }
}

/// Desired node types per direction
///
/// `None` leaves the direction untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub output: Option<BTreeSet<NodeType>>,
    pub input: Option<BTreeSet<NodeType>>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output<I: IntoIterator<Item = NodeType>>(mut self, types: I) -> Self {
        self.output = Some(types.into_iter().collect());
        self
    }

    pub fn input<I: IntoIterator<Item = NodeType>>(mut self, types: I) -> Self {
        self.input = Some(types.into_iter().collect());
        self
    }

    pub fn for_direction(&self, direction: Direction) -> Option<&BTreeSet<NodeType>> {
        match direction {
            Direction::Output => self.output.as_ref(),
            Direction::Input => self.input.as_ref(),
        }
    }
}

/// Compute the operations that bring `direction` to `desired`
///
/// - empty `desired`: nothing to do
/// - one type: the first node of that type becomes the only active node
/// - several types: every node of a desired type is added, every other
///   active node removed
///
/// Activations and deactivations are always disjoint, and a diff computed
/// against the state it produces is empty.
pub fn compute_diff(current: &[Node], desired: &BTreeSet<NodeType>, direction: Direction) -> NodeDiff {
    let in_direction: Vec<&Node> = current
        .iter()
        .filter(|n| n.direction() == direction)
        .collect();

    if desired.is_empty() {
        return NodeDiff::empty(direction, SelectionMode::Additive);
    }

    let mut missing: BTreeSet<NodeType> = desired
        .iter()
        .filter(|t| !in_direction.iter().any(|n| &n.node_type == *t))
        .cloned()
        .collect();

    if desired.len() == 1 {
        let mut diff = NodeDiff::empty(direction, SelectionMode::Exclusive);
        let wanted = desired.iter().next();
        let target = in_direction
            .iter()
            .find(|n| Some(&n.node_type) == wanted);

        if let Some(target) = target {
            let others: BTreeSet<NodeId> = in_direction
                .iter()
                .filter(|n| n.active && n.id != target.id)
                .map(|n| n.id)
                .collect();

            if !target.active || !others.is_empty() {
                diff.to_activate.insert(target.id);
                diff.to_deactivate = others;
            }
        }
        diff.missing = std::mem::take(&mut missing);
        return diff;
    }

    let mut diff = NodeDiff::empty(direction, SelectionMode::Additive);
    for node in &in_direction {
        let wanted = desired.contains(&node.node_type);
        if wanted && !node.active {
            diff.to_activate.insert(node.id);
        } else if !wanted && node.active {
            diff.to_deactivate.insert(node.id);
        }
    }
    diff.missing = missing;
    diff
}
