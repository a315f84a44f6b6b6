//! Scenario tests for node selection against the in-memory audio server
//!
//! These drive the controller end to end: selection, verification by
//! read-back, volume changes and the lookups built on one snapshot.

use dutkit_core::domain::audio::{
    Direction, Node, NodeError, NodeId, NodeRegistry, NodeType,
};
use dutkit_core::domain::controller::{NodeController, SwitchState};
use dutkit_core::domain::poll::{CancelToken, PollConfig};
use dutkit_core::domain::selector::{compute_diff, Selection, SelectionMode};
use dutkit_infra::cras::InMemoryCras;
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::time::Duration;

fn settle() -> PollConfig {
    PollConfig::new(Duration::from_millis(100), Duration::from_millis(5))
}

fn usb_output(device: u32) -> Node {
    Node::new(NodeId::from_parts(device, 0), Direction::Output, NodeType::Usb)
}

// ============================================================================
// SWITCHING
// ============================================================================

#[test]
fn test_output_round_trip() {
    let cras = InMemoryCras::laptop();
    let mut controller = NodeController::new(&cras, settle());

    for node_type in [
        NodeType::InternalSpeaker,
        NodeType::Headphone,
        NodeType::InternalSpeaker,
    ] {
        let report = controller.select_output(node_type.clone()).unwrap();
        assert_eq!(report.state, SwitchState::Done);
        assert_eq!(
            cras.snapshot().unwrap().selected_output_type(),
            Some(node_type)
        );
    }
    assert_eq!(controller.state(), SwitchState::Done);
}

#[test]
fn test_selecting_current_node_issues_no_calls() {
    let cras = InMemoryCras::laptop();
    let mut controller = NodeController::new(&cras, settle());

    let report = controller.select_output(NodeType::InternalSpeaker).unwrap();
    assert!(report.output.unwrap().is_empty());
    assert!(cras.calls().unwrap().is_empty());
}

#[test]
fn test_switch_output_leaves_input_alone() {
    let cras = InMemoryCras::laptop();
    let mut controller = NodeController::new(&cras, settle());

    controller
        .switch_output(&NodeType::InternalSpeaker, &NodeType::Hdmi)
        .unwrap();

    let (outputs, inputs) = cras.snapshot().unwrap().selected_node_types();
    assert_eq!(outputs, vec![NodeType::Hdmi]);
    assert_eq!(inputs, vec![NodeType::InternalMic]);
}

#[test]
fn test_additive_selection_adds_before_removing() {
    let cras = InMemoryCras::laptop();
    let mut controller = NodeController::new(&cras, settle());

    let selection = Selection::new().output([NodeType::Headphone, NodeType::Hdmi]);
    let report = controller.select(&selection).unwrap();
    assert_eq!(report.output.as_ref().unwrap().mode, SelectionMode::Additive);

    let calls = cras.calls().unwrap();
    let first_remove = calls
        .iter()
        .position(|c| c.starts_with("RemoveActive"))
        .unwrap();
    assert!(calls[..first_remove].iter().all(|c| c.starts_with("AddActive")));
    assert_eq!(first_remove, 2);

    let (outputs, _) = cras.snapshot().unwrap().selected_node_types();
    assert_eq!(outputs, vec![NodeType::Headphone, NodeType::Hdmi]);
}

#[test]
fn test_both_directions_in_one_selection() {
    let cras = InMemoryCras::laptop();
    let mut controller = NodeController::new(&cras, settle());

    let selection = Selection::new()
        .output([NodeType::Headphone])
        .input([NodeType::Mic]);
    controller.select(&selection).unwrap();

    let (outputs, inputs) = cras.snapshot().unwrap().selected_node_types();
    assert_eq!(outputs, vec![NodeType::Headphone]);
    assert_eq!(inputs, vec![NodeType::Mic]);
}

#[test]
fn test_empty_selection_leaves_direction_untouched() {
    let cras = InMemoryCras::laptop();
    let mut controller = NodeController::new(&cras, settle());

    let report = controller
        .select(&Selection::new().output(Vec::<NodeType>::new()))
        .unwrap();
    assert!(report.output.unwrap().is_empty());
    assert!(cras.calls().unwrap().is_empty());

    let (outputs, inputs) = cras.snapshot().unwrap().selected_node_types();
    assert_eq!(outputs, vec![NodeType::InternalSpeaker]);
    assert_eq!(inputs, vec![NodeType::InternalMic]);
}

#[test]
fn test_unplugged_type_fails_before_any_call() {
    let cras = InMemoryCras::laptop();
    let mut controller = NodeController::new(&cras, settle());

    let err = controller.select_output(NodeType::Bluetooth).unwrap_err();
    assert!(matches!(err, NodeError::NotFound(_)));
    assert_eq!(controller.state(), SwitchState::Failed);
    assert!(cras.calls().unwrap().is_empty());
}

#[test]
fn test_unplug_during_session() {
    let cras = InMemoryCras::laptop();
    let mut controller = NodeController::new(&cras, settle());
    controller.select_output(NodeType::Headphone).unwrap();

    cras.unplug(NodeId::from_parts(2, 0)).unwrap();
    assert!(controller.select_output(NodeType::Headphone).is_err());
    controller.select_output(NodeType::InternalSpeaker).unwrap();
}

#[test]
fn test_cancelled_verification() {
    let cras = InMemoryCras::laptop();
    let cancel = CancelToken::new();
    cancel.cancel();
    let mut controller = NodeController::new(&cras, settle()).with_cancel(cancel);

    let err = controller.select_output(NodeType::Headphone).unwrap_err();
    assert!(matches!(err, NodeError::Cancelled));
}

// ============================================================================
// LOOKUPS
// ============================================================================

#[test]
fn test_node_id_requires_exactly_one_match() {
    let cras = InMemoryCras::laptop();

    match cras.snapshot().unwrap().node_id_of(&NodeType::Usb, Direction::Output) {
        Err(NodeError::Ambiguous { count, .. }) => assert_eq!(count, 0),
        other => panic!("expected Ambiguous, got {:?}", other),
    }

    cras.plug(usb_output(6)).unwrap();
    let id = cras
        .snapshot()
        .unwrap()
        .node_id_of(&NodeType::Usb, Direction::Output)
        .unwrap();
    assert_eq!(id.device_index().unwrap(), 6);

    cras.plug(usb_output(7)).unwrap();
    match cras.snapshot().unwrap().node_id_of(&NodeType::Usb, Direction::Output) {
        Err(NodeError::Ambiguous { count, .. }) => assert_eq!(count, 2),
        other => panic!("expected Ambiguous, got {:?}", other),
    }
}

#[test]
fn test_plugged_types_exclude_unknown() {
    let cras = InMemoryCras::laptop();
    cras.plug(Node::new(
        NodeId::from_parts(9, 0),
        Direction::Output,
        NodeType::Unknown,
    ))
    .unwrap();

    let (outputs, inputs) = cras.snapshot().unwrap().plugged_node_types();
    assert_eq!(outputs.len(), 3);
    assert!(!outputs.contains(&NodeType::Unknown));
    assert_eq!(inputs.len(), 2);
}

// ============================================================================
// VOLUME
// ============================================================================

#[test]
fn test_volume_boundaries_read_back() {
    let cras = InMemoryCras::laptop();
    let controller = NodeController::new(&cras, settle());

    controller.change_volume(0).unwrap();
    assert_eq!(cras.snapshot().unwrap().active_output_volume().unwrap(), 0);

    controller.change_volume(100).unwrap();
    assert_eq!(cras.snapshot().unwrap().active_output_volume().unwrap(), 100);
}

#[test]
fn test_mute_unmute_and_system_volume() {
    let cras = InMemoryCras::laptop();
    let controller = NodeController::new(&cras, settle());

    controller.mute_unmute().unwrap();
    controller.set_system_volume(40).unwrap();
    assert_eq!(cras.system_volume().unwrap(), 40);
}

// ============================================================================
// PROPERTIES
// ============================================================================

fn arb_node_type() -> impl Strategy<Value = NodeType> {
    prop::sample::select(vec![
        NodeType::Headphone,
        NodeType::InternalSpeaker,
        NodeType::Hdmi,
        NodeType::Usb,
        NodeType::InternalMic,
        NodeType::Mic,
    ])
}

fn arb_server() -> impl Strategy<Value = Vec<Node>> {
    prop::collection::vec((any::<bool>(), arb_node_type(), any::<bool>()), 1..8).prop_map(
        |specs| {
            specs
                .into_iter()
                .enumerate()
                .map(|(i, (is_input, node_type, active))| {
                    let node = Node::new(
                        NodeId::from_parts(i as u32 + 1, 0),
                        Direction::from_is_input(is_input),
                        node_type,
                    );
                    if active {
                        node.active()
                    } else {
                        node
                    }
                })
                .collect()
        },
    )
}

proptest! {
    #[test]
    fn prop_applied_diff_is_idempotent(
        nodes in arb_server(),
        desired in prop::collection::btree_set(arb_node_type(), 0..4),
        is_input in any::<bool>(),
    ) {
        let direction = Direction::from_is_input(is_input);
        let cras = InMemoryCras::new(nodes);
        let controller = NodeController::new(&cras, settle());

        let diff = compute_diff(&cras.list_nodes().unwrap(), &desired, direction);
        controller.apply(&diff).unwrap();

        let again = compute_diff(&cras.list_nodes().unwrap(), &desired, direction);
        prop_assert!(again.is_empty(), "second diff not empty: {:?}", again);
    }

    #[test]
    fn prop_other_direction_untouched(
        nodes in arb_server(),
        desired in prop::collection::btree_set(arb_node_type(), 1..3),
        is_input in any::<bool>(),
    ) {
        let direction = Direction::from_is_input(is_input);
        let cras = InMemoryCras::new(nodes);
        let active_before: BTreeSet<NodeId> = cras
            .list_nodes()
            .unwrap()
            .iter()
            .filter(|n| n.direction() != direction && n.active)
            .map(|n| n.id)
            .collect();

        let diff = compute_diff(&cras.list_nodes().unwrap(), &desired, direction);
        NodeController::new(&cras, settle()).apply(&diff).unwrap();

        let active_after: BTreeSet<NodeId> = cras
            .list_nodes()
            .unwrap()
            .iter()
            .filter(|n| n.direction() != direction && n.active)
            .map(|n| n.id)
            .collect();
        prop_assert_eq!(active_before, active_after);
    }
}
