//! Node controller: applies selection diffs and verifies the result
//!
//! A switch walks `Idle → Requested → Applying → Verifying → Done`, or ends
//! in `Failed`. New nodes are activated before old ones are removed, so
//! a switch between two present nodes never leaves a direction without an
//! active node (a short dual-active window is accepted instead).

use crate::domain::audio::{AudioControl, Direction, NodeError, NodeType, Result};
use crate::domain::poll::{poll_until, CancelToken, PollConfig, PollError};
use crate::domain::selector::{compute_diff, NodeDiff, Selection, SelectionMode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

/// Phase of a switch operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwitchState {
    Idle,
    Requested,
    Applying,
    Verifying,
    Done,
    Failed,
}

impl SwitchState {
    pub fn can_transition_to(self, next: SwitchState) -> bool {
        use SwitchState::*;
        matches!(
            (self, next),
            (Idle, Requested)
                | (Requested, Applying)
                | (Applying, Verifying)
                | (Verifying, Done)
                | (Requested, Failed)
                | (Applying, Failed)
                | (Verifying, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SwitchState::Done | SwitchState::Failed)
    }
}

/// What a `select` call did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchReport {
    pub output: Option<NodeDiff>,
    pub input: Option<NodeDiff>,
    pub state: SwitchState,
}

/// Drives an [`AudioControl`] towards a requested selection
pub struct NodeController<'a, C: AudioControl + ?Sized> {
    control: &'a C,
    settle: PollConfig,
    cancel: CancelToken,
    state: SwitchState,
}

impl<'a, C: AudioControl + ?Sized> NodeController<'a, C> {
    pub fn new(control: &'a C, settle: PollConfig) -> Self {
        Self {
            control,
            settle,
            cancel: CancelToken::new(),
            state: SwitchState::Idle,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// State reached by the last operation
    pub fn state(&self) -> SwitchState {
        self.state
    }

    pub fn control(&self) -> &C {
        self.control
    }

    fn transition(&mut self, next: SwitchState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal switch transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!(from = ?self.state, to = ?next, "Switch state");
        self.state = next;
    }

    fn fail<T>(&mut self, error: NodeError) -> Result<T> {
        warn!(error = %error, "Switch failed");
        self.transition(SwitchState::Failed);
        Err(error)
    }

    /// Bring both directions to `selection` and verify by reading back
    #[instrument(skip(self))]
    pub fn select(&mut self, selection: &Selection) -> Result<SwitchReport> {
        self.state = SwitchState::Idle;
        self.transition(SwitchState::Requested);

        let snapshot = match self.control.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => return self.fail(e),
        };

        let mut diffs = Vec::new();
        for direction in [Direction::Output, Direction::Input] {
            if let Some(desired) = selection.for_direction(direction) {
                let diff = compute_diff(snapshot.nodes(), desired, direction);
                if let Err(e) = check_reachable(&diff, desired.len()) {
                    return self.fail(e);
                }
                diffs.push(diff);
            }
        }

        self.transition(SwitchState::Applying);
        for diff in &diffs {
            if let Err(e) = self.apply(diff) {
                return self.fail(e);
            }
        }

        self.transition(SwitchState::Verifying);
        if let Err(e) = self.verify(selection) {
            return self.fail(e);
        }
        self.transition(SwitchState::Done);

        let mut report = SwitchReport {
            output: None,
            input: None,
            state: self.state,
        };
        for diff in diffs {
            match diff.direction {
                Direction::Output => report.output = Some(diff),
                Direction::Input => report.input = Some(diff),
            }
        }
        Ok(report)
    }

    /// Issue the control calls for one diff
    ///
    /// Exclusive diffs map to a single "set active" call. Additive diffs add
    /// every new node before removing any old one.
    pub fn apply(&self, diff: &NodeDiff) -> Result<()> {
        if diff.is_empty() {
            debug!(direction = %diff.direction, "Selection already in place");
            return Ok(());
        }

        match diff.mode {
            SelectionMode::Exclusive => {
                if let Some(target) = diff.to_activate.iter().next() {
                    info!(direction = %diff.direction, id = %target, "Setting active node");
                    self.control.set_active_node(diff.direction, *target)?;
                }
            }
            SelectionMode::Additive => {
                for id in &diff.to_activate {
                    info!(direction = %diff.direction, id = %id, "Adding active node");
                    self.control.add_active_node(diff.direction, *id)?;
                }
                for id in &diff.to_deactivate {
                    info!(direction = %diff.direction, id = %id, "Removing active node");
                    self.control.remove_active_node(diff.direction, *id)?;
                }
            }
        }
        Ok(())
    }

    fn verify(&self, selection: &Selection) -> Result<()> {
        let outcome = poll_until(self.settle, &self.cancel, || {
            let snapshot = self.control.snapshot()?;
            let settled = [Direction::Output, Direction::Input].iter().all(|&direction| {
                selection
                    .for_direction(direction)
                    .map(|desired| compute_diff(snapshot.nodes(), desired, direction).is_empty())
                    .unwrap_or(true)
            });
            Ok::<_, NodeError>(settled.then_some(()))
        })?;

        match outcome {
            Ok(()) => Ok(()),
            Err(PollError::Timeout(after)) => Err(NodeError::Verification(format!(
                "active nodes did not match the selection within {:?}",
                after
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Exclusively select one output type
    pub fn select_output(&mut self, node_type: NodeType) -> Result<SwitchReport> {
        self.select(&Selection::new().output([node_type]))
    }

    /// Exclusively select one input type
    pub fn select_input(&mut self, node_type: NodeType) -> Result<SwitchReport> {
        self.select(&Selection::new().input([node_type]))
    }

    /// Move playback from `from` to `to` and confirm the active output type
    #[instrument(skip(self))]
    pub fn switch_output(&mut self, from: &NodeType, to: &NodeType) -> Result<()> {
        self.select_output(from.clone())?;
        self.select_output(to.clone())?;

        let current = self.control.snapshot()?.selected_output_type();
        if current.as_ref() != Some(to) {
            return Err(NodeError::Verification(format!(
                "device switch did not happen from {} to {} (active: {})",
                from,
                to,
                current.map(|t| t.to_string()).unwrap_or_else(|| "none".to_string())
            )));
        }

        info!(%from, %to, "Output switched");
        Ok(())
    }

    /// Set the node volume of every active output node
    pub fn set_selected_output_volume(&self, volume: u8) -> Result<()> {
        let (outputs, _) = self.control.snapshot()?.selected_node_ids();
        for id in outputs {
            self.control.set_output_node_volume(id, volume)?;
        }
        Ok(())
    }

    /// Set the system output volume
    pub fn set_system_volume(&self, volume: u8) -> Result<()> {
        self.control.set_output_volume(volume)
    }

    /// Set the active output volume and confirm it reads back
    #[instrument(skip(self))]
    pub fn change_volume(&self, volume: u8) -> Result<()> {
        self.set_selected_output_volume(volume)?;

        let outcome = poll_until(self.settle, &self.cancel, || {
            let current = self.control.snapshot()?.active_output_volume()?;
            Ok::<_, NodeError>((current == volume).then_some(()))
        })?;

        match outcome {
            Ok(()) => {
                info!(volume, "Current volume is set");
                Ok(())
            }
            Err(PollError::Timeout(_)) => {
                let current = self.control.snapshot()?.active_output_volume()?;
                Err(NodeError::Verification(format!(
                    "volume didn't change as expected: wanted {}, got {}",
                    volume, current
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Mute then restore full volume, checking each step
    pub fn mute_unmute(&self) -> Result<()> {
        self.change_volume(0)?;
        self.change_volume(100)
    }
}

/// Reject selections that could only end with no wanted node active
fn check_reachable(diff: &NodeDiff, desired: usize) -> Result<()> {
    if desired == 0 || diff.missing.is_empty() {
        return Ok(());
    }

    let missing: Vec<String> = diff.missing.iter().map(|t| t.to_string()).collect();
    if diff.mode == SelectionMode::Exclusive || diff.missing.len() == desired {
        return Err(NodeError::NotFound(format!(
            "no {} node of type {}",
            diff.direction,
            missing.join(", ")
        )));
    }

    warn!(
        direction = %diff.direction,
        missing = %missing.join(", "),
        "Some requested node types are not plugged"
    );
    Ok(())
}
