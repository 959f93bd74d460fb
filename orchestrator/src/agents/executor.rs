//! Grounded action execution against the device surface.
//!
//! The Executor is the only agent with a side effect: at most one
//! `DeviceSurface::step` call per invocation, never retried here. Anything that
//! prevents a clean device reply becomes a synthetic after-state carrying an
//! [`ExecutionSignal`](crate::core::types::ExecutionSignal) for the Verifier.

use std::time::{Duration, Instant};

use tracing::{debug, instrument, warn};

use crate::core::grounding::best_match;
use crate::core::modal::{blocking_dialog, infer_modal};
use crate::core::predicate::unmet;
use crate::core::types::{
    ActionKind, ElementValue, GroundedAction, RequiredAction, SignalKind, Subgoal, UiState,
};
use crate::io::device::{DeviceError, DeviceSurface};

/// Default score an element must exceed to be grounded.
pub const DEFAULT_MIN_GROUNDING_SCORE: u32 = 50;

/// Result of executing one required action.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub action: GroundedAction,
    pub after: UiState,
    pub elapsed: Duration,
    /// Whether the device was called.
    pub dispatched: bool,
}

impl Execution {
    fn synthetic(action: GroundedAction, after: UiState) -> Self {
        Self {
            action,
            after,
            elapsed: Duration::ZERO,
            dispatched: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Executor {
    min_grounding_score: u32,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_GROUNDING_SCORE)
    }
}

impl Executor {
    pub fn new(min_grounding_score: u32) -> Self {
        Self {
            min_grounding_score,
        }
    }

    /// Ground and execute the action at `action_index` of `subgoal`.
    ///
    /// A covering dialog or blocking modal fails fast first, then entry
    /// conditions, which are only checked before the first action.
    #[instrument(skip_all, fields(subgoal = %subgoal.id, action_index = action_index))]
    pub fn execute<D: DeviceSurface + ?Sized>(
        &self,
        device: &mut D,
        subgoal: &Subgoal,
        action_index: usize,
        state: &UiState,
        timeout: Duration,
    ) -> Execution {
        let no_op = GroundedAction::untargeted(ActionKind::NoOp);
        let Some(required) = subgoal.required_actions.get(action_index) else {
            return Execution::synthetic(
                no_op,
                state.with_signal(
                    SignalKind::NoTarget,
                    format!("subgoal has no action at index {action_index}"),
                ),
            );
        };

        if !matches!(required.kind, ActionKind::Dismiss | ActionKind::Back)
            && let Some(detail) = blocked_by(subgoal, state)
        {
            debug!(%detail, "action blocked by modal");
            return Execution::synthetic(
                no_op,
                state.with_signal(SignalKind::BlockedByModal, detail),
            );
        }

        if action_index == 0 {
            let missing = unmet(&subgoal.entry_conditions, state);
            if !missing.is_empty() {
                debug!(?missing, "entry conditions unmet");
                return Execution::synthetic(
                    no_op,
                    state.with_signal(
                        SignalKind::EntryUnmet,
                        format!(
                            "entry conditions unmet on {}: {missing:?}",
                            infer_modal(state)
                        ),
                    ),
                );
            }
        }

        let action = match self.ground(required, state) {
            Grounding::Resolved(action) => action,
            Grounding::Local(action) => {
                return Execution::synthetic(action, state.clone());
            }
            Grounding::Missing(detail) => {
                debug!(%detail, "grounding failed");
                return Execution::synthetic(no_op, state.with_signal(SignalKind::NoTarget, detail));
            }
        };

        dispatch(device, action, state, timeout)
    }

    fn ground(&self, required: &RequiredAction, state: &UiState) -> Grounding {
        match required.kind {
            ActionKind::Verify | ActionKind::NoOp => {
                Grounding::Local(GroundedAction::untargeted(required.kind))
            }
            ActionKind::Back => Grounding::Resolved(GroundedAction::untargeted(ActionKind::Back)),
            ActionKind::Scroll => {
                let min_score = self.min_grounding_score;
                let action = best_match(state, required.kind, &required.target, min_score)
                    .filter(|_| !required.target.trim().is_empty())
                    .map_or_else(
                        || GroundedAction::untargeted(ActionKind::Scroll),
                        |element| GroundedAction::on(ActionKind::Scroll, element),
                    );
                Grounding::Resolved(action)
            }
            ActionKind::Tap
            | ActionKind::Navigate
            | ActionKind::Toggle
            | ActionKind::Type
            | ActionKind::Dismiss => {
                let Some(element) =
                    best_match(state, required.kind, &required.target, self.min_grounding_score)
                else {
                    return Grounding::Missing(format!(
                        "no interactable element matches {:?} {:?} on {}",
                        required.kind,
                        required.target,
                        infer_modal(state)
                    ));
                };
                let mut action = GroundedAction::on(required.kind, element);
                action.value = match required.kind {
                    ActionKind::Toggle => Some(required.value.clone().unwrap_or_else(|| {
                        element
                            .value
                            .as_ref()
                            .and_then(ElementValue::flipped)
                            .unwrap_or(ElementValue::On)
                    })),
                    ActionKind::Type => required.value.clone(),
                    _ => None,
                };
                Grounding::Resolved(action)
            }
        }
    }
}

enum Grounding {
    /// Dispatch to the device.
    Resolved(GroundedAction),
    /// Answered from the current state without touching the device.
    Local(GroundedAction),
    Missing(String),
}

/// Description of what blocks `subgoal` on `state`, if anything.
fn blocked_by(subgoal: &Subgoal, state: &UiState) -> Option<String> {
    let modal = infer_modal(state);
    if subgoal.blocking_modals.contains(&modal) {
        return Some(format!("blocking modal {modal}"));
    }
    blocking_dialog(state).map(|dialog| format!("dialog {:?} covers {modal}", dialog.label))
}

fn dispatch<D: DeviceSurface + ?Sized>(
    device: &mut D,
    action: GroundedAction,
    state: &UiState,
    timeout: Duration,
) -> Execution {
    let started = Instant::now();
    let result = device.step(&action, timeout);
    let elapsed = started.elapsed();
    let after = match result {
        Ok(_) if elapsed > timeout => {
            warn!(elapsed_ms = elapsed.as_millis() as u64, "device step exceeded timeout");
            state.with_signal(
                SignalKind::DeviceTimeout,
                format!(
                    "device replied after {} ms (limit {} ms)",
                    elapsed.as_millis(),
                    timeout.as_millis()
                ),
            )
        }
        Ok(after) => after.settled(),
        Err(err @ DeviceError::Timeout { .. }) => {
            warn!(err = %err, "device step timed out");
            state.with_signal(SignalKind::DeviceTimeout, err.to_string())
        }
        Err(err) => {
            warn!(err = %err, "device step failed");
            state.with_signal(SignalKind::DeviceError, err.to_string())
        }
    };
    Execution {
        action,
        after,
        elapsed,
        dispatched: true,
    }
}
