//! Test-only helpers for building UI states, subgoals and scripted devices.

use std::collections::{BTreeSet, VecDeque};
use std::time::Duration;

use crate::core::types::{
    ActionKind, Bounds, Bug, ElementKind, ElementValue, GroundedAction, RequiredAction, Subgoal,
    TraceFrame, UiElement, UiState, VerificationRecord, Verdict,
};
use crate::io::device::{DeviceCapabilities, DeviceError, DeviceKind, DeviceSurface};
use crate::io::simulated::Scenario;

fn element(id: &str, kind: ElementKind, label: &str) -> UiElement {
    UiElement {
        id: id.to_string(),
        kind,
        label: label.to_string(),
        bounds: Bounds::new(0, 0, 200, 80),
        interactable: true,
        value: None,
    }
}

pub fn button(id: &str, label: &str) -> UiElement {
    element(id, ElementKind::Button, label)
}

pub fn icon(id: &str, label: &str) -> UiElement {
    element(id, ElementKind::Icon, label)
}

pub fn list_item(id: &str, label: &str) -> UiElement {
    element(id, ElementKind::ListItem, label)
}

pub fn switch(id: &str, label: &str, value: ElementValue) -> UiElement {
    UiElement {
        value: Some(value),
        ..element(id, ElementKind::Switch, label)
    }
}

/// Non-interactable text.
pub fn text(id: &str, label: &str) -> UiElement {
    UiElement {
        interactable: false,
        ..element(id, ElementKind::Text, label)
    }
}

/// Non-interactable dialog container.
pub fn dialog(id: &str, label: &str) -> UiElement {
    UiElement {
        interactable: false,
        ..element(id, ElementKind::Dialog, label)
    }
}

pub fn state(modal: &str, elements: Vec<UiElement>) -> UiState {
    UiState::new(modal, elements)
}

/// Home screen with a Settings icon and Wi-Fi on.
pub fn wifi_home_state() -> UiState {
    state(
        "home_screen",
        vec![
            icon("settings_icon", "Settings"),
            switch("wifi_quick", "Wi-Fi", ElementValue::On),
        ],
    )
}

/// Unguarded subgoal with no actions or criteria.
pub fn subgoal(id: &str, target_modal: &str) -> Subgoal {
    subgoal_with_actions(id, target_modal, Vec::new())
}

pub fn subgoal_with_actions(
    id: &str,
    target_modal: &str,
    actions: Vec<RequiredAction>,
) -> Subgoal {
    Subgoal {
        id: id.to_string(),
        description: format!("{id} description"),
        modal_context: target_modal.to_string(),
        target_modal: target_modal.to_string(),
        required_actions: actions,
        success_criteria: Vec::new(),
        entry_conditions: Vec::new(),
        blocking_modals: BTreeSet::new(),
        origin: None,
    }
}

pub fn toggle_action(target: &UiElement, value: ElementValue) -> GroundedAction {
    GroundedAction {
        value: Some(value),
        ..GroundedAction::on(ActionKind::Toggle, target)
    }
}

/// Trace frame for `subgoal_id` whose verdict follows from `bugs`.
pub fn frame(subgoal_id: &str, duration_ms: u64, bugs: Vec<Bug>) -> TraceFrame {
    let verdict = if bugs.is_empty() {
        Verdict::Pass
    } else {
        Verdict::Fail
    };
    let strategy = bugs.first().map(|bug| bug.remediation);
    TraceFrame {
        sequence: 0,
        subgoal_id: subgoal_id.to_string(),
        plan_revision: 0,
        action: GroundedAction::untargeted(ActionKind::NoOp),
        before: state("home_screen", Vec::new()),
        after: state("home_screen", Vec::new()),
        verification: VerificationRecord {
            verdict,
            confidence: 1.0,
            bugs,
            criteria_passed: 0,
            criteria_total: 0,
            strategy,
        },
        duration_ms,
        dispatched: true,
    }
}

/// The bundled phone scenario (settings, clock and mail apps).
pub fn phone_scenario() -> Scenario {
    Scenario::phone().expect("bundled phone scenario")
}

/// Device that replays predetermined step results and records every call.
#[derive(Debug)]
pub struct ScriptedDevice {
    reset_state: UiState,
    responses: VecDeque<Result<UiState, DeviceError>>,
    calls: Vec<GroundedAction>,
}

impl ScriptedDevice {
    pub fn new(responses: Vec<Result<UiState, DeviceError>>) -> Self {
        Self {
            reset_state: state("home_screen", Vec::new()),
            responses: responses.into(),
            calls: Vec::new(),
        }
    }

    pub fn with_reset(mut self, reset_state: UiState) -> Self {
        self.reset_state = reset_state;
        self
    }

    pub fn calls(&self) -> &[GroundedAction] {
        &self.calls
    }
}

impl DeviceSurface for ScriptedDevice {
    fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities {
            kind: DeviceKind::Scripted,
            enforces_timeout: true,
        }
    }

    fn reset(&mut self) -> Result<UiState, DeviceError> {
        Ok(self.reset_state.clone())
    }

    fn step(
        &mut self,
        action: &GroundedAction,
        _timeout: Duration,
    ) -> Result<UiState, DeviceError> {
        self.calls.push(action.clone());
        self.responses.pop_front().unwrap_or_else(|| {
            Err(DeviceError::Transport(
                "scripted device has no more responses".to_string(),
            ))
        })
    }
}
