//! In-memory device surface driven by a screen graph.
//!
//! A [`Scenario`] lists screens with their elements, tap transitions between
//! screens, back edges, and faults to inject at given device steps (or at a
//! seeded random rate). Switch values are linked by element id across screens,
//! so a quick-settings switch and its settings-page twin stay consistent.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::core::types::{
    ActionKind, Bounds, ElementKind, ElementValue, GroundedAction, UiElement, UiState,
};
use crate::io::device::{DeviceCapabilities, DeviceError, DeviceKind, DeviceSurface};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub start: String,
    pub screens: Vec<Screen>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
    #[serde(default)]
    pub faults: Vec<Fault>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub random_faults: Option<RandomFaults>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Screen {
    pub id: String,
    /// Screen reached by `back`. `None` keeps the current screen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub back: Option<String>,
    #[serde(default)]
    pub elements: Vec<UiElement>,
}

/// Tapping `element` on `from` moves to `to`, optionally adding elements there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: String,
    pub element: String,
    pub to: String,
    #[serde(default)]
    pub adds: Vec<UiElement>,
}

/// Fault fired on the `at_step`-th device step. Step `0` applies at reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    pub at_step: u32,
    pub effect: FaultEffect,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FaultEffect {
    /// Show a dialog over the current screen; the step's action is swallowed.
    Dialog {
        label: String,
        #[serde(default = "default_dialog_button")]
        button: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        modal: Option<String>,
    },
    /// Show a crash dialog; dismissing it returns to the start screen.
    Crash { app: String },
    /// Accept the action without any effect.
    Ignore,
    Timeout,
    Disconnect,
}

fn default_dialog_button() -> String {
    "OK".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomFaults {
    /// Probability in `[0, 1]` that a step fires a fault.
    pub rate: f64,
    #[serde(default)]
    pub seed: u64,
    pub effects: Vec<FaultEffect>,
}

#[derive(Debug, Clone)]
struct Overlay {
    modal: Option<String>,
    dialog: UiElement,
    button: UiElement,
    dismiss_to: Option<String>,
}

const OVERLAY_DIALOG_ID: &str = "fault_dialog";
const OVERLAY_BUTTON_ID: &str = "fault_dialog_button";

impl Overlay {
    fn from_effect(effect: &FaultEffect, start: &str) -> Option<Self> {
        let (label, button, modal, dismiss_to) = match effect {
            FaultEffect::Dialog {
                label,
                button,
                modal,
            } => (label.clone(), button.clone(), modal.clone(), None),
            FaultEffect::Crash { app } => (
                format!("{app} has stopped"),
                "Close app".to_string(),
                None,
                Some(start.to_string()),
            ),
            FaultEffect::Ignore | FaultEffect::Timeout | FaultEffect::Disconnect => return None,
        };
        Some(Self {
            modal,
            dialog: UiElement {
                id: OVERLAY_DIALOG_ID.to_string(),
                kind: ElementKind::Dialog,
                label,
                bounds: Bounds::new(80, 800, 1000, 1200),
                interactable: false,
                value: None,
            },
            button: UiElement {
                id: OVERLAY_BUTTON_ID.to_string(),
                kind: ElementKind::Button,
                label: button,
                bounds: Bounds::new(760, 1100, 960, 1180),
                interactable: true,
                value: None,
            },
            dismiss_to,
        })
    }
}

/// Bundled phone scenario: settings, clock and mail apps.
const PHONE_SCENARIO: &str = include_str!("../../scenarios/phone.toml");

impl Scenario {
    /// The bundled phone scenario used when no scenario file is given.
    pub fn phone() -> Result<Self> {
        let scenario: Scenario = toml::from_str(PHONE_SCENARIO).context("parse bundled scenario")?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Load a scenario from TOML, or JSON when the extension is `.json`.
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let scenario: Scenario = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?
        } else {
            toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?
        };
        scenario
            .validate()
            .with_context(|| format!("validate {}", path.display()))?;
        Ok(scenario)
    }

    pub fn validate(&self) -> Result<()> {
        let known = |id: &str| self.screens.iter().any(|screen| screen.id == id);
        if !known(&self.start) {
            bail!("start screen {:?} is not defined", self.start);
        }
        for screen in &self.screens {
            if let Some(back) = &screen.back
                && !known(back)
            {
                bail!("screen {:?} has unknown back target {back:?}", screen.id);
            }
        }
        for transition in &self.transitions {
            if !known(&transition.from) || !known(&transition.to) {
                bail!(
                    "transition {} -> {} references an unknown screen",
                    transition.from,
                    transition.to
                );
            }
        }
        if let Some(random) = &self.random_faults
            && !(0.0..=1.0).contains(&random.rate)
        {
            bail!("random_faults.rate must be within [0, 1]");
        }
        Ok(())
    }
}

/// Device surface backed by a [`Scenario`].
#[derive(Debug)]
pub struct SimulatedDevice {
    scenario: Scenario,
    screens: BTreeMap<String, Screen>,
    current: String,
    overlay: Option<Overlay>,
    steps: u32,
    seed: u64,
    rng: StdRng,
}

impl SimulatedDevice {
    pub fn new(scenario: Scenario) -> Result<Self> {
        scenario.validate()?;
        let seed = scenario
            .random_faults
            .as_ref()
            .map_or(0, |random| random.seed);
        let mut device = Self {
            current: scenario.start.clone(),
            screens: BTreeMap::new(),
            overlay: None,
            steps: 0,
            seed,
            rng: StdRng::seed_from_u64(seed),
            scenario,
        };
        device.restore();
        Ok(device)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        Self::new(Scenario::load(path)?)
    }

    /// Override the random fault seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Append faults to the scenario.
    pub fn with_faults(mut self, faults: impl IntoIterator<Item = Fault>) -> Self {
        self.scenario.faults.extend(faults);
        self.restore();
        self
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }

    fn restore(&mut self) {
        self.screens = self
            .scenario
            .screens
            .iter()
            .map(|screen| (screen.id.clone(), screen.clone()))
            .collect();
        self.current = self.scenario.start.clone();
        self.steps = 0;
        self.rng = StdRng::seed_from_u64(self.seed);
        self.overlay = self
            .scenario
            .faults
            .iter()
            .filter(|fault| fault.at_step == 0)
            .find_map(|fault| Overlay::from_effect(&fault.effect, &self.scenario.start));
    }

    fn observe(&self) -> UiState {
        let mut elements = self
            .screens
            .get(&self.current)
            .map(|screen| screen.elements.clone())
            .unwrap_or_default();
        let modal = match &self.overlay {
            Some(overlay) => {
                elements.push(overlay.dialog.clone());
                elements.push(overlay.button.clone());
                overlay.modal.clone().unwrap_or_else(|| self.current.clone())
            }
            None => self.current.clone(),
        };
        UiState::new(modal, elements)
    }

    fn scheduled_fault(&mut self) -> Option<FaultEffect> {
        if let Some(fault) = self
            .scenario
            .faults
            .iter()
            .find(|fault| fault.at_step == self.steps)
        {
            return Some(fault.effect.clone());
        }
        let random = self.scenario.random_faults.as_ref()?;
        if random.effects.is_empty() || !self.rng.gen_bool(random.rate) {
            return None;
        }
        let pick = self.rng.gen_range(0..random.effects.len());
        Some(random.effects[pick].clone())
    }

    fn set_linked_value(&mut self, element_id: &str, value: ElementValue) {
        for screen in self.screens.values_mut() {
            for element in &mut screen.elements {
                if element.id == element_id {
                    element.value = Some(value.clone());
                }
            }
        }
    }

    fn current_element(&self, id: &str) -> Option<&UiElement> {
        self.screens
            .get(&self.current)?
            .elements
            .iter()
            .find(|element| element.id == id)
    }

    fn apply(&mut self, action: &GroundedAction) {
        if let Some(overlay) = &self.overlay {
            let hits_button = action
                .target
                .as_ref()
                .is_some_and(|target| target.id == overlay.button.id);
            if hits_button || action.kind == ActionKind::Back {
                if let Some(to) = overlay.dismiss_to.clone() {
                    self.current = to;
                }
                self.overlay = None;
            }
            return;
        }

        match action.kind {
            ActionKind::Back => {
                if let Some(back) = self
                    .screens
                    .get(&self.current)
                    .and_then(|screen| screen.back.clone())
                {
                    self.current = back;
                }
            }
            ActionKind::Toggle | ActionKind::Type => {
                let Some(target) = &action.target else {
                    return;
                };
                let Some(element) = self.current_element(&target.id) else {
                    return;
                };
                let value = action
                    .value
                    .clone()
                    .or_else(|| element.value.as_ref().and_then(ElementValue::flipped));
                if let Some(value) = value {
                    let id = target.id.clone();
                    self.set_linked_value(&id, value);
                }
            }
            ActionKind::Tap | ActionKind::Navigate | ActionKind::Dismiss => {
                let Some(target) = &action.target else {
                    return;
                };
                let Some(element) = self.current_element(&target.id) else {
                    return;
                };
                if element.kind == ElementKind::Switch {
                    if let Some(value) = element.value.as_ref().and_then(ElementValue::flipped) {
                        let id = target.id.clone();
                        self.set_linked_value(&id, value);
                    }
                    return;
                }
                let Some(transition) = self
                    .scenario
                    .transitions
                    .iter()
                    .find(|t| t.from == self.current && t.element == target.id)
                    .cloned()
                else {
                    return;
                };
                if let Some(screen) = self.screens.get_mut(&transition.to) {
                    for added in transition.adds {
                        if !screen.elements.iter().any(|element| element.id == added.id) {
                            screen.elements.push(added);
                        }
                    }
                }
                self.current = transition.to;
            }
            ActionKind::Scroll | ActionKind::Verify | ActionKind::NoOp => {}
        }
    }
}

impl DeviceSurface for SimulatedDevice {
    fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities {
            kind: DeviceKind::Simulated,
            enforces_timeout: false,
        }
    }

    fn reset(&mut self) -> Result<UiState, DeviceError> {
        self.restore();
        Ok(self.observe())
    }

    #[instrument(skip_all, fields(step = self.steps + 1, kind = ?action.kind))]
    fn step(&mut self, action: &GroundedAction, timeout: Duration) -> Result<UiState, DeviceError> {
        self.steps += 1;
        if let Some(effect) = self.scheduled_fault() {
            debug!(?effect, "injecting fault");
            match effect {
                FaultEffect::Timeout => return Err(DeviceError::Timeout { after: timeout }),
                FaultEffect::Disconnect => {
                    return Err(DeviceError::Transport("simulated disconnect".to_string()));
                }
                FaultEffect::Ignore => return Ok(self.observe()),
                FaultEffect::Dialog { .. } | FaultEffect::Crash { .. } => {
                    self.overlay = Overlay::from_effect(&effect, &self.scenario.start);
                    return Ok(self.observe());
                }
            }
        }
        self.apply(action);
        Ok(self.observe())
    }
}
