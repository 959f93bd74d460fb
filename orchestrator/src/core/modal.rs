//! Modal-state tracking.
//!
//! Devices normally report the current modal explicitly. When they report
//! `unknown` (or nothing), the modal is inferred from element labels. The
//! belief is a plain value: every observation returns a new belief.

use serde::{Deserialize, Serialize};

use crate::core::predicate::canonical_label;
use crate::core::types::{ElementKind, UiElement, UiState};

pub const UNKNOWN_MODAL: &str = "unknown";

/// Canonical labels that identify a screen, most specific screens first.
const MODAL_INDICATORS: &[(&str, &[&str])] = &[
    ("wifi_settings", &["wifipreferences", "savednetworks", "addnetwork"]),
    (
        "network_settings",
        &["networkinternet", "airplanemode", "mobilenetwork", "hotspottethering"],
    ),
    (
        "connected_devices",
        &["connecteddevices", "bluetooth", "pairnewdevice"],
    ),
    ("alarms_tab", &["addalarm", "nextalarm"]),
    ("clock_app", &["alarms", "timer", "stopwatch", "bedtime"]),
    ("email_results", &["searchresults", "noresults"]),
    ("email_search", &["searchmail", "recentsearches"]),
    ("email_app", &["inbox", "compose", "primary"]),
    ("settings_app", &["searchsettings", "display", "battery"]),
    ("home_screen", &["settings", "clock", "gmail", "phone"]),
];

/// Labels accepted as a dialog's dismiss control, in preference order.
pub const DISMISS_LABELS: &[&str] = &[
    "OK", "Dismiss", "Close", "Cancel", "Got it", "Allow", "Close app",
];

/// Current modal of `state`, inferred from its elements when not reported.
pub fn infer_modal(state: &UiState) -> String {
    let reported = state.modal.trim();
    if !reported.is_empty() && reported != UNKNOWN_MODAL {
        return reported.to_string();
    }
    let labels: Vec<String> = state
        .elements
        .iter()
        .map(|element| canonical_label(&element.label))
        .collect();
    let mut best: Option<(&str, usize)> = None;
    for (modal, indicators) in MODAL_INDICATORS {
        let hits = indicators
            .iter()
            .filter(|indicator| labels.iter().any(|label| label == *indicator))
            .count();
        if hits > 0 && best.is_none_or(|(_, top)| hits > top) {
            best = Some((modal, hits));
        }
    }
    best.map_or_else(|| UNKNOWN_MODAL.to_string(), |(modal, _)| modal.to_string())
}

/// First dialog element on screen, if any.
pub fn blocking_dialog(state: &UiState) -> Option<&UiElement> {
    state.dialogs().next()
}

/// Label of the control that dismisses the visible dialog.
///
/// Picks the first interactable button whose label is a known dismiss label,
/// falling back to `OK`.
pub fn dismiss_label(state: &UiState) -> String {
    for wanted in DISMISS_LABELS {
        let wanted_key = canonical_label(wanted);
        if let Some(button) = state.elements.iter().find(|element| {
            element.interactable
                && element.kind == ElementKind::Button
                && canonical_label(&element.label) == wanted_key
        }) {
            return button.label.clone();
        }
    }
    "OK".to_string()
}

/// Planner-side belief about the modal the application is in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModalBelief {
    pub current: Option<String>,
    /// Labels of dialogs covering the current modal.
    pub blocking: Vec<String>,
    pub transitions: u32,
}

impl ModalBelief {
    /// Fold one observation into the belief.
    pub fn observe(self, state: &UiState) -> ModalBelief {
        let modal = infer_modal(state);
        let transitions = match &self.current {
            Some(previous) if *previous != modal => self.transitions + 1,
            _ => self.transitions,
        };
        ModalBelief {
            current: Some(modal),
            blocking: state.dialogs().map(|dialog| dialog.label.clone()).collect(),
            transitions,
        }
    }

    pub fn current(&self) -> &str {
        self.current.as_deref().unwrap_or(UNKNOWN_MODAL)
    }
}
