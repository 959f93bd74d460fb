//! Predicate evaluation over UI states.

use crate::core::modal::infer_modal;
use crate::core::types::{ElementKind, Predicate, UiState};

/// Normalize a label for comparison: lowercase alphanumerics only.
///
/// `Wi-Fi`, `wifi` and `WI_FI` all compare equal.
pub fn canonical_label(label: &str) -> String {
    label
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

pub fn holds(predicate: &Predicate, state: &UiState) -> bool {
    match predicate {
        Predicate::ModalIs { modal } => infer_modal(state) == *modal,
        Predicate::ElementPresent { label } => has_label(state, label),
        Predicate::ElementAbsent { label } => !has_label(state, label),
        Predicate::ElementValue { label, value } => {
            let wanted = canonical_label(label);
            state.elements.iter().any(|element| {
                canonical_label(&element.label) == wanted && element.value.as_ref() == Some(value)
            })
        }
        Predicate::NoDialog => {
            !state
                .elements
                .iter()
                .any(|element| element.kind == ElementKind::Dialog)
                && !state.modal.ends_with("_dialog")
        }
    }
}

/// Predicates from `predicates` that do not hold on `state`, in order.
pub fn unmet<'a>(predicates: &'a [Predicate], state: &UiState) -> Vec<&'a Predicate> {
    predicates
        .iter()
        .filter(|predicate| !holds(predicate, state))
        .collect()
}

fn has_label(state: &UiState, label: &str) -> bool {
    let wanted = canonical_label(label);
    state
        .elements
        .iter()
        .any(|element| canonical_label(&element.label) == wanted)
}
