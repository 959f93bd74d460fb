//! Element scoring for action grounding.
//!
//! Only interactable elements are candidates. A candidate scores
//! [`EXACT_MATCH`] for an exact (normalized) label match, [`SUBSTRING_MATCH`]
//! when the label contains the target, and gains [`KIND_BONUS`] when its kind
//! suits the action. Ties go to the element nearer the top, then the left.

use std::cmp::Reverse;

use crate::core::predicate::canonical_label;
use crate::core::types::{ActionKind, ElementKind, UiElement, UiState};

pub const EXACT_MATCH: u32 = 100;
pub const SUBSTRING_MATCH: u32 = 60;
pub const KIND_BONUS: u32 = 25;

/// Element kinds preferred for an action.
fn preferred_kinds(kind: ActionKind) -> &'static [ElementKind] {
    match kind {
        ActionKind::Toggle => &[ElementKind::Switch],
        ActionKind::Type => &[ElementKind::TextField],
        ActionKind::Dismiss => &[ElementKind::Button],
        ActionKind::Tap | ActionKind::Navigate => &[
            ElementKind::Button,
            ElementKind::ListItem,
            ElementKind::Icon,
        ],
        ActionKind::Scroll | ActionKind::Back | ActionKind::Verify | ActionKind::NoOp => &[],
    }
}

pub fn score(element: &UiElement, kind: ActionKind, target: &str) -> u32 {
    let target = canonical_label(target);
    let label = canonical_label(&element.label);
    let label_score = if target.is_empty() {
        0
    } else if label == target {
        EXACT_MATCH
    } else if label.contains(&target) {
        SUBSTRING_MATCH
    } else {
        0
    };
    let kind_score = if preferred_kinds(kind).contains(&element.kind) {
        KIND_BONUS
    } else {
        0
    };
    label_score + kind_score
}

/// Best interactable element for `(kind, target)` scoring strictly above
/// `min_score`. The threshold is dropped to zero for empty targets.
pub fn best_match<'a>(
    state: &'a UiState,
    kind: ActionKind,
    target: &str,
    min_score: u32,
) -> Option<&'a UiElement> {
    let threshold = if target.trim().is_empty() { 0 } else { min_score };
    state
        .elements
        .iter()
        .filter(|element| element.interactable)
        .map(|element| (element, score(element, kind, target)))
        .filter(|(_, score)| *score > threshold)
        .min_by_key(|(element, score)| (Reverse(*score), element.bounds.top, element.bounds.left))
        .map(|(element, _)| element)
}
