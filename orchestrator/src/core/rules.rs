//! Anomaly rule table used for bug classification.
//!
//! Rules are evaluated in table order against `(subgoal, action, before,
//! after)`. When the after-state carries an execution signal, only the signal
//! rules apply: the action never reached the device, so the surface rules have
//! nothing to judge.

use crate::core::modal::infer_modal;
use crate::core::predicate::canonical_label;
use crate::core::types::{
    ANY_MODAL, ActionKind, Bug, BugKind, ElementKind, GroundedAction, Severity, SignalKind,
    Strategy, Subgoal, UiElement, UiState,
};

/// Remediation strategy for a bug kind.
pub fn remediation(kind: BugKind) -> Strategy {
    match kind {
        BugKind::BlockingDialog | BugKind::Crash | BugKind::PermissionBlock => {
            Strategy::DismissAndRetry
        }
        BugKind::MissingExpectedScreen => Strategy::NavigateCorrection,
        BugKind::ToggleStateMismatch
        | BugKind::NetworkError
        | BugKind::UiFreeze
        | BugKind::ElementNotFound
        | BugKind::DeviceTimeout
        | BugKind::DeviceError
        | BugKind::UnmetCriteria => Strategy::RetryAction,
    }
}

pub fn bug(kind: BugKind, severity: Severity, description: impl Into<String>) -> Bug {
    Bug {
        kind,
        severity,
        description: description.into(),
        remediation: remediation(kind),
    }
}

/// Everything a rule may look at.
#[derive(Debug, Clone, Copy)]
pub struct RuleInput<'a> {
    pub subgoal: &'a Subgoal,
    pub action: &'a GroundedAction,
    pub before: &'a UiState,
    pub after: &'a UiState,
}

/// Which rules apply to a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleScope {
    /// Final action of a subgoal: every rule, including the expected-screen rule.
    Full,
    /// Intermediate action: the surface may legitimately be mid-route.
    Progress,
}

/// Strategy seam for bug classification.
///
/// Implementations must be pure: the same input yields the same bugs in the
/// same order.
pub trait BugClassifier {
    fn classify(&self, input: &RuleInput<'_>, scope: RuleScope) -> Vec<Bug>;
}

type RuleCheck = fn(&RuleInput<'_>) -> Option<String>;

#[derive(Debug)]
struct Rule {
    kind: BugKind,
    severity: Severity,
    full_only: bool,
    check: RuleCheck,
}

/// Ordered rule-based classifier.
#[derive(Debug)]
pub struct RuleTable {
    signal_rules: Vec<(SignalKind, BugKind, Severity)>,
    rules: Vec<Rule>,
}

const CRASH_INDICATORS: &[&str] = &[
    "has stopped",
    "keeps stopping",
    "not responding",
    "force close",
];
const PERMISSION_INDICATORS: &[&str] = &["allow", "deny", "permission", "access"];
const ERROR_INDICATORS: &[&str] = &["error", "failed", "cannot", "unable", "invalid"];
const NETWORK_INDICATORS: &[&str] = &[
    "no connection",
    "network error",
    "offline",
    "connection failed",
];

impl Default for RuleTable {
    fn default() -> Self {
        Self {
            signal_rules: vec![
                (
                    SignalKind::EntryUnmet,
                    BugKind::MissingExpectedScreen,
                    Severity::High,
                ),
                (
                    SignalKind::BlockedByModal,
                    BugKind::BlockingDialog,
                    Severity::High,
                ),
                (
                    SignalKind::NoTarget,
                    BugKind::ElementNotFound,
                    Severity::Medium,
                ),
                (
                    SignalKind::DeviceTimeout,
                    BugKind::DeviceTimeout,
                    Severity::Medium,
                ),
                (
                    SignalKind::DeviceError,
                    BugKind::DeviceError,
                    Severity::Medium,
                ),
            ],
            rules: vec![
                Rule {
                    kind: BugKind::Crash,
                    severity: Severity::High,
                    full_only: false,
                    check: crash_visible,
                },
                Rule {
                    kind: BugKind::PermissionBlock,
                    severity: Severity::Medium,
                    full_only: false,
                    check: permission_dialog,
                },
                Rule {
                    kind: BugKind::BlockingDialog,
                    severity: Severity::High,
                    full_only: false,
                    check: error_dialog,
                },
                Rule {
                    kind: BugKind::NetworkError,
                    severity: Severity::High,
                    full_only: false,
                    check: network_error,
                },
                Rule {
                    kind: BugKind::ToggleStateMismatch,
                    severity: Severity::Medium,
                    full_only: false,
                    check: toggle_mismatch,
                },
                Rule {
                    kind: BugKind::UiFreeze,
                    severity: Severity::Medium,
                    full_only: false,
                    check: ui_freeze,
                },
                Rule {
                    kind: BugKind::MissingExpectedScreen,
                    severity: Severity::High,
                    full_only: true,
                    check: expected_screen_absent,
                },
            ],
        }
    }
}

impl BugClassifier for RuleTable {
    fn classify(&self, input: &RuleInput<'_>, scope: RuleScope) -> Vec<Bug> {
        if let Some(signal) = &input.after.signal {
            return self
                .signal_rules
                .iter()
                .filter(|(kind, _, _)| *kind == signal.kind)
                .map(|(_, bug_kind, severity)| bug(*bug_kind, *severity, signal.detail.clone()))
                .collect();
        }
        self.rules
            .iter()
            .filter(|rule| scope == RuleScope::Full || !rule.full_only)
            .filter_map(|rule| (rule.check)(input).map(|text| bug(rule.kind, rule.severity, text)))
            .collect()
    }
}

fn label_has_any(element: &UiElement, needles: &[&str]) -> bool {
    let label = element.label.to_lowercase();
    needles.iter().any(|needle| label.contains(needle))
}

fn crash_visible(input: &RuleInput<'_>) -> Option<String> {
    if input.after.modal.contains("crash") {
        return Some(format!("application crashed ({})", input.after.modal));
    }
    input
        .after
        .elements
        .iter()
        .find(|element| label_has_any(element, CRASH_INDICATORS))
        .map(|element| format!("crash dialog: {}", element.label))
}

fn permission_dialog(input: &RuleInput<'_>) -> Option<String> {
    if input.after.modal.contains("permission") {
        return Some(format!("permission prompt ({})", input.after.modal));
    }
    input
        .after
        .dialogs()
        .find(|dialog| label_has_any(dialog, PERMISSION_INDICATORS))
        .map(|dialog| format!("permission prompt: {}", dialog.label))
}

/// Dialogs not explained as a crash or permission prompt, or a blocking modal.
fn error_dialog(input: &RuleInput<'_>) -> Option<String> {
    if input.subgoal.blocking_modals.contains(&input.after.modal)
        && !input.after.modal.contains("crash")
        && !input.after.modal.contains("permission")
    {
        return Some(format!("blocking modal {}", input.after.modal));
    }
    input
        .after
        .dialogs()
        .find(|dialog| {
            label_has_any(dialog, ERROR_INDICATORS)
                || !(label_has_any(dialog, CRASH_INDICATORS)
                    || label_has_any(dialog, PERMISSION_INDICATORS))
        })
        .map(|dialog| format!("blocking dialog: {}", dialog.label))
}

/// Network failure text that appeared during the action.
fn network_error(input: &RuleInput<'_>) -> Option<String> {
    input
        .after
        .elements
        .iter()
        .filter(|element| label_has_any(element, NETWORK_INDICATORS))
        .find(|element| {
            !input
                .before
                .elements
                .iter()
                .any(|prior| prior.label == element.label)
        })
        .map(|element| format!("network error: {}", element.label))
}

fn toggle_mismatch(input: &RuleInput<'_>) -> Option<String> {
    if input.action.kind != ActionKind::Toggle {
        return None;
    }
    let wanted = input.action.value.as_ref()?;
    let target = input.action.target.as_ref()?;
    let element = input.after.element(&target.id).or_else(|| {
        let key = canonical_label(&target.label);
        input
            .after
            .elements
            .iter()
            .find(|element| {
                element.kind == ElementKind::Switch && canonical_label(&element.label) == key
            })
    })?;
    match &element.value {
        Some(actual) if actual == wanted => None,
        Some(actual) => Some(format!(
            "{} is {actual}, expected {wanted}",
            element.label
        )),
        None => Some(format!("{} reports no value, expected {wanted}", element.label)),
    }
}

fn ui_freeze(input: &RuleInput<'_>) -> Option<String> {
    if input.action.kind.expects_change() && input.before.same_surface(input.after) {
        Some(format!(
            "surface unchanged after {:?} on {}",
            input.action.kind,
            input
                .action
                .target
                .as_ref()
                .map_or("screen", |target| target.label.as_str())
        ))
    } else {
        None
    }
}

fn expected_screen_absent(input: &RuleInput<'_>) -> Option<String> {
    let expected = &input.subgoal.target_modal;
    if expected == ANY_MODAL {
        return None;
    }
    let actual = infer_modal(input.after);
    (actual != *expected).then(|| format!("expected {expected}, found {actual}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ElementValue, SignalKind};
    use crate::test_support::{button, dialog, state, subgoal, switch, text, toggle_action};

    fn kinds(bugs: &[Bug]) -> Vec<BugKind> {
        bugs.iter().map(|bug| bug.kind).collect()
    }

    #[test]
    fn mapping_follows_remediation_table() {
        assert_eq!(
            remediation(BugKind::BlockingDialog),
            Strategy::DismissAndRetry
        );
        assert_eq!(
            remediation(BugKind::MissingExpectedScreen),
            Strategy::NavigateCorrection
        );
        assert_eq!(
            remediation(BugKind::ToggleStateMismatch),
            Strategy::RetryAction
        );
        assert_eq!(remediation(BugKind::DeviceTimeout), Strategy::RetryAction);
    }

    #[test]
    fn signal_suppresses_surface_rules() {
        let goal = subgoal("toggle", "wifi_settings");
        let before = state("home_screen", vec![dialog("err", "Error")]);
        let after = before.with_signal(SignalKind::DeviceTimeout, "step timed out");
        let action = GroundedAction::untargeted(ActionKind::NoOp);
        let bugs = RuleTable::default().classify(
            &RuleInput {
                subgoal: &goal,
                action: &action,
                before: &before,
                after: &after,
            },
            RuleScope::Full,
        );
        assert_eq!(kinds(&bugs), vec![BugKind::DeviceTimeout]);
    }

    #[test]
    fn toggle_mismatch_detected_when_switch_did_not_move() {
        let goal = subgoal("toggle", "wifi_settings");
        let wifi = switch("wifi", "Wi-Fi", ElementValue::On);
        let action = toggle_action(&wifi, ElementValue::Off);
        let before = state("wifi_settings", vec![wifi.clone()]);
        let after = before.clone();
        let bugs = RuleTable::default().classify(
            &RuleInput {
                subgoal: &goal,
                action: &action,
                before: &before,
                after: &after,
            },
            RuleScope::Full,
        );
        assert_eq!(kinds(&bugs), vec![BugKind::ToggleStateMismatch]);
    }

    #[test]
    fn error_dialog_is_blocking_and_crash_text_is_crash() {
        let goal = subgoal("toggle", "wifi_settings");
        let wifi = switch("wifi", "Wi-Fi", ElementValue::Off);
        let action = toggle_action(&wifi, ElementValue::Off);
        let before = state("wifi_settings", vec![wifi.clone()]);
        let error = state(
            "wifi_settings",
            vec![wifi.clone(), dialog("err", "Unable to change Wi-Fi"), button("ok", "OK")],
        );
        let crash = state(
            "wifi_settings",
            vec![wifi, dialog("crash", "Settings has stopped"), button("close", "Close app")],
        );
        let table = RuleTable::default();
        let error_bugs = table.classify(
            &RuleInput {
                subgoal: &goal,
                action: &action,
                before: &before,
                after: &error,
            },
            RuleScope::Full,
        );
        let crash_bugs = table.classify(
            &RuleInput {
                subgoal: &goal,
                action: &action,
                before: &before,
                after: &crash,
            },
            RuleScope::Full,
        );
        assert_eq!(kinds(&error_bugs), vec![BugKind::BlockingDialog]);
        assert_eq!(kinds(&crash_bugs), vec![BugKind::Crash]);
    }

    #[test]
    fn permission_prompt_is_medium_and_not_a_blocking_dialog() {
        let goal = subgoal("scan", "wifi_settings");
        let action = GroundedAction::untargeted(ActionKind::Scroll);
        let before = state("wifi_settings", Vec::new());
        let prompt = state(
            "wifi_settings",
            vec![
                dialog("perm", "Allow Settings to access this device's location?"),
                button("allow", "Allow"),
                button("deny", "Deny"),
            ],
        );
        let bugs = RuleTable::default().classify(
            &RuleInput {
                subgoal: &goal,
                action: &action,
                before: &before,
                after: &prompt,
            },
            RuleScope::Full,
        );
        assert_eq!(kinds(&bugs), vec![BugKind::PermissionBlock]);
        assert_eq!(bugs[0].severity, Severity::Medium);
        assert_eq!(bugs[0].remediation, Strategy::DismissAndRetry);
    }

    #[test]
    fn permission_modal_is_not_reported_twice() {
        let mut goal = subgoal("scan", ANY_MODAL);
        goal.blocking_modals.insert("permission_dialog".to_string());
        let action = GroundedAction::untargeted(ActionKind::Scroll);
        let before = state("wifi_settings", Vec::new());
        let after = state("permission_dialog", Vec::new());
        let bugs = RuleTable::default().classify(
            &RuleInput {
                subgoal: &goal,
                action: &action,
                before: &before,
                after: &after,
            },
            RuleScope::Full,
        );
        assert_eq!(kinds(&bugs), vec![BugKind::PermissionBlock]);
    }

    #[test]
    fn expected_screen_rule_only_in_full_scope() {
        let goal = subgoal("nav", "wifi_settings");
        let settings = button("settings", "Settings");
        let action = GroundedAction::on(ActionKind::Navigate, &settings);
        let before = state("home_screen", vec![settings]);
        let after = state("settings_app", vec![text("title", "Settings")]);
        let input = RuleInput {
            subgoal: &goal,
            action: &action,
            before: &before,
            after: &after,
        };
        let table = RuleTable::default();
        assert!(table.classify(&input, RuleScope::Progress).is_empty());
        assert_eq!(
            kinds(&table.classify(&input, RuleScope::Full)),
            vec![BugKind::MissingExpectedScreen]
        );
    }

    #[test]
    fn unchanged_surface_after_tap_is_a_freeze() {
        let goal = subgoal("nav", "any");
        let settings = button("settings", "Settings");
        let action = GroundedAction::on(ActionKind::Tap, &settings);
        let before = state("home_screen", vec![settings]);
        let bugs = RuleTable::default().classify(
            &RuleInput {
                subgoal: &goal,
                action: &action,
                before: &before,
                after: &before,
            },
            RuleScope::Full,
        );
        assert_eq!(kinds(&bugs), vec![BugKind::UiFreeze]);
    }

    #[test]
    fn network_text_only_counts_when_new() {
        let goal = subgoal("nav", "any");
        let action = GroundedAction::untargeted(ActionKind::Scroll);
        let offline = text("status", "Offline");
        let before = state("wifi_settings", vec![offline.clone()]);
        let after = state("wifi_settings", vec![offline]);
        let fresh_before = state("wifi_settings", Vec::new());
        let table = RuleTable::default();
        let stale = table.classify(
            &RuleInput {
                subgoal: &goal,
                action: &action,
                before: &before,
                after: &after,
            },
            RuleScope::Full,
        );
        let fresh = table.classify(
            &RuleInput {
                subgoal: &goal,
                action: &action,
                before: &fresh_before,
                after: &after,
            },
            RuleScope::Full,
        );
        assert!(stale.is_empty());
        assert_eq!(kinds(&fresh), vec![BugKind::NetworkError]);
    }
}
