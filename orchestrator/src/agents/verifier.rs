//! Outcome validation, bug classification and replanning triggers.
//!
//! The Verifier is pure: the same `(subgoal, action, before, after)` always
//! produces the same result.

use tracing::{debug, instrument};

use crate::core::predicate::unmet;
use crate::core::rules::{BugClassifier, RuleInput, RuleScope, RuleTable, bug};
use crate::core::types::{
    Bug, BugKind, GroundedAction, ReplanningRequest, Severity, Subgoal, UiState,
    VerificationResult, Verdict,
};

const CRITERIA_WEIGHT: f64 = 0.7;
const BUG_WEIGHT: f64 = 0.3;
/// Ceiling applied to confidence whenever a high-severity bug is present.
const HIGH_SEVERITY_CAP: f64 = 0.1;

#[derive(Debug, Clone, Default)]
pub struct Verifier<C = RuleTable> {
    classifier: C,
}

impl<C: BugClassifier> Verifier<C> {
    pub fn new(classifier: C) -> Self {
        Self { classifier }
    }

    /// Full check after the last action of a subgoal.
    ///
    /// `subgoal_index` is the plan position the replanning request points at.
    #[instrument(skip_all, fields(subgoal = %subgoal.id, subgoal_index = subgoal_index))]
    pub fn verify(
        &self,
        subgoal: &Subgoal,
        subgoal_index: usize,
        action: &GroundedAction,
        before: &UiState,
        after: &UiState,
    ) -> VerificationResult {
        let input = RuleInput {
            subgoal,
            action,
            before,
            after,
        };
        let mut bugs = self.classifier.classify(&input, RuleScope::Full);
        let criteria_total = subgoal.success_criteria.len();
        let missing = unmet(&subgoal.success_criteria, after);
        let criteria_passed = criteria_total - missing.len();
        if bugs.is_empty() && !missing.is_empty() {
            bugs.push(bug(
                BugKind::UnmetCriteria,
                Severity::Low,
                format!("unmet success criteria: {missing:?}"),
            ));
        }
        let result = conclude(bugs, criteria_passed, criteria_total, subgoal_index);
        debug!(
            verdict = ?result.verdict,
            confidence = result.confidence,
            bugs = result.bugs.len(),
            "verified"
        );
        result
    }

    /// Anomaly-only check after an intermediate action of a multi-action
    /// subgoal. Success criteria and the expected-screen rule are skipped.
    pub fn check_progress(
        &self,
        subgoal: &Subgoal,
        subgoal_index: usize,
        action: &GroundedAction,
        before: &UiState,
        after: &UiState,
    ) -> VerificationResult {
        let input = RuleInput {
            subgoal,
            action,
            before,
            after,
        };
        let bugs = self.classifier.classify(&input, RuleScope::Progress);
        conclude(bugs, 0, 0, subgoal_index)
    }
}

fn conclude(
    bugs: Vec<Bug>,
    criteria_passed: usize,
    criteria_total: usize,
    subgoal_index: usize,
) -> VerificationResult {
    let verdict = if bugs.is_empty() {
        Verdict::Pass
    } else {
        Verdict::Fail
    };
    let confidence = confidence(&bugs, criteria_passed, criteria_total);
    let replanning = primary_bug(&bugs).map(|primary| ReplanningRequest {
        strategy: primary.remediation,
        subgoal_index,
        trigger: primary.kind,
    });
    VerificationResult {
        verdict,
        confidence,
        bugs,
        criteria_passed,
        criteria_total,
        replanning,
    }
}

/// Highest-severity bug; earlier (rule order) wins ties.
fn primary_bug(bugs: &[Bug]) -> Option<&Bug> {
    bugs.iter().fold(None, |best: Option<&Bug>, candidate| match best {
        Some(current) if current.severity >= candidate.severity => Some(current),
        _ => Some(candidate),
    })
}

fn confidence(bugs: &[Bug], criteria_passed: usize, criteria_total: usize) -> f64 {
    let criteria_ratio = if criteria_total == 0 {
        1.0
    } else {
        criteria_passed as f64 / criteria_total as f64
    };
    let worst = bugs.iter().map(|bug| bug.severity).max();
    let bug_factor = match worst {
        None => 1.0,
        Some(Severity::Low) => 0.8,
        Some(Severity::Medium) => 0.5,
        Some(Severity::High) => 0.0,
    };
    let score = CRITERIA_WEIGHT * criteria_ratio + BUG_WEIGHT * bug_factor;
    if worst == Some(Severity::High) {
        score.min(HIGH_SEVERITY_CAP)
    } else {
        score
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{
        ActionKind, ElementValue, Predicate, RequiredAction, SignalKind, Strategy,
    };
    use crate::test_support::{
        button, dialog, state, subgoal_with_actions, switch, toggle_action,
    };

    fn toggle_off_subgoal() -> Subgoal {
        let mut subgoal = subgoal_with_actions(
            "toggle-wifi-off",
            "wifi_settings",
            vec![RequiredAction::new(ActionKind::Toggle, "Wi-Fi").with_value(ElementValue::Off)],
        );
        subgoal.success_criteria = vec![
            Predicate::ElementValue {
                label: "Wi-Fi".to_string(),
                value: ElementValue::Off,
            },
            Predicate::NoDialog,
        ];
        subgoal
    }

    #[test]
    fn toggle_passes_only_when_switch_is_off() {
        let subgoal = toggle_off_subgoal();
        let on = switch("wifi", "Wi-Fi", ElementValue::On);
        let action = toggle_action(&on, ElementValue::Off);
        let before = state("wifi_settings", vec![on]);
        let off_after = state("wifi_settings", vec![switch("wifi", "Wi-Fi", ElementValue::Off)]);
        let verifier = Verifier::<RuleTable>::default();

        let pass = verifier.verify(&subgoal, 1, &action, &before, &off_after);
        assert_eq!(pass.verdict, Verdict::Pass);
        assert!(pass.replanning.is_none());
        assert!((pass.confidence - 1.0).abs() < 1e-9);

        let fail = verifier.verify(&subgoal, 1, &action, &before, &before);
        assert_eq!(fail.verdict, Verdict::Fail);
        let request = fail.replanning.expect("request");
        assert_eq!(request.trigger, BugKind::ToggleStateMismatch);
        assert_eq!(request.strategy, Strategy::RetryAction);
        assert_eq!(request.subgoal_index, 1);
    }

    #[test]
    fn error_dialog_fails_with_dismiss_and_retry() {
        let subgoal = toggle_off_subgoal();
        let on = switch("wifi", "Wi-Fi", ElementValue::On);
        let action = toggle_action(&on, ElementValue::Off);
        let before = state("wifi_settings", vec![on.clone()]);
        let after = state(
            "wifi_settings",
            vec![on, dialog("error_dialog", "Unable to turn off Wi-Fi"), button("ok", "OK")],
        );
        let result = Verifier::<RuleTable>::default().verify(&subgoal, 1, &action, &before, &after);
        assert_eq!(result.verdict, Verdict::Fail);
        assert!(result.bugs.iter().any(|bug| bug.kind == BugKind::BlockingDialog));
        let request = result.replanning.expect("request");
        assert_eq!(request.trigger, BugKind::BlockingDialog);
        assert_eq!(request.strategy, Strategy::DismissAndRetry);
        assert!(result.confidence <= HIGH_SEVERITY_CAP);
    }

    #[test]
    fn unmet_criteria_alone_is_low_severity() {
        let mut subgoal = subgoal_with_actions(
            "check",
            "any",
            vec![RequiredAction::new(ActionKind::Verify, "")],
        );
        subgoal.success_criteria = vec![
            Predicate::ElementPresent {
                label: "Search results".to_string(),
            },
            Predicate::NoDialog,
        ];
        let action = GroundedAction::untargeted(ActionKind::Verify);
        let ui = state("email_results", Vec::new());
        let result = Verifier::<RuleTable>::default().verify(&subgoal, 0, &action, &ui, &ui);
        assert_eq!(result.verdict, Verdict::Fail);
        assert_eq!(result.bugs.len(), 1);
        assert_eq!(result.bugs[0].kind, BugKind::UnmetCriteria);
        assert_eq!(result.bugs[0].severity, Severity::Low);
        assert_eq!(result.criteria_passed, 1);
        // 0.7 * 0.5 + 0.3 * 0.8
        assert!((result.confidence - 0.59).abs() < 1e-9);
    }

    #[test]
    fn verify_is_idempotent() {
        let subgoal = toggle_off_subgoal();
        let on = switch("wifi", "Wi-Fi", ElementValue::On);
        let action = toggle_action(&on, ElementValue::Off);
        let before = state("wifi_settings", vec![on]);
        let after = before.with_signal(SignalKind::DeviceTimeout, "timed out");
        let verifier = Verifier::<RuleTable>::default();
        let first = verifier.verify(&subgoal, 1, &action, &before, &after);
        let second = verifier.verify(&subgoal, 1, &action, &before, &after);
        assert_eq!(first, second);
        assert_eq!(
            first.replanning.map(|r| r.strategy),
            Some(Strategy::RetryAction)
        );
    }

    #[test]
    fn highest_severity_bug_drives_the_request() {
        let low = bug(BugKind::UnmetCriteria, Severity::Low, "low");
        let medium = bug(BugKind::ToggleStateMismatch, Severity::Medium, "medium");
        let high = bug(BugKind::MissingExpectedScreen, Severity::High, "high");
        let later_high = bug(BugKind::BlockingDialog, Severity::High, "later");
        let bugs = vec![low, medium, high, later_high];
        let primary = primary_bug(&bugs).expect("primary");
        assert_eq!(primary.kind, BugKind::MissingExpectedScreen);
    }

    struct AlwaysFreeze;

    impl BugClassifier for AlwaysFreeze {
        fn classify(&self, _input: &RuleInput<'_>, _scope: RuleScope) -> Vec<Bug> {
            vec![bug(BugKind::UiFreeze, Severity::Medium, "scripted")]
        }
    }

    #[test]
    fn classifier_is_swappable() {
        let subgoal = toggle_off_subgoal();
        let action = GroundedAction::untargeted(ActionKind::NoOp);
        let ui = state("wifi_settings", Vec::new());
        let result = Verifier::new(AlwaysFreeze).check_progress(&subgoal, 0, &action, &ui, &ui);
        assert_eq!(result.bugs[0].kind, BugKind::UiFreeze);
        assert_eq!(
            result.replanning.map(|r| r.strategy),
            Some(Strategy::RetryAction)
        );
    }
}
