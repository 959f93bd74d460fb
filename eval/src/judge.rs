//! Check execution and outcome recording.
//!
//! Applies a case's checks to the report of a finished session and records
//! what was expected next to what was observed.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use orchestrator::core::types::{BugKind, EvaluationReport, SessionStatus};

use crate::case::Check;

/// Collected check outcomes for a run.
#[derive(Debug, Serialize, Deserialize)]
pub struct Judgment {
    pub checks: Vec<CheckOutcome>,
}

impl Judgment {
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(CheckOutcome::passed)
    }
}

/// Result of applying a single check.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckOutcome {
    SessionStatus {
        expect: SessionStatus,
        actual: SessionStatus,
        passed: bool,
    },
    MinPassRate {
        min: f64,
        actual: f64,
        passed: bool,
    },
    BugReported {
        kind: BugKind,
        count: usize,
        passed: bool,
    },
    MaxAdaptations {
        max: usize,
        actual: usize,
        passed: bool,
    },
}

impl CheckOutcome {
    pub fn passed(&self) -> bool {
        match self {
            CheckOutcome::SessionStatus { passed, .. }
            | CheckOutcome::MinPassRate { passed, .. }
            | CheckOutcome::BugReported { passed, .. }
            | CheckOutcome::MaxAdaptations { passed, .. } => *passed,
        }
    }

    /// Stable label used to aggregate the same check across runs.
    pub fn label(&self) -> String {
        match self {
            CheckOutcome::SessionStatus { expect, .. } => {
                format!("session_status({})", expect.as_str())
            }
            CheckOutcome::MinPassRate { min, .. } => format!("min_pass_rate({min})"),
            CheckOutcome::BugReported { kind, .. } => format!("bug_reported({})", kind.as_str()),
            CheckOutcome::MaxAdaptations { max, .. } => format!("max_adaptations({max})"),
        }
    }
}

/// Apply all checks to a session report.
#[instrument(skip_all, fields(check_count = checks.len()))]
pub fn run_checks(checks: &[Check], report: &EvaluationReport) -> Judgment {
    let outcomes = checks
        .iter()
        .map(|check| {
            let outcome = apply_check(check, report);
            debug!(check = %outcome.label(), passed = outcome.passed(), "check result");
            outcome
        })
        .collect();
    Judgment { checks: outcomes }
}

fn apply_check(check: &Check, report: &EvaluationReport) -> CheckOutcome {
    match check {
        Check::SessionStatus { expect } => CheckOutcome::SessionStatus {
            expect: *expect,
            actual: report.status,
            passed: report.status == *expect,
        },
        Check::MinPassRate { value } => CheckOutcome::MinPassRate {
            min: *value,
            actual: report.pass_rate,
            passed: report.pass_rate >= *value,
        },
        Check::BugReported { kind } => {
            let count = report.bug_counts.get(kind).copied().unwrap_or(0);
            CheckOutcome::BugReported {
                kind: *kind,
                count,
                passed: count > 0,
            }
        }
        Check::MaxAdaptations { value } => CheckOutcome::MaxAdaptations {
            max: *value,
            actual: report.adaptation_count,
            passed: report.adaptation_count <= *value,
        },
    }
}

pub fn write_judgment(path: &Path, judgment: &Judgment) -> Result<()> {
    let contents = serde_json::to_string_pretty(judgment).context("serialize checks")?;
    fs::write(path, format!("{contents}\n"))
        .with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use orchestrator::core::types::{Domain, PlanConfidence, StopReason};

    fn report(status: SessionStatus, pass_rate: f64, adaptations: usize) -> EvaluationReport {
        EvaluationReport {
            goal: "turn wifi off".to_string(),
            status,
            stop_reason: StopReason::PlanExhausted,
            domain: Domain::Wifi,
            plan_confidence: PlanConfidence::Normal,
            device_kind: "simulated".to_string(),
            subgoals_attempted: 2,
            subgoals_passed: 2,
            terminal_failures: Vec::new(),
            pass_rate,
            bug_counts: BTreeMap::from([(BugKind::BlockingDialog, 1)]),
            adaptation_count: adaptations,
            successful_recoveries: adaptations,
            recovery_rate: if adaptations == 0 { 0.0 } else { 1.0 },
            mean_step_duration_ms: 1.0,
            frames_recorded: 3,
            device_calls: 3,
            modal_transitions: 2,
        }
    }

    #[test]
    fn status_and_pass_rate_checks() {
        let checks = vec![
            Check::SessionStatus {
                expect: SessionStatus::Completed,
            },
            Check::MinPassRate { value: 0.75 },
        ];
        let judgment = run_checks(&checks, &report(SessionStatus::Completed, 0.5, 0));
        assert!(judgment.checks[0].passed());
        assert!(!judgment.checks[1].passed());
        assert!(!judgment.all_passed());
    }

    #[test]
    fn bug_and_adaptation_checks() {
        let checks = vec![
            Check::BugReported {
                kind: BugKind::BlockingDialog,
            },
            Check::BugReported {
                kind: BugKind::Crash,
            },
            Check::MaxAdaptations { value: 1 },
        ];
        let judgment = run_checks(&checks, &report(SessionStatus::Completed, 1.0, 1));
        let passed: Vec<bool> = judgment.checks.iter().map(CheckOutcome::passed).collect();
        assert_eq!(passed, vec![true, false, true]);
    }

    #[test]
    fn labels_are_stable() {
        let checks = vec![
            Check::BugReported {
                kind: BugKind::BlockingDialog,
            },
            Check::MaxAdaptations { value: 2 },
        ];
        let judgment = run_checks(&checks, &report(SessionStatus::Failed, 0.0, 3));
        assert_eq!(judgment.checks[0].label(), "bug_reported(blocking-dialog)");
        assert_eq!(judgment.checks[1].label(), "max_adaptations(2)");
    }
}
