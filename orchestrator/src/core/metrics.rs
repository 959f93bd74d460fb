//! Deterministic metric aggregation over a session trace.

use std::collections::BTreeMap;

use crate::core::types::{AdaptationRecord, BugKind, SubgoalStatus, TraceFrame};

/// Aggregated session metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionMetrics {
    pub attempted: usize,
    pub passed: usize,
    /// Ids whose final status is `failed_terminal`, sorted.
    pub terminal_failures: Vec<String>,
    pub pass_rate: f64,
    pub bug_counts: BTreeMap<BugKind, usize>,
    pub mean_step_duration_ms: f64,
    pub device_calls: usize,
    pub successful_recoveries: usize,
    pub recovery_rate: f64,
}

/// Single pass over the latest per-subgoal statuses, the recorded frames and
/// the plan's adaptation history.
///
/// `statuses` holds only subgoals that were started, so its size is the
/// attempted count. An adaptation counts as a successful recovery when the
/// subgoal it was applied to ended `passed`.
pub fn aggregate(
    statuses: &BTreeMap<String, SubgoalStatus>,
    frames: &[TraceFrame],
    history: &[AdaptationRecord],
) -> SessionMetrics {
    let attempted = statuses.len();
    let passed = statuses
        .values()
        .filter(|status| **status == SubgoalStatus::Passed)
        .count();
    let terminal_failures: Vec<String> = statuses
        .iter()
        .filter(|(_, status)| **status == SubgoalStatus::FailedTerminal)
        .map(|(id, _)| id.clone())
        .collect();

    let successful_recoveries = history
        .iter()
        .filter(|record| statuses.get(&record.subgoal_id) == Some(&SubgoalStatus::Passed))
        .count();

    let mut bug_counts = BTreeMap::new();
    let mut total_ms = 0u64;
    let mut device_calls = 0;
    for frame in frames {
        total_ms = total_ms.saturating_add(frame.duration_ms);
        if frame.dispatched {
            device_calls += 1;
        }
        for bug in &frame.verification.bugs {
            *bug_counts.entry(bug.kind).or_insert(0) += 1;
        }
    }

    SessionMetrics {
        attempted,
        passed,
        terminal_failures,
        pass_rate: ratio(passed, attempted),
        bug_counts,
        mean_step_duration_ms: if frames.is_empty() {
            0.0
        } else {
            total_ms as f64 / frames.len() as f64
        },
        device_calls,
        successful_recoveries,
        recovery_rate: ratio(successful_recoveries, history.len()),
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}
