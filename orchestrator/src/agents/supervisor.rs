//! Passive trace aggregation and evaluation scoring.
//!
//! The Supervisor observes every frame and subgoal transition but never
//! influences control flow.

use std::collections::BTreeMap;

use tracing::info;

use crate::core::metrics::aggregate;
use crate::core::types::{
    EvaluationReport, Plan, StopReason, SubgoalStatus, TraceFrame,
};

#[derive(Debug, Clone, Default)]
pub struct Supervisor {
    frames: Vec<TraceFrame>,
    /// Latest status per started subgoal id.
    statuses: BTreeMap<String, SubgoalStatus>,
}

/// Session facts the report carries beyond the trace.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionFacts {
    pub device_kind: String,
    pub modal_transitions: u32,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, frame: TraceFrame) {
        self.frames.push(frame);
    }

    /// Record a subgoal status transition.
    pub fn observe(&mut self, subgoal_id: &str, status: SubgoalStatus) {
        self.statuses.insert(subgoal_id.to_string(), status);
    }

    pub fn frames(&self) -> &[TraceFrame] {
        &self.frames
    }

    pub fn next_sequence(&self) -> u32 {
        u32::try_from(self.frames.len()).unwrap_or(u32::MAX)
    }

    /// Build the evaluation report. Safe to call for any stop reason.
    pub fn finalize(
        &self,
        plan: &Plan,
        stop: StopReason,
        facts: &SessionFacts,
    ) -> EvaluationReport {
        let metrics = aggregate(&self.statuses, &self.frames, &plan.adaptation_history);
        let status = stop.status(metrics.terminal_failures.len());
        info!(
            ?status,
            attempted = metrics.attempted,
            passed = metrics.passed,
            adaptations = plan.adaptation_history.len(),
            recoveries = metrics.successful_recoveries,
            "session finalized"
        );
        EvaluationReport {
            goal: plan.goal.text.clone(),
            status,
            stop_reason: stop,
            domain: plan.domain,
            plan_confidence: plan.confidence,
            device_kind: facts.device_kind.clone(),
            subgoals_attempted: metrics.attempted,
            subgoals_passed: metrics.passed,
            terminal_failures: metrics.terminal_failures,
            pass_rate: metrics.pass_rate,
            bug_counts: metrics.bug_counts,
            adaptation_count: plan.adaptation_history.len(),
            successful_recoveries: metrics.successful_recoveries,
            recovery_rate: metrics.recovery_rate,
            mean_step_duration_ms: metrics.mean_step_duration_ms,
            frames_recorded: self.frames.len(),
            device_calls: metrics.device_calls,
            modal_transitions: facts.modal_transitions,
        }
    }

    pub fn into_frames(self) -> Vec<TraceFrame> {
        self.frames
    }
}
