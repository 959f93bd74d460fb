//! Session loop for `qa run`.
//!
//! One round executes one required action: the Executor grounds and
//! dispatches it, the Verifier judges the before/after pair, the Supervisor
//! records the frame, and the Planner either advances or adapts the plan.
//! The loop stops when the plan is exhausted, a subgoal fails terminally,
//! the round or time budget runs out, or the session is cancelled. The
//! Supervisor finalizes a report for every stop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, error, info, instrument, warn};

use crate::agents::executor::Executor;
use crate::agents::planner::{AdaptOutcome, Planner};
use crate::agents::supervisor::{SessionFacts, Supervisor};
use crate::agents::verifier::Verifier;
use crate::core::budget::step_budget;
use crate::core::rules::{BugClassifier, RuleTable};
use crate::core::types::{
    EvaluationReport, Goal, GoalHints, Plan, StopReason, SubgoalStatus, TraceFrame, UiState,
};
use crate::io::config::QaConfig;
use crate::io::device::DeviceSurface;

/// Cooperative cancellation shared between the caller and the session loop.
///
/// The loop checks the flag before each round; an in-flight device call is
/// never interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a finished session produced.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOutcome {
    pub report: EvaluationReport,
    pub trace: Vec<TraceFrame>,
    /// Final plan revision, including the adaptation history.
    pub plan: Plan,
}

/// Run a session with the default rule table.
pub fn run_session<D: DeviceSurface + ?Sized>(
    goal: &str,
    hints: GoalHints,
    device: &mut D,
    config: &QaConfig,
    cancel: &CancelFlag,
) -> Result<SessionOutcome> {
    run_session_with(
        goal,
        hints,
        device,
        config,
        cancel,
        &Verifier::<RuleTable>::default(),
        |_| {},
    )
}

/// Run a session with a custom classifier and a per-frame callback.
///
/// Errors are returned only before the loop starts: an empty goal
/// ([`ConfigError`](crate::core::types::ConfigError)), an invalid config, or a
/// device that cannot be reset. Once the plan exists, every stop produces a
/// report.
#[instrument(skip_all, fields(goal = %goal))]
pub fn run_session_with<D, C, F>(
    goal: &str,
    hints: GoalHints,
    device: &mut D,
    config: &QaConfig,
    cancel: &CancelFlag,
    verifier: &Verifier<C>,
    mut on_frame: F,
) -> Result<SessionOutcome>
where
    D: DeviceSurface + ?Sized,
    C: BugClassifier,
    F: FnMut(&TraceFrame),
{
    let goal = Goal::parse(goal, hints)?;
    config.validate()?;

    let capabilities = device.capabilities();
    info!(
        device = capabilities.kind.as_str(),
        enforces_timeout = capabilities.enforces_timeout,
        "device resolved"
    );
    let deadline = Instant::now() + config.session_timeout();
    let initial = device.reset().context("reset device")?;

    let mut planner = Planner::new(config.planner.retry_budget);
    let plan = planner.generate_plan(&goal, &initial);
    let mut run = SessionRun {
        planner,
        executor: Executor::new(config.executor.min_grounding_score),
        state: initial,
        plan,
        supervisor: Supervisor::new(),
        rounds: 0,
    };

    let stop = run.drive(device, verifier, config, deadline, cancel, &mut on_frame);
    info!(?stop, rounds = run.rounds, "session loop stopped");

    let facts = SessionFacts {
        device_kind: capabilities.kind.as_str().to_string(),
        modal_transitions: run.planner.belief().transitions,
    };
    let report = run.supervisor.finalize(&run.plan, stop, &facts);
    Ok(SessionOutcome {
        report,
        trace: run.supervisor.into_frames(),
        plan: run.plan,
    })
}

struct SessionRun {
    planner: Planner,
    executor: Executor,
    plan: Plan,
    state: UiState,
    supervisor: Supervisor,
    rounds: u32,
}

impl SessionRun {
    fn drive<D, C, F>(
        &mut self,
        device: &mut D,
        verifier: &Verifier<C>,
        config: &QaConfig,
        deadline: Instant,
        cancel: &CancelFlag,
        on_frame: &mut F,
    ) -> StopReason
    where
        D: DeviceSurface + ?Sized,
        C: BugClassifier,
        F: FnMut(&TraceFrame),
    {
        loop {
            if cancel.is_cancelled() {
                info!("session cancelled");
                return StopReason::Cancelled;
            }
            let Some(index) = self.plan.active_index() else {
                return StopReason::PlanExhausted;
            };
            if self.rounds >= config.session.max_rounds {
                warn!(rounds = self.rounds, "round limit reached");
                return StopReason::MaxRounds {
                    rounds: self.rounds,
                };
            }
            let timeout = match step_budget(deadline, config.step_timeout()) {
                Ok(timeout) => timeout,
                Err(err) => {
                    warn!(err = %err, "stopping session");
                    return StopReason::DeadlineExceeded;
                }
            };
            self.rounds += 1;

            if let Some(stop) = self.round(device, verifier, config, index, timeout, on_frame) {
                return stop;
            }
        }
    }

    /// Execute and judge the next action of the step at `index`.
    fn round<D, C, F>(
        &mut self,
        device: &mut D,
        verifier: &Verifier<C>,
        config: &QaConfig,
        index: usize,
        timeout: Duration,
        on_frame: &mut F,
    ) -> Option<StopReason>
    where
        D: DeviceSurface + ?Sized,
        C: BugClassifier,
        F: FnMut(&TraceFrame),
    {
        if self.plan.steps[index].progress.status != SubgoalStatus::InProgress {
            self.plan = self.planner.begin(self.plan.clone(), index);
            self.supervisor
                .observe(&self.plan.steps[index].subgoal.id, SubgoalStatus::InProgress);
        }
        let step = &self.plan.steps[index];
        let subgoal = Arc::clone(&step.subgoal);
        let action_index = step.progress.next_action;
        let last_action = action_index + 1 >= subgoal.required_actions.len();

        let execution = self
            .executor
            .execute(device, &subgoal, action_index, &self.state, timeout);
        let result = if last_action {
            verifier.verify(&subgoal, index, &execution.action, &self.state, &execution.after)
        } else {
            verifier.check_progress(
                &subgoal,
                index,
                &execution.action,
                &self.state,
                &execution.after,
            )
        };
        let (record, request) = result.into_parts();
        debug!(
            subgoal = %subgoal.id,
            action_index,
            verdict = ?record.verdict,
            bugs = record.bugs.len(),
            "round judged"
        );

        let frame = TraceFrame {
            sequence: self.supervisor.next_sequence(),
            subgoal_id: subgoal.id.clone(),
            plan_revision: self.plan.revision,
            action: execution.action,
            before: self.state.clone(),
            after: execution.after.clone(),
            verification: record,
            duration_ms: u64::try_from(execution.elapsed.as_millis()).unwrap_or(u64::MAX),
            dispatched: execution.dispatched,
        };
        on_frame(&frame);
        self.supervisor.record(frame);

        self.state = execution.after.settled();
        self.planner.observe(&self.state);

        let Some(request) = request else {
            if last_action {
                self.plan = self.planner.complete(self.plan.clone(), index);
                self.supervisor.observe(&subgoal.id, SubgoalStatus::Passed);
            } else {
                self.plan = self.planner.advance_action(self.plan.clone(), index);
            }
            return None;
        };

        match self
            .planner
            .adapt(self.plan.clone(), index, request, &self.state)
        {
            Ok(AdaptOutcome::Adapted(plan)) => {
                self.plan = plan;
                self.supervisor
                    .observe(&subgoal.id, SubgoalStatus::FailedRetryable);
                None
            }
            Ok(AdaptOutcome::Exhausted(plan)) => {
                self.plan = plan;
                let origin = subgoal.retry_key();
                for id in [subgoal.id.as_str(), origin] {
                    if let Some(position) = self.plan.position_of(id)
                        && self.plan.steps[position].progress.status
                            == SubgoalStatus::FailedTerminal
                    {
                        self.supervisor.observe(id, SubgoalStatus::FailedTerminal);
                    }
                }
                config
                    .session
                    .stop_on_terminal_failure
                    .then(|| StopReason::TerminalFailure {
                        subgoal_id: origin.to_string(),
                    })
            }
            Err(err) => {
                error!(err = %format!("{err:#}"), "plan adaptation failed");
                Some(StopReason::TerminalFailure {
                    subgoal_id: subgoal.id.clone(),
                })
            }
        }
    }
}
