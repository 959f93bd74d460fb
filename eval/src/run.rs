//! Case execution orchestration.
//!
//! Builds the simulated device, runs the session in-process, applies the
//! checks and captures results.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use rand::{Rng, distributions::Alphanumeric};
use tracing::{debug, info, instrument};

use orchestrator::core::types::GoalHints;
use orchestrator::io::config::QaConfig;
use orchestrator::io::simulated::{Scenario, SimulatedDevice};
use orchestrator::session::{CancelFlag, run_session};

use crate::case::CaseFile;
use crate::config::apply_case_config;
use crate::judge::{run_checks, write_judgment};
use crate::outcome::{Outcome, classify_outcome};
use crate::results::{CaptureInput, capture_results, update_outcome};

/// Result of running a single case.
#[derive(Debug)]
pub struct RunOutcome {
    /// Unique identifier for this eval run.
    pub eval_run_id: String,
    /// Path to the results directory.
    pub results_dir: PathBuf,
    /// Classified outcome.
    pub outcome: Outcome,
    pub seed: u64,
}

/// Run a case end-to-end: device setup, session, checks, result capture.
///
/// A session that errors is captured as an `error` outcome rather than
/// failing the run.
#[instrument(skip_all, fields(case_id = %case.case.id, seed = seed))]
pub fn run_case(
    repo_root: &Path,
    case_path: &Path,
    case: &CaseFile,
    seed: u64,
) -> Result<RunOutcome> {
    info!("case run started");

    let config = apply_case_config(QaConfig::default(), &case.config).context("apply config")?;
    let mut device = build_device(case, case_path, seed).context("build device")?;

    let started_at = Utc::now();
    let eval_run_id = build_eval_run_id(&started_at.format("%Y%m%d_%H%M%S").to_string());
    let hints = GoalHints {
        domain: case.case.domain.clone(),
    };

    debug!("running session");
    let session = run_session(
        &case.case.goal,
        hints,
        &mut device,
        &config,
        &CancelFlag::new(),
    );
    let finished_at = Utc::now();

    let capture_input = CaptureInput {
        case_id: &case.case.id,
        case_path,
        eval_run_id: &eval_run_id,
        seed,
        session: session.as_ref().map_err(|err| format!("{err:#}")),
        started_at,
        finished_at,
        repo_root,
    };
    let results_dir = capture_results(&repo_root.join("eval").join("results"), &capture_input)
        .context("capture results")?;

    let judgment = match &session {
        Ok(session) => {
            info!(
                status = session.report.status.as_str(),
                pass_rate = session.report.pass_rate,
                "session finished"
            );
            let judgment = run_checks(&case.checks, &session.report);
            write_judgment(&results_dir.join("checks.json"), &judgment)
                .context("write checks")?;
            Some(judgment)
        }
        Err(err) => {
            info!(error = %format!("{err:#}"), "session errored");
            None
        }
    };

    let outcome = classify_outcome(judgment.as_ref());
    update_outcome(&results_dir, outcome).context("update outcome")?;

    info!(outcome = ?outcome, results_dir = %results_dir.display(), "case run complete");

    Ok(RunOutcome {
        eval_run_id,
        results_dir,
        outcome,
        seed,
    })
}

fn build_device(case: &CaseFile, case_path: &Path, seed: u64) -> Result<SimulatedDevice> {
    let scenario = match case.scenario_path(case_path) {
        Some(path) => Scenario::load(&path)?,
        None => Scenario::phone()?,
    };
    Ok(SimulatedDevice::new(scenario)?
        .with_faults(case.faults.iter().cloned())
        .with_seed(seed))
}

pub fn build_eval_run_id(timestamp: &str) -> String {
    format!("eval-{timestamp}-{}", generate_short_id())
}

fn generate_short_id() -> String {
    let mut rng = rand::thread_rng();
    std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase()
}
