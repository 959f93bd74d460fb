//! Result capture and persistence.
//!
//! Writes the session artifacts (report, plan, trace) and run metadata to the
//! results directory for later analysis.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use orchestrator::core::types::SessionStatus;
use orchestrator::io::session_log::write_session;
use orchestrator::session::SessionOutcome;

use crate::outcome::Outcome;

/// Input for capturing results from a finished run.
#[derive(Debug)]
pub struct CaptureInput<'a> {
    pub case_id: &'a str,
    pub case_path: &'a Path,
    pub eval_run_id: &'a str,
    pub seed: u64,
    /// The session, or the error that prevented it from producing a report.
    pub session: Result<&'a SessionOutcome, String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub repo_root: &'a Path,
}

/// Metadata for an eval run, persisted to `meta.json`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EvalMeta {
    pub case_id: String,
    pub eval_run_id: String,
    /// SHA-256 hash of the case file for reproducibility tracking.
    pub case_hash: String,
    /// Git SHA of the repo at time of run.
    pub git_sha: Option<String>,
    /// Random fault seed the device ran with.
    pub seed: u64,
    pub session_status: Option<SessionStatus>,
    pub pass_rate: Option<f64>,
    pub outcome: Option<Outcome>,
    pub start_time: String,
    pub end_time: String,
    pub duration_secs: f64,
    /// Session error, or non-fatal errors encountered during capture.
    pub errors: Vec<String>,
}

/// Capture results from a finished run to the results directory.
///
/// Writes the session artifacts when the session produced them. Writes
/// metadata in every case.
#[instrument(skip_all, fields(case_id = %input.case_id, eval_run_id = %input.eval_run_id))]
pub fn capture_results(base_dir: &Path, input: &CaptureInput<'_>) -> Result<PathBuf> {
    let results_dir = results_dir(base_dir, input.case_id, input.eval_run_id);
    fs::create_dir_all(&results_dir)
        .with_context(|| format!("create results dir {}", results_dir.display()))?;

    let mut errors = Vec::new();

    let case_hash = match file_sha256(input.case_path) {
        Ok(hash) => hash,
        Err(err) => {
            errors.push(format!("case hash: {err}"));
            String::new()
        }
    };

    let git_sha = match git_rev_parse(input.repo_root) {
        Ok(sha) => Some(sha),
        Err(err) => {
            errors.push(format!("git sha: {err}"));
            None
        }
    };

    let (session_status, pass_rate) = match &input.session {
        Ok(session) => {
            if let Err(err) = write_session(&results_dir, session) {
                errors.push(format!("session artifacts: {err:#}"));
            }
            (Some(session.report.status), Some(session.report.pass_rate))
        }
        Err(message) => {
            errors.push(format!("session: {message}"));
            (None, None)
        }
    };

    if !errors.is_empty() {
        warn!(errors = ?errors, "result capture had errors");
    }

    let duration = input.finished_at - input.started_at;
    let meta = EvalMeta {
        case_id: input.case_id.to_string(),
        eval_run_id: input.eval_run_id.to_string(),
        case_hash,
        git_sha,
        seed: input.seed,
        session_status,
        pass_rate,
        outcome: None,
        start_time: input.started_at.to_rfc3339(),
        end_time: input.finished_at.to_rfc3339(),
        duration_secs: duration.num_milliseconds() as f64 / 1000.0,
        errors,
    };

    write_meta(&results_dir.join("meta.json"), &meta)?;
    debug!(results_dir = %results_dir.display(), "results captured");
    Ok(results_dir)
}

pub fn update_outcome(results_dir: &Path, outcome: Outcome) -> Result<()> {
    let meta_path = results_dir.join("meta.json");
    let mut meta: EvalMeta = serde_json::from_str(
        &fs::read_to_string(&meta_path).with_context(|| format!("read {}", meta_path.display()))?,
    )
    .context("parse meta")?;
    meta.outcome = Some(outcome);
    write_meta(&meta_path, &meta)?;
    Ok(())
}

pub fn results_dir(base_dir: &Path, case_id: &str, eval_run_id: &str) -> PathBuf {
    base_dir.join(case_id).join(eval_run_id)
}

fn write_meta(path: &Path, meta: &EvalMeta) -> Result<()> {
    let contents = serde_json::to_string_pretty(meta).context("serialize meta")?;
    fs::write(path, format!("{contents}\n"))
        .with_context(|| format!("write meta {}", path.display()))?;
    Ok(())
}

fn file_sha256(path: &Path) -> Result<String> {
    let contents = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(contents);
    let digest = hasher.finalize();
    Ok(hex::encode(digest))
}

fn git_rev_parse(repo_root: &Path) -> Result<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(repo_root)
        .output()
        .context("git rev-parse")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("git rev-parse failed: {}", stderr.trim()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator::core::types::GoalHints;
    use orchestrator::io::config::QaConfig;
    use orchestrator::io::simulated::{Scenario, SimulatedDevice};
    use orchestrator::session::{CancelFlag, run_session};
    use tempfile::tempdir;

    fn write_case(dir: &Path) -> PathBuf {
        let case_path = dir.join("case.toml");
        fs::write(
            &case_path,
            "[case]\nid='case'\ngoal='turn wifi off'\n[[checks]]\ntype='session_status'\nexpect='completed'\n",
        )
        .expect("case");
        case_path
    }

    #[test]
    fn results_dir_is_stable() {
        let base = Path::new("/tmp/results");
        let dir = results_dir(base, "case", "run-1");
        assert_eq!(dir, PathBuf::from("/tmp/results/case/run-1"));
    }

    #[test]
    fn writes_session_artifacts_and_meta() {
        let temp = tempdir().expect("tempdir");
        let case_path = write_case(temp.path());
        let mut device =
            SimulatedDevice::new(Scenario::phone().expect("phone")).expect("device");
        let session = run_session(
            "turn wifi off",
            GoalHints::default(),
            &mut device,
            &QaConfig::default(),
            &CancelFlag::new(),
        )
        .expect("session");

        let input = CaptureInput {
            case_id: "case",
            case_path: &case_path,
            eval_run_id: "eval-1",
            seed: 11,
            session: Ok(&session),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            repo_root: temp.path(),
        };
        let output_dir = capture_results(&temp.path().join("results"), &input).expect("capture");

        assert!(output_dir.join("report.json").exists());
        assert!(output_dir.join("plan.json").exists());
        assert!(output_dir.join("trace.jsonl").exists());
        let meta: EvalMeta = serde_json::from_str(
            &fs::read_to_string(output_dir.join("meta.json")).expect("read meta"),
        )
        .expect("parse meta");
        assert_eq!(meta.seed, 11);
        assert_eq!(meta.session_status, Some(SessionStatus::Completed));
        assert_eq!(meta.case_hash.len(), 64);

        update_outcome(&output_dir, Outcome::Success).expect("update");
        let meta: EvalMeta = serde_json::from_str(
            &fs::read_to_string(output_dir.join("meta.json")).expect("read meta"),
        )
        .expect("parse meta");
        assert_eq!(meta.outcome, Some(Outcome::Success));
    }

    #[test]
    fn session_error_is_recorded_in_meta() {
        let temp = tempdir().expect("tempdir");
        let case_path = write_case(temp.path());
        let input = CaptureInput {
            case_id: "case",
            case_path: &case_path,
            eval_run_id: "eval-2",
            seed: 0,
            session: Err("goal must be non-empty".to_string()),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            repo_root: temp.path(),
        };
        let output_dir = capture_results(&temp.path().join("results"), &input).expect("capture");

        assert!(!output_dir.join("report.json").exists());
        let meta: EvalMeta = serde_json::from_str(
            &fs::read_to_string(output_dir.join("meta.json")).expect("read meta"),
        )
        .expect("parse meta");
        assert_eq!(meta.session_status, None);
        assert!(
            meta.errors
                .iter()
                .any(|err| err.contains("goal must be non-empty"))
        );
    }
}
