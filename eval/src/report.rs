use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::judge::Judgment;
use crate::outcome::Outcome;
use crate::results::EvalMeta;

#[derive(Debug, Default)]
pub struct ReportSummary {
    pub runs: usize,
    pub success: usize,
    pub fail: usize,
    pub error: usize,
    pub avg_duration_secs: Option<f64>,
    /// Mean session pass rate over runs that produced a report.
    pub avg_pass_rate: Option<f64>,
    pub check_pass_rates: BTreeMap<String, (usize, usize)>,
}

pub fn load_run_dirs(case_results_dir: &Path) -> Result<Vec<PathBuf>> {
    if !case_results_dir.exists() {
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    for entry in fs::read_dir(case_results_dir)
        .with_context(|| format!("read {}", case_results_dir.display()))?
    {
        let entry = entry.context("read entry")?;
        if entry.path().is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

pub fn aggregate(case_results_dir: &Path) -> Result<(ReportSummary, Vec<String>)> {
    let mut summary = ReportSummary::default();
    let mut warnings = Vec::new();
    let mut pass_rates = Vec::new();

    for run_dir in load_run_dirs(case_results_dir)? {
        let meta_path = run_dir.join("meta.json");
        let checks_path = run_dir.join("checks.json");

        let meta: EvalMeta = match fs::read_to_string(&meta_path)
            .with_context(|| format!("read {}", meta_path.display()))
            .and_then(|contents| serde_json::from_str(&contents).context("parse meta"))
        {
            Ok(meta) => meta,
            Err(err) => {
                warnings.push(format!(
                    "skip {}: meta.json invalid ({err})",
                    run_dir.display()
                ));
                continue;
            }
        };

        // Errored runs never reach the checks, so checks.json is optional.
        let judgment: Option<Judgment> = if checks_path.exists() {
            match fs::read_to_string(&checks_path)
                .with_context(|| format!("read {}", checks_path.display()))
                .and_then(|contents| serde_json::from_str(&contents).context("parse checks"))
            {
                Ok(checks) => Some(checks),
                Err(err) => {
                    warnings.push(format!(
                        "skip {}: checks.json invalid ({err})",
                        run_dir.display()
                    ));
                    continue;
                }
            }
        } else {
            None
        };

        summary.runs += 1;
        match meta.outcome {
            Some(Outcome::Success) => summary.success += 1,
            Some(Outcome::Fail) => summary.fail += 1,
            Some(Outcome::Error) | None => summary.error += 1,
        }

        summary.avg_duration_secs = Some(match summary.avg_duration_secs {
            None => meta.duration_secs,
            Some(avg) => {
                let total = avg * (summary.runs as f64 - 1.0) + meta.duration_secs;
                total / summary.runs as f64
            }
        });
        if let Some(pass_rate) = meta.pass_rate {
            pass_rates.push(pass_rate);
        }

        if let Some(judgment) = &judgment {
            update_check_pass_rates(&mut summary.check_pass_rates, judgment);
        }
    }

    if !pass_rates.is_empty() {
        summary.avg_pass_rate = Some(pass_rates.iter().sum::<f64>() / pass_rates.len() as f64);
    }
    Ok((summary, warnings))
}

fn update_check_pass_rates(stats: &mut BTreeMap<String, (usize, usize)>, judgment: &Judgment) {
    for check in &judgment.checks {
        let entry = stats.entry(check.label()).or_insert((0, 0));
        if check.passed() {
            entry.0 += 1;
        }
        entry.1 += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::CheckOutcome;
    use orchestrator::core::types::SessionStatus;
    use tempfile::tempdir;

    fn write_meta(path: &Path, outcome: Outcome, duration: f64, pass_rate: Option<f64>) {
        let meta = EvalMeta {
            case_id: "case".to_string(),
            eval_run_id: "run".to_string(),
            case_hash: "hash".to_string(),
            git_sha: None,
            seed: 1,
            session_status: pass_rate.map(|_| SessionStatus::Completed),
            pass_rate,
            outcome: Some(outcome),
            start_time: "now".to_string(),
            end_time: "later".to_string(),
            duration_secs: duration,
            errors: Vec::new(),
        };
        let contents = serde_json::to_string_pretty(&meta).expect("meta json");
        fs::write(path, format!("{contents}\n")).expect("write meta");
    }

    fn write_checks(path: &Path, passed: bool) {
        let judgment = Judgment {
            checks: vec![CheckOutcome::SessionStatus {
                expect: SessionStatus::Completed,
                actual: if passed {
                    SessionStatus::Completed
                } else {
                    SessionStatus::Failed
                },
                passed,
            }],
        };
        let contents = serde_json::to_string_pretty(&judgment).expect("checks json");
        fs::write(path, format!("{contents}\n")).expect("write checks");
    }

    #[test]
    fn aggregates_runs() {
        let temp = tempdir().expect("tempdir");
        let run1 = temp.path().join("run1");
        let run2 = temp.path().join("run2");
        let run3 = temp.path().join("run3");
        for dir in [&run1, &run2, &run3] {
            fs::create_dir_all(dir).expect("run dir");
        }

        write_meta(&run1.join("meta.json"), Outcome::Success, 5.0, Some(1.0));
        write_checks(&run1.join("checks.json"), true);

        write_meta(&run2.join("meta.json"), Outcome::Fail, 15.0, Some(0.5));
        write_checks(&run2.join("checks.json"), false);

        write_meta(&run3.join("meta.json"), Outcome::Error, 10.0, None);

        let (summary, warnings) = aggregate(temp.path()).expect("aggregate");
        assert!(warnings.is_empty());
        assert_eq!(summary.runs, 3);
        assert_eq!(summary.success, 1);
        assert_eq!(summary.fail, 1);
        assert_eq!(summary.error, 1);
        assert_eq!(summary.avg_duration_secs, Some(10.0));
        assert_eq!(summary.avg_pass_rate, Some(0.75));

        let key = "session_status(completed)".to_string();
        assert_eq!(summary.check_pass_rates.get(&key), Some(&(1, 2)));
    }

    #[test]
    fn skips_runs_with_invalid_meta() {
        let temp = tempdir().expect("tempdir");
        let run = temp.path().join("run1");
        fs::create_dir_all(&run).expect("run dir");
        fs::write(run.join("meta.json"), "not json").expect("write meta");

        let (summary, warnings) = aggregate(temp.path()).expect("aggregate");
        assert_eq!(summary.runs, 0);
        assert_eq!(warnings.len(), 1);
    }
}
