//! CLI command implementations.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

use crate::case::{CaseFile, discover_cases};
use crate::report::aggregate;
use crate::run::run_case;

fn cases_dir(repo_root: &Path) -> PathBuf {
    repo_root.join("eval").join("cases")
}

/// List all available cases.
pub fn list_cases(repo_root: &Path) -> Result<()> {
    let cases = discover_cases(&cases_dir(repo_root))?;
    for case in cases {
        println!("{}\t{}", case.case.id, case.case.goal);
    }
    Ok(())
}

/// Run a case by id (optionally multiple times).
///
/// Run `n` uses `seed + n - 1`; without `--seed` the case's seed applies, or
/// a random one when the case has none.
pub fn run_case_by_id(
    repo_root: &Path,
    case_id: &str,
    runs: u32,
    seed: Option<u64>,
) -> Result<()> {
    let case_path = cases_dir(repo_root).join(format!("{case_id}.toml"));
    if !case_path.exists() {
        bail!("case {} not found at {}", case_id, case_path.display());
    }
    let case = CaseFile::load(&case_path).context("load case")?;
    let base_seed = seed.or(case.case.seed).unwrap_or_else(rand::random::<u64>);
    debug!(case_id, runs, base_seed, "case loaded");

    info!(case_id, runs, "starting runs");
    for run_num in 1..=runs {
        let run_seed = base_seed.wrapping_add(u64::from(run_num - 1));
        debug!(case_id, run_num, runs, run_seed, "starting run");
        let outcome = run_case(repo_root, &case_path, &case, run_seed).context("run case")?;
        println!(
            "run: case={} eval_run_id={} seed={} outcome={:?} results={}",
            case_id,
            outcome.eval_run_id,
            outcome.seed,
            outcome.outcome,
            outcome.results_dir.display()
        );
    }
    Ok(())
}

/// Show aggregated results for a case.
pub fn report_case(repo_root: &Path, case_id: &str) -> Result<()> {
    let results_dir = repo_root.join("eval").join("results").join(case_id);
    let (summary, warnings) = aggregate(&results_dir)?;
    println!("report: case={} runs={}", case_id, summary.runs);
    println!(
        "report: success={} fail={} error={}",
        summary.success, summary.fail, summary.error
    );
    if let Some(avg) = summary.avg_duration_secs {
        println!("report: avg_duration_secs={:.2}", avg);
    }
    if let Some(avg) = summary.avg_pass_rate {
        println!("report: avg_pass_rate={:.3}", avg);
    }
    for (label, (passed, total)) in summary.check_pass_rates {
        println!("report: check {} {}/{}", label, passed, total);
    }
    for warning in warnings {
        eprintln!("warning: {}", warning);
    }
    Ok(())
}

/// Remove results for a case.
pub fn clean_case(repo_root: &Path, case_id: &str) -> Result<()> {
    let case_results = repo_root.join("eval").join("results").join(case_id);
    if case_results.exists() {
        std::fs::remove_dir_all(&case_results)
            .with_context(|| format!("remove {}", case_results.display()))?;
    }

    println!("clean: case={} results={}", case_id, case_results.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_case(repo_root: &Path) {
        let dir = cases_dir(repo_root);
        fs::create_dir_all(&dir).expect("cases dir");
        fs::write(
            dir.join("wifi.toml"),
            "[case]\nid='wifi'\ngoal='turn wifi off'\n[[checks]]\ntype='session_status'\nexpect='completed'\n",
        )
        .expect("write case");
    }

    #[test]
    fn run_then_clean_removes_results() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_case(temp.path());

        run_case_by_id(temp.path(), "wifi", 2, Some(5)).expect("run");
        let results = temp.path().join("eval/results/wifi");
        assert_eq!(fs::read_dir(&results).expect("results").count(), 2);

        let (summary, _) = aggregate(&results).expect("aggregate");
        assert_eq!(summary.runs, 2);
        assert_eq!(summary.success, 2);

        clean_case(temp.path(), "wifi").expect("clean");
        assert!(!results.exists());
    }

    #[test]
    fn unknown_case_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = run_case_by_id(temp.path(), "nope", 1, None).expect_err("missing case");
        assert!(err.to_string().contains("case nope not found"));
    }
}
