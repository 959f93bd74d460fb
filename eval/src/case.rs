//! Case file parsing and validation.
//!
//! Cases are TOML files pairing a goal with a simulated device, optional
//! faults and the checks a session must satisfy. See `eval/cases/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;

use orchestrator::core::types::{BugKind, SessionStatus};
use orchestrator::io::simulated::Fault;

/// A parsed case file containing goal, config, faults and checks.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CaseFile {
    pub case: CaseMeta,
    #[serde(default)]
    pub config: CaseConfig,
    /// Faults appended to the scenario's own.
    #[serde(default)]
    pub faults: Vec<Fault>,
    #[serde(default)]
    pub checks: Vec<Check>,
}

/// Case metadata: identifier, goal and device.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CaseMeta {
    /// Unique identifier (slug format: `[a-z0-9_-]+`).
    pub id: String,
    /// Goal text passed to the session.
    pub goal: String,
    /// Domain hint.
    pub domain: Option<String>,
    /// Simulated scenario, relative to the case file. The bundled phone
    /// is used when absent.
    pub scenario: Option<PathBuf>,
    /// Random fault seed used when `--seed` is not given.
    pub seed: Option<u64>,
}

/// Session configuration overrides for the case.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct CaseConfig {
    pub retry_budget: Option<u32>,
    pub max_rounds: Option<u32>,
    pub step_timeout_ms: Option<u64>,
    pub stop_on_terminal_failure: Option<bool>,
}

/// Check applied to the session report once the session has ended.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Check {
    /// The session ended with this status.
    SessionStatus { expect: SessionStatus },
    /// The report's pass rate is at least `value`.
    MinPassRate { value: f64 },
    /// At least one bug of this kind was classified.
    BugReported { kind: BugKind },
    /// The plan was adapted at most `value` times.
    MaxAdaptations { value: usize },
}

impl CaseFile {
    /// Load and validate a case file from the given path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read case {}", path.display()))?;
        let case: CaseFile =
            toml::from_str(&contents).with_context(|| format!("parse case {}", path.display()))?;
        case.validate()
            .with_context(|| format!("validate case {}", path.display()))?;
        Ok(case)
    }

    #[cfg(test)]
    pub fn parse_str(contents: &str) -> Result<Self> {
        let case: CaseFile = toml::from_str(contents).context("parse case")?;
        case.validate()?;
        Ok(case)
    }

    /// Scenario path resolved against the directory holding the case file.
    pub fn scenario_path(&self, case_path: &Path) -> Option<PathBuf> {
        let scenario = self.case.scenario.as_ref()?;
        let base = case_path.parent().unwrap_or(Path::new("."));
        Some(base.join(scenario))
    }

    fn validate(&self) -> Result<()> {
        validate_case_id(&self.case.id)?;
        if self.case.goal.trim().is_empty() {
            bail!("case.goal must be non-empty");
        }
        if let Some(scenario) = &self.case.scenario
            && scenario.as_os_str().is_empty()
        {
            bail!("case.scenario must be non-empty");
        }
        if let Some(max_rounds) = self.config.max_rounds
            && max_rounds == 0
        {
            bail!("config.max_rounds must be > 0");
        }
        if let Some(step_timeout_ms) = self.config.step_timeout_ms
            && step_timeout_ms == 0
        {
            bail!("config.step_timeout_ms must be > 0");
        }
        if self.checks.is_empty() {
            bail!("checks must be a non-empty array");
        }
        for (index, check) in self.checks.iter().enumerate() {
            check
                .validate()
                .with_context(|| format!("checks[{}] invalid", index))?;
        }
        Ok(())
    }
}

impl Check {
    fn validate(&self) -> Result<()> {
        if let Check::MinPassRate { value } = self
            && !(0.0..=1.0).contains(value)
        {
            bail!("min_pass_rate.value must be within [0, 1]");
        }
        Ok(())
    }
}

/// Discover and load all case files from a directory.
///
/// Returns cases sorted by id. Errors if duplicate ids are found.
pub fn discover_cases(dir: &Path) -> Result<Vec<CaseFile>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut cases = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read cases dir {}", dir.display()))? {
        let entry = entry.context("read case entry")?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("toml") {
            continue;
        }
        cases.push(CaseFile::load(&path)?);
    }
    cases.sort_by(|left, right| left.case.id.cmp(&right.case.id));
    for pair in cases.windows(2) {
        if pair[0].case.id == pair[1].case.id {
            return Err(anyhow!("duplicate case.id {}", pair[0].case.id));
        }
    }
    Ok(cases)
}

fn validate_case_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        bail!("case.id must be non-empty");
    }
    if id.contains('/') || id.contains('\\') {
        bail!("case.id must not contain path separators");
    }
    if id.contains("..") {
        bail!("case.id must not contain '..'");
    }
    if !id
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '_')
    {
        bail!("case.id must use [a-z0-9_-] only");
    }
    Ok(())
}
