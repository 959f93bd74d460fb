//! Orchestrator configuration (TOML).

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::agents::executor::DEFAULT_MIN_GROUNDING_SCORE;
use crate::agents::planner::DEFAULT_RETRY_BUDGET;

/// Session configuration.
///
/// This file is intended to be edited by humans. Missing fields fall back to
/// the defaults below.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QaConfig {
    pub planner: PlannerConfig,
    pub executor: ExecutorConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PlannerConfig {
    /// Adaptations allowed per subgoal before it fails terminally.
    pub retry_budget: u32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            retry_budget: DEFAULT_RETRY_BUDGET,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Grounding score an element must exceed.
    pub min_grounding_score: u32,
    /// Per device call timeout in milliseconds.
    pub step_timeout_ms: u64,
    /// Truncate driver stdout/stderr beyond this many bytes.
    pub driver_output_limit_bytes: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            min_grounding_score: DEFAULT_MIN_GROUNDING_SCORE,
            step_timeout_ms: 10_000,
            driver_output_limit_bytes: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    /// Upper bound on loop rounds (one action each).
    pub max_rounds: u32,
    /// Total wall-clock budget in seconds.
    pub timeout_secs: u64,
    /// Stop the session at the first terminal subgoal failure.
    pub stop_on_terminal_failure: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_rounds: 200,
            timeout_secs: 10 * 60,
            stop_on_terminal_failure: true,
        }
    }
}

impl QaConfig {
    pub fn validate(&self) -> Result<()> {
        if self.executor.step_timeout_ms == 0 {
            return Err(anyhow!("executor.step_timeout_ms must be > 0"));
        }
        if self.executor.driver_output_limit_bytes == 0 {
            return Err(anyhow!("executor.driver_output_limit_bytes must be > 0"));
        }
        if self.session.max_rounds == 0 {
            return Err(anyhow!("session.max_rounds must be > 0"));
        }
        if self.session.timeout_secs == 0 {
            return Err(anyhow!("session.timeout_secs must be > 0"));
        }
        Ok(())
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.executor.step_timeout_ms)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session.timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `QaConfig::default()`.
pub fn load_config(path: &Path) -> Result<QaConfig> {
    if !path.exists() {
        let cfg = QaConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: QaConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &QaConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = render_config(cfg)?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, buf).with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

pub fn render_config(cfg: &QaConfig) -> Result<String> {
    toml::to_string_pretty(cfg).context("serialize config toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, QaConfig::default());
        assert_eq!(cfg.planner.retry_budget, 2);
        assert!(cfg.session.stop_on_terminal_failure);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested/qa.toml");
        let cfg = QaConfig {
            planner: PlannerConfig { retry_budget: 4 },
            ..QaConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_tables() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("qa.toml");
        fs::write(&path, "[session]\nmax_rounds = 12\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.session.max_rounds, 12);
        assert_eq!(cfg.session.timeout_secs, 600);
        assert_eq!(cfg.executor, ExecutorConfig::default());
    }

    #[test]
    fn zero_step_timeout_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("qa.toml");
        fs::write(&path, "[executor]\nstep_timeout_ms = 0\n").expect("write");
        let err = load_config(&path).expect_err("invalid");
        assert!(format!("{err:#}").contains("step_timeout_ms must be > 0"));
    }
}
