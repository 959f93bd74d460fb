//! Session configuration merging.
//!
//! Applies case-specific overrides to the default session configuration.

use anyhow::Result;
use orchestrator::io::config::QaConfig;

use crate::case::CaseConfig;

/// Apply case configuration overrides to the base session config.
pub fn apply_case_config(mut base: QaConfig, overrides: &CaseConfig) -> Result<QaConfig> {
    if let Some(retry_budget) = overrides.retry_budget {
        base.planner.retry_budget = retry_budget;
    }
    if let Some(max_rounds) = overrides.max_rounds {
        base.session.max_rounds = max_rounds;
    }
    if let Some(step_timeout_ms) = overrides.step_timeout_ms {
        base.executor.step_timeout_ms = step_timeout_ms;
    }
    if let Some(stop) = overrides.stop_on_terminal_failure {
        base.session.stop_on_terminal_failure = stop;
    }
    base.validate()?;
    Ok(base)
}
