//! Time budget helpers for the session loop.

use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};

/// Return the remaining time until the session deadline.
pub fn remaining_budget(deadline: Instant) -> Result<Duration> {
    let remaining = deadline
        .checked_duration_since(Instant::now())
        .unwrap_or(Duration::from_secs(0));
    if remaining.is_zero() {
        return Err(anyhow!("session deadline exceeded"));
    }
    Ok(remaining)
}

/// Timeout for one device call: the per-step limit, capped by the session deadline.
pub fn step_budget(deadline: Instant, step_timeout: Duration) -> Result<Duration> {
    Ok(remaining_budget(deadline)?.min(step_timeout))
}
