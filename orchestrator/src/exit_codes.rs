//! Stable exit codes for `qa` commands.

/// Command succeeded; for `qa run`, the session completed.
pub const OK: i32 = 0;
/// Invalid input (empty goal, bad config or scenario) or any other error.
pub const INVALID: i32 = 1;
/// `qa run` finished with a failed session.
pub const FAILED: i32 = 3;
/// `qa run` was cancelled or ran out of time.
pub const CANCELLED: i32 = 4;
