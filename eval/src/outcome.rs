use serde::{Deserialize, Serialize};

use crate::judge::Judgment;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Fail,
    Error,
}

/// `None` judgment means the session itself errored before producing a report.
pub fn classify_outcome(judgment: Option<&Judgment>) -> Outcome {
    match judgment {
        Some(judgment) if judgment.all_passed() => Outcome::Success,
        Some(_) => Outcome::Fail,
        None => Outcome::Error,
    }
}
