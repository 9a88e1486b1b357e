//! Per-task outcomes recorded by the batch.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyExists,
}

/// Result of one (dataset, year) task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FetchOutcome {
    Skipped { reason: SkipReason },
    Succeeded,
    Failed { error: String },
    /// Dry run: the artifact is missing and would have been fetched.
    Planned,
}

impl FetchOutcome {
    pub fn already_exists() -> Self {
        FetchOutcome::Skipped {
            reason: SkipReason::AlreadyExists,
        }
    }

    pub fn failed(error: impl std::fmt::Display) -> Self {
        FetchOutcome::Failed {
            error: error.to_string(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, FetchOutcome::Failed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            FetchOutcome::Skipped { .. } => "skipped",
            FetchOutcome::Succeeded => "succeeded",
            FetchOutcome::Failed { .. } => "failed",
            FetchOutcome::Planned => "planned",
        }
    }
}

impl std::fmt::Display for FetchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchOutcome::Failed { error } => write!(f, "failed: {}", error),
            other => write!(f, "{}", other.label()),
        }
    }
}
