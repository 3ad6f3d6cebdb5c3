//! Core shared types: ledger records, status counts and component tags

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::SharedError;

/// Logical component emitting a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Component {
    Orchestrator,
    Ledger,
    Generator,
    Storage,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Orchestrator => write!(f, "orchestrator"),
            Component::Ledger => write!(f, "ledger"),
            Component::Generator => write!(f, "generator"),
            Component::Storage => write!(f, "storage"),
        }
    }
}

/// Lifecycle status of one combination in the progress ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl ProgressStatus {
    pub const ALL: [ProgressStatus; 4] = [
        ProgressStatus::Pending,
        ProgressStatus::InProgress,
        ProgressStatus::Completed,
        ProgressStatus::Failed,
    ];

    /// Column value used by the ledger
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::Pending => "pending",
            ProgressStatus::InProgress => "in_progress",
            ProgressStatus::Completed => "completed",
            ProgressStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProgressStatus {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ProgressStatus::Pending),
            "in_progress" => Ok(ProgressStatus::InProgress),
            "completed" => Ok(ProgressStatus::Completed),
            "failed" => Ok(ProgressStatus::Failed),
            other => Err(SharedError::UnknownStatus {
                value: other.to_string(),
            }),
        }
    }
}

/// One persisted ledger row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub index: u64,
    pub status: ProgressStatus,
    pub attempts: u32,
    pub artifact_ref: Option<String>,
    pub storage_ref: Option<String>,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ProgressRecord {
    /// Fresh record for an index seen for the first time
    pub fn pending(index: u64) -> Self {
        Self {
            index,
            status: ProgressStatus::Pending,
            attempts: 0,
            artifact_ref: None,
            storage_ref: None,
            last_error: None,
            updated_at: Utc::now(),
        }
    }

    /// Whether a FAILED record has used up its attempts
    pub fn retries_exhausted(&self, max_attempts: u32) -> bool {
        self.status == ProgressStatus::Failed && self.attempts >= max_attempts
    }
}

/// Ledger counts by status, measured against the full space
///
/// Indices never observed by the ledger are reported as pending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub space_size: u64,
    pub pending: u64,
    pub in_progress: u64,
    pub completed: u64,
    pub failed: u64,
    /// Subset of `failed` that will never be claimed again
    pub retries_exhausted: u64,
}

impl StatusCounts {
    /// Indices that a future claim could still pick up
    pub fn remaining(&self) -> u64 {
        self.pending + self.in_progress + (self.failed - self.retries_exhausted.min(self.failed))
    }

    pub fn completion_percent(&self) -> f64 {
        if self.space_size == 0 {
            return 0.0;
        }
        self.completed as f64 / self.space_size as f64 * 100.0
    }
}

impl fmt::Display for StatusCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} completed ({:.1}%), {} pending, {} in progress, {} failed ({} exhausted)",
            self.completed,
            self.space_size,
            self.completion_percent(),
            self.pending,
            self.in_progress,
            self.failed,
            self.retries_exhausted
        )
    }
}
