//! Orchestrator state machine
//!
//! Pure phase/transition bookkeeping. The orchestrator moves through
//! `Idle → Claiming → Generating → Waiting → (Uploading) → Recording → Idle`
//! until it reaches `Drained` or `Stopping`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Named phases of one orchestration iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Idle,
    Claiming,
    Generating,
    Waiting,
    Uploading,
    Recording,
    Drained,
    Stopping,
}

impl Phase {
    /// Whether the machine may move from `self` to `next`
    pub fn can_transition_to(self, next: Phase) -> bool {
        use Phase::*;

        // A stop request is honored from any live phase
        if next == Stopping {
            return !matches!(self, Drained | Stopping);
        }

        matches!(
            (self, next),
            (Idle, Claiming)
                | (Claiming, Generating)
                | (Claiming, Drained)
                | (Generating, Waiting)
                | (Generating, Recording)
                | (Waiting, Uploading)
                | (Waiting, Recording)
                | (Uploading, Recording)
                | (Recording, Idle)
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Claiming => "claiming",
            Phase::Generating => "generating",
            Phase::Waiting => "waiting",
            Phase::Uploading => "uploading",
            Phase::Recording => "recording",
            Phase::Drained => "drained",
            Phase::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Why an upload did not produce a storage reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadSkip {
    Disabled,
    TooLarge { size: u64, threshold: u64 },
    Failed { reason: String },
}

/// Result of driving a single claimed combination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Completed {
        index: u64,
        artifact_ref: String,
        storage_ref: Option<String>,
        upload_skip: Option<UploadSkip>,
    },
    Failed {
        index: u64,
        attempts: u32,
        reason: String,
    },
    /// Stop requested while the job was in flight; the record stays claimed
    Abandoned { index: u64 },
    /// Nothing left to claim
    Drained,
    /// Stop observed before claiming
    Stopped,
}

/// How a whole run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Drained,
    Stopped,
}

/// Counters for the current run
#[derive(Debug, Clone)]
pub struct RunStats {
    pub started: Instant,
    pub claimed: u64,
    pub completed: u64,
    pub failed: u64,
    pub uploaded: u64,
    pub upload_skipped: u64,
    pub recovered: u64,
}

impl RunStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            claimed: 0,
            completed: 0,
            failed: 0,
            uploaded: 0,
            upload_skipped: 0,
            recovered: 0,
        }
    }

    pub fn record(&mut self, outcome: &StepOutcome) {
        match outcome {
            StepOutcome::Completed { storage_ref, .. } => {
                self.claimed += 1;
                self.completed += 1;
                if storage_ref.is_some() {
                    self.uploaded += 1;
                } else {
                    self.upload_skipped += 1;
                }
            }
            StepOutcome::Failed { .. } => {
                self.claimed += 1;
                self.failed += 1;
            }
            StepOutcome::Abandoned { .. } => self.claimed += 1,
            StepOutcome::Drained | StepOutcome::Stopped => {}
        }
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}
