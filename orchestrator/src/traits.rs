//! Trait definitions with mockall annotations for testing
//!
//! These are the seams between the orchestrator and everything that performs
//! I/O: the progress ledger, the generation backend, the storage backend and
//! the local artifact directory.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::core::AssetAttributes;
use crate::error::OrchestratorResult;
use shared::{ProgressRecord, StatusCounts};

/// Extra backend parameters for one job (e.g. `"3.seed" -> "42"`)
pub type JobParameters = BTreeMap<String, String>;

/// Identifier of a job submitted to the generation backend
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobId(pub String);

impl JobId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Artifact bytes produced by a successful job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    /// File name reported by the backend, used for the extension
    pub file_name: String,
}

impl Artifact {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn extension(&self) -> &str {
        std::path::Path::new(&self.file_name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("png")
    }
}

/// Terminal status of a generation job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    Success(Artifact),
    Failure { reason: String },
}

/// Progress ledger keyed by combination index
///
/// Every error returned here is fatal to the run.
#[mockall::automock]
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Claim the lowest claimable index at or after `after_index + 1`
    ///
    /// Claimable means never observed, PENDING, or FAILED with attempts below
    /// the limit. The record becomes IN_PROGRESS with attempts incremented.
    async fn claim_next(&self, after_index: Option<u64>) -> OrchestratorResult<Option<ProgressRecord>>;

    /// IN_PROGRESS -> COMPLETED; repeating with identical arguments is a no-op
    async fn mark_completed(
        &self,
        index: u64,
        artifact_ref: &str,
        storage_ref: Option<String>,
    ) -> OrchestratorResult<ProgressRecord>;

    /// IN_PROGRESS -> FAILED, keeping any earlier artifact reference
    async fn mark_failed(&self, index: u64, reason: &str) -> OrchestratorResult<ProgressRecord>;

    /// Return records left IN_PROGRESS by an earlier process to PENDING
    ///
    /// The interrupted claim does not count against the attempt limit.
    async fn recover_interrupted(&self) -> OrchestratorResult<u64>;

    /// Point lookup
    async fn get(&self, index: u64) -> OrchestratorResult<Option<ProgressRecord>>;

    /// Counts per status against the full space
    async fn count_by_status(&self) -> OrchestratorResult<StatusCounts>;

    /// Attempts after which a failed index is no longer claimable
    fn max_attempts(&self) -> u32;
}

/// Generation backend abstraction
#[mockall::automock]
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Submit one prompt; a submission error counts as a failed generation
    async fn submit(&self, prompt: &str, parameters: &JobParameters) -> OrchestratorResult<JobId>;

    /// Suspend until the job reaches a terminal status
    async fn await_result(&self, job_id: &JobId) -> OrchestratorResult<GenerationOutcome>;

    /// Release whatever the client holds for a job nobody will wait on
    async fn abandon(&self, job_id: &JobId);
}

/// Durable storage backend abstraction
#[mockall::automock]
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Store an artifact and return its durable reference
    async fn upload(
        &self,
        artifact: &[u8],
        content_type: &str,
        attributes: &AssetAttributes,
    ) -> OrchestratorResult<String>;
}

/// Local artifact directory abstraction
#[mockall::automock]
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Persist artifact bytes under `file_name` and return the written path
    async fn write_artifact(&self, file_name: &str, bytes: &[u8]) -> OrchestratorResult<PathBuf>;
}
