//! Test helpers and builder patterns for orchestrator tests
//!
//! Scripted fakes stand in for the generation and storage backends; the
//! ledger and artifact directory are the real implementations on a temp dir.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use orchestrator::services::{LedgerLayout, RealFileSystem, SqliteProgressStore};
use orchestrator::{
    Artifact, AssetAttributes, CombinationSpace, GenerationClient, GenerationOutcome, JobId, JobParameters, Orchestrator,
    OrchestratorError, OrchestratorResult, RunPolicy, StepOutcome, StorageClient,
};

use super::fixtures::TestFixtures;

pub type TestOrchestrator = Orchestrator<ScriptedGenerator, RecordingStorage, SqliteProgressStore, RealFileSystem>;

/// Generation backend that answers from a script
///
/// Clones share state, so a test can keep one handle and move the other into
/// the orchestrator.
#[derive(Clone, Default)]
pub struct ScriptedGenerator {
    /// Prompts for which the job fails
    failing_prompts: Arc<Vec<String>>,
    reject_submissions: bool,
    hang: bool,
    artifact_size: usize,
    file_name: Arc<String>,
    submitted: Arc<Mutex<Vec<String>>>,
    abandoned: Arc<Mutex<Vec<JobId>>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self {
            artifact_size: 64,
            file_name: Arc::new("ComfyUI_00001_.png".to_string()),
            ..Self::default()
        }
    }

    pub fn failing_on(mut self, prompts: &[String]) -> Self {
        self.failing_prompts = Arc::new(prompts.to_vec());
        self
    }

    pub fn rejecting_submissions(mut self) -> Self {
        self.reject_submissions = true;
        self
    }

    /// Jobs never finish; only a stop request gets the orchestrator out
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn with_artifact_size(mut self, size: usize) -> Self {
        self.artifact_size = size;
        self
    }

    pub fn with_file_name(mut self, name: &str) -> Self {
        self.file_name = Arc::new(name.to_string());
        self
    }

    pub fn submitted(&self) -> Vec<String> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn abandoned(&self) -> Vec<JobId> {
        self.abandoned.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationClient for ScriptedGenerator {
    async fn submit(&self, prompt: &str, _parameters: &JobParameters) -> OrchestratorResult<JobId> {
        if self.reject_submissions {
            return Err(OrchestratorError::generation("backend refused the prompt"));
        }
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(prompt.to_string());
        Ok(JobId(format!("{}|{}", submitted.len(), prompt)))
    }

    async fn await_result(&self, job_id: &JobId) -> OrchestratorResult<GenerationOutcome> {
        if self.hang {
            return std::future::pending().await;
        }
        let prompt = job_id.as_str().split_once('|').map(|(_, p)| p).unwrap_or_default();
        if self.failing_prompts.iter().any(|p| p == prompt) {
            return Ok(GenerationOutcome::Failure {
                reason: format!("scripted failure for '{prompt}'"),
            });
        }
        Ok(GenerationOutcome::Success(Artifact {
            bytes: TestFixtures::png_bytes(self.artifact_size),
            file_name: self.file_name.to_string(),
        }))
    }

    async fn abandon(&self, job_id: &JobId) {
        self.abandoned.lock().unwrap().push(job_id.clone());
    }
}

/// One upload seen by [`RecordingStorage`]
#[derive(Debug, Clone)]
pub struct RecordedUpload {
    pub size: usize,
    pub content_type: String,
    pub attributes: AssetAttributes,
}

/// Storage backend that remembers every upload and can be told to fail
#[derive(Clone, Default)]
pub struct RecordingStorage {
    fail: bool,
    uploads: Arc<Mutex<Vec<RecordedUpload>>>,
}

impl RecordingStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn uploads(&self) -> Vec<RecordedUpload> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl StorageClient for RecordingStorage {
    async fn upload(
        &self,
        artifact: &[u8],
        content_type: &str,
        attributes: &AssetAttributes,
    ) -> OrchestratorResult<String> {
        self.uploads.lock().unwrap().push(RecordedUpload {
            size: artifact.len(),
            content_type: content_type.to_string(),
            attributes: attributes.clone(),
        });
        if self.fail {
            return Err(OrchestratorError::upload("gateway unavailable"));
        }
        Ok(format!("entity-{}", attributes.id))
    }
}

/// Temp directory holding a ledger file and the artifact output directory
pub struct TestWorkspace {
    dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.dir.path().join("generations.db")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.dir.path().join("output")
    }

    /// Open the ledger the way a fresh process would
    pub fn open_ledger(&self, space: &CombinationSpace) -> SqliteProgressStore {
        let layout = LedgerLayout {
            signature: format!("test:{}", space.layout_signature()),
            space_size: space.size(),
        };
        SqliteProgressStore::open(self.ledger_path(), layout, TestFixtures::MAX_ATTEMPTS).unwrap()
    }
}

/// Builder pattern for creating test orchestrators with sensible defaults
pub struct OrchestratorBuilder<'a> {
    workspace: &'a TestWorkspace,
    space: CombinationSpace,
    policy: RunPolicy,
    generator: ScriptedGenerator,
    storage: Option<RecordingStorage>,
}

impl<'a> OrchestratorBuilder<'a> {
    pub fn new(workspace: &'a TestWorkspace) -> Self {
        Self {
            workspace,
            space: TestFixtures::small_space(),
            policy: TestFixtures::policy(),
            generator: ScriptedGenerator::new(),
            storage: Some(RecordingStorage::new()),
        }
    }

    pub fn with_space(mut self, space: CombinationSpace) -> Self {
        self.space = space;
        self
    }

    pub fn with_policy<F>(mut self, setup: F) -> Self
    where
        F: FnOnce(&mut RunPolicy),
    {
        setup(&mut self.policy);
        self
    }

    pub fn with_generator(mut self, generator: ScriptedGenerator) -> Self {
        self.generator = generator;
        self
    }

    pub fn with_storage(mut self, storage: RecordingStorage) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn without_storage(mut self) -> Self {
        self.storage = None;
        self
    }

    pub fn build(self) -> TestOrchestrator {
        let ledger = self.workspace.open_ledger(&self.space);
        let file_system = RealFileSystem::with_base_dir(self.workspace.output_dir());
        Orchestrator::new(self.policy, self.space, self.generator, self.storage, ledger, file_system)
    }
}

/// Common test helper functions
pub struct TestHelpers;

impl TestHelpers {
    /// Drive `count` iterations and return their outcomes
    pub async fn steps(orchestrator: &mut TestOrchestrator, count: usize) -> Vec<StepOutcome> {
        let mut outcomes = Vec::with_capacity(count);
        for _ in 0..count {
            outcomes.push(orchestrator.step().await.unwrap());
        }
        outcomes
    }

    pub fn completed_index(outcome: &StepOutcome) -> Option<u64> {
        match outcome {
            StepOutcome::Completed { index, .. } => Some(*index),
            _ => None,
        }
    }
}
