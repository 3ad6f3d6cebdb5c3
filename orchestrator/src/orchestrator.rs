//! Main orchestrator implementation
//!
//! Drives one combination at a time through claim, generate, persist, upload
//! and record, using injected services for every side effect. Resumption is
//! entirely a function of what the ledger says; the orchestrator itself keeps
//! no state between processes.

use tokio::sync::mpsc;

use shared::logging::{self, excerpt};
use shared::{component_debug, component_error, component_info, component_warn, Component, ProgressRecord, StatusCounts};

use crate::config::RunPolicy;
use crate::core::{
    content_type_for, AssetAttributes, Combination, CombinationSpace, Phase, RunOutcome, RunStats, StepOutcome,
    UploadSkip,
};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::traits::{Artifact, FileSystem, GenerationClient, GenerationOutcome, ProgressStore, StorageClient};

const PROMPT_LOG_CHARS: usize = 80;

/// Result of the only suspension point in an iteration
enum Waited {
    Finished(OrchestratorResult<GenerationOutcome>),
    Interrupted,
}

/// Sweep orchestrator over a combination space
pub struct Orchestrator<G, S, L, F>
where
    G: GenerationClient + Send + Sync + 'static,
    S: StorageClient + Send + Sync + 'static,
    L: ProgressStore + Send + Sync + 'static,
    F: FileSystem + Send + Sync + 'static,
{
    policy: RunPolicy,
    space: CombinationSpace,

    /// Injected services
    generator: G,
    storage: Option<S>,
    ledger: L,
    file_system: F,

    phase: Phase,
    stats: RunStats,

    /// Last index claimed in the current pass
    cursor: Option<u64>,
    /// Completed count from the ledger, kept current locally
    completed: Option<u64>,
    stop_requested: bool,

    /// Shutdown signal
    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl<G, S, L, F> Orchestrator<G, S, L, F>
where
    G: GenerationClient + Send + Sync + 'static,
    S: StorageClient + Send + Sync + 'static,
    L: ProgressStore + Send + Sync + 'static,
    F: FileSystem + Send + Sync + 'static,
{
    /// Create new orchestrator with injected dependencies
    ///
    /// Uploads happen only when the policy enables them *and* a storage client
    /// is supplied.
    pub fn new(
        policy: RunPolicy,
        space: CombinationSpace,
        generator: G,
        storage: Option<S>,
        ledger: L,
        file_system: F,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        Self {
            policy,
            space,
            generator,
            storage,
            ledger,
            file_system,
            phase: Phase::Idle,
            stats: RunStats::new(),
            cursor: None,
            completed: None,
            stop_requested: false,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Get shutdown sender for external shutdown requests
    pub fn get_shutdown_sender(&self) -> mpsc::Sender<()> {
        self.shutdown_tx.clone()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn space(&self) -> &CombinationSpace {
        &self.space
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Ledger counts against the full space
    pub async fn progress(&self) -> OrchestratorResult<StatusCounts> {
        self.ledger.count_by_status().await
    }

    /// Resume or begin the sweep and keep going until drained or stopped
    pub async fn run(&mut self) -> OrchestratorResult<RunOutcome> {
        let recovered = self.ledger.recover_interrupted().await?;
        self.stats.recovered = recovered;

        let counts = self.ledger.count_by_status().await?;
        self.completed = Some(counts.completed);
        logging::log_startup(
            Component::Orchestrator,
            &format!("sweep over {} combinations: {}", self.space.size(), counts),
        );

        let outcome = loop {
            let step = match self.step().await {
                Ok(step) => step,
                Err(err) => {
                    component_error!(Component::Orchestrator, "💥 Aborting run in phase {}: {}", self.phase, err);
                    return Err(err);
                }
            };
            match step {
                StepOutcome::Drained => break RunOutcome::Drained,
                StepOutcome::Stopped | StepOutcome::Abandoned { .. } => break RunOutcome::Stopped,
                StepOutcome::Completed { .. } | StepOutcome::Failed { .. } => {
                    if self.pause().await {
                        self.transition(Phase::Stopping);
                        break RunOutcome::Stopped;
                    }
                }
            }
        };

        let counts = self.ledger.count_by_status().await?;
        logging::log_progress(
            Component::Orchestrator,
            &format!("Run finished after {:.1}s", self.stats.elapsed_seconds()),
            &format!(
                "{} claimed, {} completed, {} failed, {} uploaded, {} recovered",
                self.stats.claimed, self.stats.completed, self.stats.failed, self.stats.uploaded, self.stats.recovered
            ),
        );
        match outcome {
            RunOutcome::Drained => {
                logging::log_success(Component::Orchestrator, &format!("Space exhausted: {counts}"));
            }
            RunOutcome::Stopped => {
                logging::log_shutdown(Component::Orchestrator, &format!("stop requested, progress saved: {counts}"));
            }
        }

        Ok(outcome)
    }

    /// Drive a single iteration of the state machine
    ///
    /// Errors returned from here are fatal; transient generation and upload
    /// problems are absorbed into the returned outcome.
    pub async fn step(&mut self) -> OrchestratorResult<StepOutcome> {
        match self.phase {
            Phase::Drained => return Ok(StepOutcome::Drained),
            Phase::Stopping => return Ok(StepOutcome::Stopped),
            _ => {}
        }
        if self.stop_signalled() {
            self.transition(Phase::Stopping);
            return Ok(StepOutcome::Stopped);
        }

        self.transition(Phase::Claiming);
        let Some(record) = self.claim().await? else {
            self.transition(Phase::Drained);
            return Ok(StepOutcome::Drained);
        };
        self.cursor = Some(record.index);

        let outcome = self.process(record).await?;
        self.stats.record(&outcome);
        Ok(outcome)
    }

    /// Claim in ascending order, wrapping once to pick up failures behind the cursor
    async fn claim(&mut self) -> OrchestratorResult<Option<ProgressRecord>> {
        if let Some(record) = self.ledger.claim_next(self.cursor).await? {
            return Ok(Some(record));
        }
        if self.cursor.take().is_some() {
            return self.ledger.claim_next(None).await;
        }
        Ok(None)
    }

    async fn process(&mut self, record: ProgressRecord) -> OrchestratorResult<StepOutcome> {
        let index = record.index;
        let combination = self.space.decode(index).ok_or_else(|| OrchestratorError::SpaceError {
            message: format!("ledger handed out index {index} outside a space of {}", self.space.size()),
        })?;
        let prompt = self.space.render(&combination);

        let completed = self.completed_so_far().await?;
        component_info!(
            Component::Orchestrator,
            "🎨 [{}/{}] #{} (attempt {}) {}",
            completed + 1,
            self.space.size(),
            index,
            record.attempts,
            excerpt(&prompt, PROMPT_LOG_CHARS)
        );

        self.transition(Phase::Generating);
        let job = match self.generator.submit(&prompt, &self.policy.job_parameters).await {
            Ok(job) => job,
            Err(err) if !err.is_fatal() => return self.record_failure(index, err.to_string()).await,
            Err(err) => return Err(err),
        };

        self.transition(Phase::Waiting);
        let waited = tokio::select! {
            result = self.generator.await_result(&job) => Waited::Finished(result),
            _ = self.shutdown_rx.recv() => Waited::Interrupted,
        };

        let artifact = match waited {
            Waited::Interrupted => {
                self.stop_requested = true;
                self.generator.abandon(&job).await;
                self.transition(Phase::Stopping);
                component_warn!(
                    Component::Orchestrator,
                    "🛑 Stop requested while #{} was generating; job {} abandoned, index will be reclaimed",
                    index,
                    job
                );
                return Ok(StepOutcome::Abandoned { index });
            }
            Waited::Finished(Ok(GenerationOutcome::Success(artifact))) => artifact,
            Waited::Finished(Ok(GenerationOutcome::Failure { reason })) => {
                return self.record_failure(index, reason).await;
            }
            Waited::Finished(Err(err)) if !err.is_fatal() => return self.record_failure(index, err.to_string()).await,
            Waited::Finished(Err(err)) => return Err(err),
        };

        let file_name = format!("{}_{}.{}", self.policy.output_prefix, index, artifact.extension());
        let path = self.file_system.write_artifact(&file_name, &artifact.bytes).await?;
        let artifact_ref = path.display().to_string();

        let (storage_ref, upload_skip) = self.upload(&combination, &artifact, &file_name).await;

        self.transition(Phase::Recording);
        self.ledger.mark_completed(index, &artifact_ref, storage_ref.clone()).await?;
        self.completed = Some(completed + 1);

        match &storage_ref {
            Some(reference) => component_info!(
                Component::Orchestrator,
                "✅ #{} saved to {} and stored as {}",
                index,
                artifact_ref,
                reference
            ),
            None => component_info!(Component::Orchestrator, "✅ #{} saved to {}", index, artifact_ref),
        }
        self.transition(Phase::Idle);

        Ok(StepOutcome::Completed {
            index,
            artifact_ref,
            storage_ref,
            upload_skip,
        })
    }

    /// Best-effort upload; never fails the iteration
    async fn upload(
        &mut self,
        combination: &Combination,
        artifact: &Artifact,
        file_name: &str,
    ) -> (Option<String>, Option<UploadSkip>) {
        if !self.policy.upload_enabled || self.storage.is_none() {
            return (None, Some(UploadSkip::Disabled));
        }

        let size = artifact.size();
        let threshold = self.policy.upload_size_threshold;
        if size > threshold {
            component_info!(
                Component::Storage,
                "📦 Skipping upload of #{}: {} KB exceeds the {} KB limit",
                combination.index,
                size / 1024,
                threshold / 1024
            );
            return (None, Some(UploadSkip::TooLarge { size, threshold }));
        }

        self.transition(Phase::Uploading);
        let attributes = AssetAttributes::for_combination(&self.policy.app_tag, &self.space, combination);
        let result = match (&self.storage, attributes.validate()) {
            (_, Err(err)) => Err(err),
            (Some(storage), Ok(())) => storage.upload(&artifact.bytes, content_type_for(file_name), &attributes).await,
            (None, Ok(())) => return (None, Some(UploadSkip::Disabled)),
        };

        match result {
            Ok(storage_ref) => {
                component_debug!(Component::Storage, "☁️  Uploaded #{} ({} bytes)", combination.index, size);
                (Some(storage_ref), None)
            }
            Err(err) => {
                logging::log_error(Component::Storage, &format!("Upload of #{} failed", combination.index), &err);
                (None, Some(UploadSkip::Failed { reason: err.to_string() }))
            }
        }
    }

    async fn record_failure(&mut self, index: u64, reason: String) -> OrchestratorResult<StepOutcome> {
        self.transition(Phase::Recording);
        let record = self.ledger.mark_failed(index, &reason).await?;
        let max_attempts = self.ledger.max_attempts();

        if record.retries_exhausted(max_attempts) {
            component_warn!(
                Component::Orchestrator,
                "💀 #{} failed on attempt {}/{}, giving up: {}",
                index,
                record.attempts,
                max_attempts,
                reason
            );
        } else {
            component_warn!(
                Component::Orchestrator,
                "⚠️ #{} failed on attempt {}/{}, will retry: {}",
                index,
                record.attempts,
                max_attempts,
                reason
            );
        }
        self.transition(Phase::Idle);

        Ok(StepOutcome::Failed {
            index,
            attempts: record.attempts,
            reason,
        })
    }

    async fn completed_so_far(&mut self) -> OrchestratorResult<u64> {
        if let Some(completed) = self.completed {
            return Ok(completed);
        }
        let completed = self.ledger.count_by_status().await?.completed;
        self.completed = Some(completed);
        Ok(completed)
    }

    /// Inter-iteration delay; true when a stop arrived meanwhile
    async fn pause(&mut self) -> bool {
        if self.stop_signalled() {
            return true;
        }
        if self.policy.iteration_delay.is_zero() {
            return false;
        }

        let interrupted = tokio::select! {
            _ = tokio::time::sleep(self.policy.iteration_delay) => false,
            _ = self.shutdown_rx.recv() => true,
        };
        if interrupted {
            self.stop_requested = true;
        }
        interrupted
    }

    fn stop_signalled(&mut self) -> bool {
        if !self.stop_requested && self.shutdown_rx.try_recv().is_ok() {
            self.stop_requested = true;
        }
        self.stop_requested
    }

    fn transition(&mut self, next: Phase) {
        if !self.phase.can_transition_to(next) {
            component_warn!(Component::Orchestrator, "⚠️ Unexpected phase change {} -> {}", self.phase, next);
        }
        component_debug!(Component::Orchestrator, "🔄 {} -> {}", self.phase, next);
        self.phase = next;
    }
}
