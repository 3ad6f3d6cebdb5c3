//! Resumable sweep orchestrator for image generation
//!
//! Walks the full cartesian product of a theme's categories in a stable
//! order, generates one image per combination through a ComfyUI backend,
//! optionally uploads small artifacts to an entity store and records every
//! step in a SQLite ledger so a restarted process picks up where the last
//! one stopped.

pub mod config;
pub mod core;
pub mod error;
pub mod orchestrator;
pub mod services;
pub mod traits;

// Re-export commonly used types
pub use config::{OrchestratorConfig, RunPolicy};
pub use core::{AssetAttributes, CategorySpec, Combination, CombinationSpace, Phase, RunOutcome, StepOutcome, Theme};
pub use error::{OrchestratorError, OrchestratorResult};
pub use orchestrator::Orchestrator;
pub use traits::{Artifact, FileSystem, GenerationClient, GenerationOutcome, JobId, JobParameters, ProgressStore, StorageClient};
