//! Orchestrator-specific error types

use shared::{ProgressStatus, SharedError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Ledger {operation} failed: {message}")]
    PersistenceError { operation: String, message: String },

    #[error("Ledger transition rejected for index {index}: {from} -> {to}")]
    InvalidTransition {
        index: u64,
        from: ProgressStatus,
        to: ProgressStatus,
    },

    #[error("Ledger was written for layout '{stored}' but the current space is '{current}'")]
    LayoutMismatch { stored: String, current: String },

    #[error("Generation failed: {message}")]
    GenerationError { message: String },

    #[error("Upload failed: {message}")]
    UploadError { message: String },

    #[error("File system operation failed: {operation} on {path}: {message}")]
    FileSystemError {
        operation: String,
        path: String,
        message: String,
    },

    #[error("Configuration error: {field}")]
    ConfigurationError { field: String },

    #[error("Combination space error: {message}")]
    SpaceError { message: String },

    #[error("Invalid asset attributes: {message}")]
    AttributeError { message: String },

    #[error("Shared component error: {0}")]
    SharedError(#[from] SharedError),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl OrchestratorError {
    pub fn config(field: impl Into<String>) -> Self {
        Self::ConfigurationError { field: field.into() }
    }

    pub fn persistence(operation: impl Into<String>, message: impl ToString) -> Self {
        Self::PersistenceError {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    pub fn generation(message: impl Into<String>) -> Self {
        Self::GenerationError { message: message.into() }
    }

    pub fn upload(message: impl Into<String>) -> Self {
        Self::UploadError { message: message.into() }
    }

    /// Fatal errors abort the run; the rest are absorbed per iteration
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            OrchestratorError::GenerationError { .. }
                | OrchestratorError::UploadError { .. }
                | OrchestratorError::AttributeError { .. }
        )
    }
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
