//! Real file system service implementation
//!
//! Writes generated artifacts into the output directory. The directory is
//! created on first write; existing files with the same name are replaced so a
//! retried index never leaves two artifacts behind.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::traits::FileSystem;
use shared::{component_debug, Component};

/// Real file system implementation
pub struct RealFileSystem {
    /// Base directory for all artifacts
    base_dir: PathBuf,
}

impl RealFileSystem {
    /// Create new file system service (outputs to ./output folder)
    pub fn new() -> Self {
        Self {
            base_dir: PathBuf::from("./output"),
        }
    }

    /// Create with custom base directory
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn artifact_path(&self, file_name: &str) -> OrchestratorResult<PathBuf> {
        // Names come from our own prefix + index, but never let one escape the directory
        let name = Path::new(file_name);
        if file_name.is_empty() || name.components().count() != 1 || name.file_name().is_none() {
            return Err(fs_error("resolve artifact path", &self.base_dir.join(file_name), "not a plain file name"));
        }
        Ok(self.base_dir.join(name))
    }
}

impl Default for RealFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileSystem for RealFileSystem {
    async fn write_artifact(&self, file_name: &str, bytes: &[u8]) -> OrchestratorResult<PathBuf> {
        let path = self.artifact_path(file_name)?;

        fs::create_dir_all(&self.base_dir)
            .await
            .map_err(|e| fs_error("create output directory", &self.base_dir, e))?;

        // Write to a sibling temp file first so a crash never leaves a torn artifact
        let staging = path.with_extension("partial");
        fs::write(&staging, bytes)
            .await
            .map_err(|e| fs_error("write artifact", &staging, e))?;
        fs::rename(&staging, &path)
            .await
            .map_err(|e| fs_error("finalize artifact", &path, e))?;

        component_debug!(Component::Orchestrator, "💾 Wrote {} ({} bytes)", path.display(), bytes.len());
        Ok(path)
    }
}

fn fs_error(operation: &str, path: &Path, message: impl ToString) -> OrchestratorError {
    OrchestratorError::FileSystemError {
        operation: operation.to_string(),
        path: path.display().to_string(),
        message: message.to_string(),
    }
}
