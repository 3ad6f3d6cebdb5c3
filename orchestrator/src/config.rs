//! Run configuration
//!
//! `OrchestratorConfig` is everything the binary needs to wire services
//! together; `RunPolicy` is the part handed to the orchestrator itself.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::traits::JobParameters;

pub const DEFAULT_COMFY_URL: &str = "http://127.0.0.1:8188";
pub const DEFAULT_PROMPT_NODE: &str = "6";
pub const DEFAULT_MAX_UPLOAD_KB: u64 = 117;
pub const DEFAULT_DELAY_MS: u64 = 2000;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_JOB_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_STORAGE_TTL_DAYS: u64 = 128;

/// Policy parameters consumed by the orchestration loop
#[derive(Debug, Clone, PartialEq)]
pub struct RunPolicy {
    pub upload_enabled: bool,
    /// Artifacts larger than this many bytes are never uploaded
    pub upload_size_threshold: u64,
    pub iteration_delay: Duration,
    pub app_tag: String,
    pub output_prefix: String,
    pub job_parameters: JobParameters,
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            upload_enabled: true,
            upload_size_threshold: DEFAULT_MAX_UPLOAD_KB * 1024,
            iteration_delay: Duration::from_millis(DEFAULT_DELAY_MS),
            app_tag: "CCats".to_string(),
            output_prefix: "cat".to_string(),
            job_parameters: JobParameters::new(),
        }
    }
}

/// Complete configuration of a sweep process
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    pub comfy_url: String,
    pub workflow_path: PathBuf,
    pub prompt_node: String,
    pub job_timeout: Option<Duration>,
    pub ledger_path: PathBuf,
    pub output_dir: PathBuf,
    /// Generation attempts per index, enforced by the ledger
    pub max_attempts: u32,
    pub theme_path: Option<PathBuf>,
    pub storage_url: Option<String>,
    pub storage_token: Option<String>,
    pub storage_ttl_days: u64,
    pub policy: RunPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            comfy_url: DEFAULT_COMFY_URL.to_string(),
            workflow_path: PathBuf::from("workflow.json"),
            prompt_node: DEFAULT_PROMPT_NODE.to_string(),
            job_timeout: Some(Duration::from_secs(DEFAULT_JOB_TIMEOUT_SECS)),
            ledger_path: PathBuf::from("generations.db"),
            output_dir: PathBuf::from("output"),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            theme_path: None,
            storage_url: None,
            storage_token: None,
            storage_ttl_days: DEFAULT_STORAGE_TTL_DAYS,
            policy: RunPolicy::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> OrchestratorResult<()> {
        if self.max_attempts == 0 {
            return Err(OrchestratorError::config("max_attempts must be at least 1"));
        }
        if self.prompt_node.trim().is_empty() {
            return Err(OrchestratorError::config("prompt node id must not be empty"));
        }
        if !(self.comfy_url.starts_with("http://") || self.comfy_url.starts_with("https://")) {
            return Err(OrchestratorError::config(format!(
                "generation endpoint must be an http(s) URL: {}",
                self.comfy_url
            )));
        }
        if self.policy.upload_enabled && self.storage_url.is_none() {
            return Err(OrchestratorError::config(
                "upload is enabled but no storage URL is configured (set STORAGE_URL or pass --no-upload)",
            ));
        }
        Ok(())
    }

    /// Entity lifetime requested from the storage backend
    pub fn storage_ttl(&self) -> Duration {
        Duration::from_secs(self.storage_ttl_days.saturating_mul(24 * 60 * 60))
    }
}

/// Parse `node.input=value` overrides into job parameters
pub fn parse_job_parameters(pairs: &[String]) -> OrchestratorResult<JobParameters> {
    let mut parameters = JobParameters::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| OrchestratorError::config(format!("expected node.input=value, got '{pair}'")))?;
        let key = key.trim();
        if key.split_once('.').map_or(true, |(node, input)| node.is_empty() || input.is_empty()) {
            return Err(OrchestratorError::config(format!(
                "parameter key must look like node.input, got '{key}'"
            )));
        }
        parameters.insert(key.to_string(), value.trim().to_string());
    }
    Ok(parameters)
}
