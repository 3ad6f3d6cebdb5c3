//! Main entry point for the orchestrator binary
//!
//! Wires the real service implementations into the orchestrator and exposes
//! the control surface: run (resume or begin), status and preview.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;

use orchestrator::config::{
    parse_job_parameters, DEFAULT_COMFY_URL, DEFAULT_DELAY_MS, DEFAULT_JOB_TIMEOUT_SECS, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_MAX_UPLOAD_KB, DEFAULT_PROMPT_NODE, DEFAULT_STORAGE_TTL_DAYS,
};
use orchestrator::services::{ComfyClient, HttpStorageClient, LedgerLayout, RealFileSystem, SqliteProgressStore};
use orchestrator::{
    CombinationSpace, Orchestrator, OrchestratorConfig, OrchestratorError, OrchestratorResult, ProgressStore, RunOutcome,
    RunPolicy, Theme,
};
use shared::{component_debug, component_info, component_warn, logging, Component, StatusCounts};

/// Resumable image-generation sweep over every combination of a theme
#[derive(Parser)]
#[command(name = "orchestrator")]
#[command(about = "Generates one image per category combination, resuming from a SQLite ledger")]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// ComfyUI base URL
    #[arg(long, env = "COMFY_URL", default_value = DEFAULT_COMFY_URL, global = true)]
    pub comfy_url: String,

    /// Workflow graph in ComfyUI API format
    #[arg(long, env = "COMFY_WORKFLOW", default_value = "workflow.json", global = true)]
    pub workflow: PathBuf,

    /// Workflow node whose inputs.text receives the prompt
    #[arg(long, env = "COMFY_PROMPT_NODE", default_value = DEFAULT_PROMPT_NODE, global = true)]
    pub prompt_node: String,

    /// Extra workflow input, repeatable (e.g. --set 3.seed=42)
    #[arg(long = "set", value_name = "NODE.INPUT=VALUE", global = true)]
    pub set: Vec<String>,

    /// Give up on a job after this many seconds (0 waits forever)
    #[arg(long, env = "COMFY_JOB_TIMEOUT_SECS", default_value_t = DEFAULT_JOB_TIMEOUT_SECS, global = true)]
    pub job_timeout_secs: u64,

    /// Progress ledger file
    #[arg(long, env = "LEDGER_PATH", default_value = "generations.db", global = true)]
    pub ledger: PathBuf,

    /// Directory for generated artifacts
    #[arg(long, env = "OUTPUT_DIR", default_value = "output", global = true)]
    pub output_dir: PathBuf,

    /// Theme JSON file (defaults to the built-in crypto cats)
    #[arg(long, env = "THEME_FILE", global = true)]
    pub theme: Option<PathBuf>,

    /// Artifacts above this size are kept locally only
    #[arg(long, env = "MAX_UPLOAD_KB", default_value_t = DEFAULT_MAX_UPLOAD_KB, global = true)]
    pub max_upload_kb: u64,

    /// Pause between iterations
    #[arg(long, env = "ITERATION_DELAY_MS", default_value_t = DEFAULT_DELAY_MS, global = true)]
    pub delay_ms: u64,

    /// Generation attempts per combination before it is skipped for good
    #[arg(long, env = "MAX_ATTEMPTS", default_value_t = DEFAULT_MAX_ATTEMPTS, global = true)]
    pub max_attempts: u32,

    /// Never upload, only write artifacts locally
    #[arg(long, env = "UPLOAD_DISABLED", global = true)]
    pub no_upload: bool,

    /// Entity storage gateway base URL
    #[arg(long, env = "STORAGE_URL", global = true)]
    pub storage_url: Option<String>,

    /// Bearer token for the storage gateway
    #[arg(long, env = "STORAGE_TOKEN", hide_env_values = true, global = true)]
    pub storage_token: Option<String>,

    /// Lifetime of stored entities
    #[arg(long, env = "STORAGE_TTL_DAYS", default_value_t = DEFAULT_STORAGE_TTL_DAYS, global = true)]
    pub storage_ttl_days: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,
}

#[derive(Subcommand, Clone)]
pub enum Command {
    /// Resume or begin the sweep (default)
    Run,
    /// Print ledger counts against the size of the space
    Status,
    /// Show the space and a few rendered prompts
    Preview {
        /// Number of prompts to render from the start of the space
        #[arg(long, default_value_t = 5)]
        count: u64,
        /// Render this single index instead
        #[arg(long)]
        index: Option<u64>,
    },
}

impl Args {
    fn load_theme(&self) -> OrchestratorResult<Theme> {
        match &self.theme {
            Some(path) => Theme::load(path),
            None => Ok(Theme::crypto_cats()),
        }
    }

    fn to_config(&self, theme: &Theme) -> OrchestratorResult<OrchestratorConfig> {
        let policy = RunPolicy {
            upload_enabled: !self.no_upload,
            upload_size_threshold: self.max_upload_kb.saturating_mul(1024),
            iteration_delay: Duration::from_millis(self.delay_ms),
            app_tag: theme.app_tag.clone(),
            output_prefix: theme.output_prefix.clone(),
            job_parameters: parse_job_parameters(&self.set)?,
        };

        Ok(OrchestratorConfig {
            comfy_url: self.comfy_url.clone(),
            workflow_path: self.workflow.clone(),
            prompt_node: self.prompt_node.clone(),
            job_timeout: (self.job_timeout_secs > 0).then(|| Duration::from_secs(self.job_timeout_secs)),
            ledger_path: self.ledger.clone(),
            output_dir: self.output_dir.clone(),
            max_attempts: self.max_attempts,
            theme_path: self.theme.clone(),
            storage_url: self.storage_url.clone().filter(|url| !url.trim().is_empty()),
            storage_token: self.storage_token.clone(),
            storage_ttl_days: self.storage_ttl_days,
            policy,
        })
    }
}

#[tokio::main]
async fn main() -> OrchestratorResult<()> {
    // Pick up a local .env before clap reads the environment
    let _ = dotenv::dotenv();
    let args = Args::parse();

    logging::init_tracing(Some(&args.log_level));

    let theme = args.load_theme()?;
    let space = theme.space()?;
    let config = args.to_config(&theme)?;
    let layout = LedgerLayout {
        signature: theme.layout_signature()?,
        space_size: space.size(),
    };

    match args.command.clone().unwrap_or(Command::Run) {
        Command::Preview { count, index } => preview(&theme, &space, count, index),
        Command::Status => status(&config, layout).await,
        Command::Run => run(config, space, layout).await,
    }
}

async fn run(config: OrchestratorConfig, space: CombinationSpace, layout: LedgerLayout) -> OrchestratorResult<()> {
    config.validate()?;
    logging::log_startup(
        Component::Orchestrator,
        &format!("sweep against {} with ledger {}", config.comfy_url, config.ledger_path.display()),
    );

    let ledger = SqliteProgressStore::open(&config.ledger_path, layout, config.max_attempts)?;
    let generator = ComfyClient::from_file(
        &config.comfy_url,
        &config.workflow_path,
        config.prompt_node.clone(),
        config.job_timeout,
    )?;
    generator.check_parameters(&config.policy.job_parameters)?;

    let storage = match &config.storage_url {
        Some(url) if config.policy.upload_enabled => Some(HttpStorageClient::new(
            url,
            config.storage_token.clone(),
            config.storage_ttl(),
        )?),
        _ => None,
    };
    if storage.is_none() {
        component_info!(Component::Storage, "📴 Uploads disabled, artifacts stay local");
    }
    let file_system = RealFileSystem::with_base_dir(&config.output_dir);

    let mut orchestrator = Orchestrator::new(config.policy.clone(), space, generator, storage, ledger, file_system);

    // Set up graceful shutdown
    let shutdown_sender = orchestrator.get_shutdown_sender();
    tokio::spawn(forward_stop_signals(shutdown_sender));

    match orchestrator.run().await? {
        RunOutcome::Drained => logging::log_success(Component::Orchestrator, "Every combination has been processed"),
        RunOutcome::Stopped => logging::log_success(Component::Orchestrator, "Stopped gracefully, rerun to resume"),
    }
    Ok(())
}

async fn status(config: &OrchestratorConfig, layout: LedgerLayout) -> OrchestratorResult<()> {
    let counts = if ledger_exists(&config.ledger_path) {
        let ledger = SqliteProgressStore::open(&config.ledger_path, layout, config.max_attempts)?;
        ledger.count_by_status().await?
    } else {
        component_debug!(Component::Ledger, "No ledger at {}, nothing started yet", config.ledger_path.display());
        StatusCounts {
            space_size: layout.space_size,
            pending: layout.space_size,
            ..StatusCounts::default()
        }
    };

    println!("Ledger:       {}", config.ledger_path.display());
    println!("Space size:   {}", counts.space_size);
    println!("Completed:    {}", counts.completed);
    println!("Pending:      {}", counts.pending);
    println!("In progress:  {}", counts.in_progress);
    println!("Failed:       {} ({} out of attempts)", counts.failed, counts.retries_exhausted);
    println!("Remaining:    {}", counts.remaining());
    println!("Progress:     {:.2}%", counts.completion_percent());
    Ok(())
}

fn preview(theme: &Theme, space: &CombinationSpace, count: u64, index: Option<u64>) -> OrchestratorResult<()> {
    println!("Theme '{}' ({}): {} combinations", theme.name, theme.app_tag, space.size());
    for category in space.categories() {
        println!("  {:<14} {:>3} values", category.name, category.values.len());
    }
    println!();

    match index {
        Some(index) => {
            let prompt = space.render_index(index).ok_or_else(|| OrchestratorError::SpaceError {
                message: format!("index {index} is outside a space of {}", space.size()),
            })?;
            println!("#{index}: {prompt}");
        }
        None => {
            let count = usize::try_from(count).unwrap_or(usize::MAX);
            for combination in space.iter().take(count) {
                println!("#{}: {}", combination.index, space.render(&combination));
            }
        }
    }
    Ok(())
}

fn ledger_exists(path: &Path) -> bool {
    path.try_exists().unwrap_or(false)
}

/// First signal requests a graceful stop, a second one exits immediately
async fn forward_stop_signals(shutdown_sender: mpsc::Sender<()>) {
    let mut received = 0u32;
    loop {
        match wait_for_stop_signal().await {
            Ok(name) => {
                received += 1;
                if received > 1 {
                    component_warn!(Component::Orchestrator, "⛔ Second {} received, exiting without waiting", name);
                    std::process::exit(130);
                }
                logging::log_shutdown(Component::Orchestrator, &format!("Received {name}, finishing current step"));
                let _ = shutdown_sender.try_send(());
            }
            Err(err) => {
                logging::log_error(Component::Orchestrator, "Signal handling", &err);
                return;
            }
        }
    }
}

#[cfg(unix)]
async fn wait_for_stop_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal as unix_signal, SignalKind};

    let mut terminate = unix_signal(SignalKind::terminate())?;
    tokio::select! {
        result = signal::ctrl_c() => result.map(|_| "Ctrl+C"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_stop_signal() -> std::io::Result<&'static str> {
    signal::ctrl_c().await.map(|_| "Ctrl+C")
}
