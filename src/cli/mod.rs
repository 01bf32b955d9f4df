//! Command-line interface for the live activity runtime.
//!
//! Provides commands for showing configuration, listing installed
//! activities and running the runtime against commands read from stdin.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapters::{
    CompositeStatusPublisher, JsonlStatusPublisher, LiveActivityRepository,
    LoggingAlertStatusManager, LoggingStatusPublisher, SimpleLiveActivityConfigurationManager,
    SimpleLiveActivityStorageManager, SimpleRunnerSampler, StatusPublisher,
    YamlLiveActivityRepository,
};
use crate::config::{self, RuntimeConfig};
use crate::core::{LiveActivityRuntime, RuntimeComponents, WrapperFactoryRegistry};

/// liveactivity - Node-local live activity lifecycle runtime
#[derive(Parser, Debug)]
#[command(name = "liveactivity")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show resolved configuration
    Config,

    /// List installed live activities
    List,

    /// Run the runtime, reading commands from stdin
    Run {
        /// Seconds between health samples of running activities
        #[arg(long, default_value = "10", env = "LIVEACTIVITY_SAMPLE_SECS")]
        sample_interval: u64,
    },
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Config => show_config(),
            Commands::List => list_activities(),
            Commands::Run { sample_interval } => run(sample_interval).await,
        }
    }
}

/// A command read from stdin
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCommand {
    Startup(Uuid),
    Shutdown(Uuid),
    Activate(Uuid),
    Deactivate(Uuid),
    Status(Uuid),
    CleanTmp(Uuid),
    CleanData(Uuid),
    Configure(Uuid, HashMap<String, String>),
}

impl RuntimeCommand {
    /// Parse `<verb> <uuid> [key=value...]`
    pub fn parse(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let verb = words.next().context("Empty command")?;
        let uuid: Uuid = words
            .next()
            .with_context(|| format!("Missing uuid for '{}'", verb))?
            .parse()
            .context("Invalid uuid")?;
        let rest: Vec<&str> = words.collect();

        if verb != "configure" && !rest.is_empty() {
            bail!("Unexpected arguments for '{}': {}", verb, rest.join(" "));
        }

        let command = match verb {
            "startup" => Self::Startup(uuid),
            "shutdown" => Self::Shutdown(uuid),
            "activate" => Self::Activate(uuid),
            "deactivate" => Self::Deactivate(uuid),
            "status" => Self::Status(uuid),
            "clean-tmp" => Self::CleanTmp(uuid),
            "clean-data" => Self::CleanData(uuid),
            "configure" => {
                let mut update = HashMap::new();
                for pair in rest {
                    let (key, value) = pair
                        .split_once('=')
                        .with_context(|| format!("Expected key=value, got '{}'", pair))?;
                    update.insert(key.to_string(), value.to_string());
                }
                Self::Configure(uuid, update)
            }
            other => bail!("Unknown command: {}", other),
        };

        Ok(command)
    }

    /// Hand the command to the runtime
    pub async fn dispatch(self, runtime: &LiveActivityRuntime) {
        match self {
            Self::Startup(uuid) => runtime.startup_live_activity(uuid).await,
            Self::Shutdown(uuid) => runtime.shutdown_live_activity(uuid).await,
            Self::Activate(uuid) => runtime.activate_live_activity(uuid).await,
            Self::Deactivate(uuid) => runtime.deactivate_live_activity(uuid).await,
            Self::Status(uuid) => runtime.status_live_activity(uuid).await,
            Self::CleanTmp(uuid) => runtime.clean_live_activity_tmp_data(uuid).await,
            Self::CleanData(uuid) => runtime.clean_live_activity_permanent_data(uuid).await,
            Self::Configure(uuid, update) => runtime.configure_live_activity(uuid, update).await,
        }
    }
}

/// Show resolved configuration
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("Live Activity Runtime Configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:            {}", cfg.home.display());
    println!("  Activities:      {}", cfg.activities_dir().display());
    println!("  Repository:      {}", cfg.repository_path().display());
    println!("  Status journal:  {}", cfg.status_journal_path().display());
    println!();
    println!("Runtime:");
    println!("  Lock wait slice: {}ms", cfg.lock_wait_ms);
    println!("  Factory retries: {}", cfg.factory_retries);
    println!("  Retry delay:     {}ms", cfg.factory_retry_delay_ms);

    Ok(())
}

/// List installed live activities
fn list_activities() -> Result<()> {
    let cfg = config::config()?;
    let repository = YamlLiveActivityRepository::from_file(&cfg.repository_path())?;
    let activities = repository.all_installed_activities();

    if activities.is_empty() {
        println!("No live activities installed");
        return Ok(());
    }

    println!("{:<38} {:<30} {:<10} {:<10}", "UUID", "NAME", "VERSION", "TYPE");
    println!("{}", "-".repeat(90));
    for activity in &activities {
        println!(
            "{:<38} {:<30} {:<10} {:<10}",
            activity.uuid,
            activity.display_name(),
            activity.version,
            activity.activity_type.as_deref().unwrap_or("-")
        );
    }
    println!("\nTotal: {} activities", activities.len());

    Ok(())
}

/// Build the runtime from configuration
async fn build_runtime(cfg: &RuntimeConfig, sampler: Arc<SimpleRunnerSampler>) -> Result<LiveActivityRuntime> {
    let repository = YamlLiveActivityRepository::from_file(&cfg.repository_path())?;
    let journal = JsonlStatusPublisher::open(cfg.status_journal_path()).await?;

    let components = RuntimeComponents {
        repository: Arc::new(repository),
        storage: Arc::new(SimpleLiveActivityStorageManager::new(cfg.activities_dir())),
        configuration_manager: Arc::new(SimpleLiveActivityConfigurationManager::new()),
        factories: Arc::new(WrapperFactoryRegistry::new().with_retry_policy(cfg.factory_retry_policy())),
        publisher: Arc::new(CompositeStatusPublisher::new(vec![
            Arc::new(LoggingStatusPublisher) as Arc<dyn StatusPublisher>,
            Arc::new(journal),
        ])),
        sampler,
        alerts: Arc::new(LoggingAlertStatusManager),
    };

    Ok(LiveActivityRuntime::with_lock_wait(components, cfg.lock_wait()))
}

/// Run the runtime until stdin closes
async fn run(sample_interval: u64) -> Result<()> {
    let cfg = config::config()?;
    let sampler = Arc::new(SimpleRunnerSampler::new());
    let runtime = build_runtime(cfg, Arc::clone(&sampler)).await?;
    runtime.startup();

    let sampling = tokio::spawn(sample_periodically(
        sampler,
        Duration::from_secs(sample_interval.max(1)),
    ));

    info!(
        installed = runtime.installed_activities().len(),
        "Reading live activity commands from stdin"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match RuntimeCommand::parse(line) {
            Ok(command) => {
                debug!(?command, "Dispatching command");
                command.dispatch(&runtime).await;
                runtime.flush_events().await;
            }
            Err(e) => warn!(error = %e, line, "Ignoring command"),
        }
    }

    info!("Input closed, shutting down live activities");
    runtime.shutdown_all_activities().await;
    runtime.flush_events().await;
    runtime.shutdown().await;
    sampling.abort();

    Ok(())
}

async fn sample_periodically(sampler: Arc<SimpleRunnerSampler>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        let sampler = Arc::clone(&sampler);
        match tokio::task::spawn_blocking(move || sampler.sample_all()).await {
            Ok(samples) => debug!(count = samples.len(), "Sampled running live activities"),
            Err(e) => warn!(error = %e, "Live activity sampling failed"),
        }
    }
}
