//! Configuration for the live activity runtime.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (LIVEACTIVITY_HOME)
//! 2. Config file (.liveactivity/config.yaml)
//! 3. Defaults (~/.liveactivity)
//!
//! Config file discovery:
//! - Searches current directory and parents for .liveactivity/config.yaml
//! - A relative `home` is resolved against the .liveactivity/ directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::FactoryRetryPolicy;

/// Environment variable overriding the engine home
pub const HOME_ENV: &str = "LIVEACTIVITY_HOME";

const CONFIG_DIR: &str = ".liveactivity";
const CONFIG_FILE: &str = "config.yaml";

const DEFAULT_LOCK_WAIT_MS: u64 = 20_000;
const DEFAULT_FACTORY_RETRIES: u32 = 5;
const DEFAULT_FACTORY_RETRY_DELAY_MS: u64 = 500;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<RuntimeConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub runtime: RuntimeSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to .liveactivity/)
    pub home: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuntimeSection {
    pub lock_wait_ms: Option<u64>,
    pub factory_retries: Option<u32>,
    pub factory_retry_delay_ms: Option<u64>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Engine state root
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// Instance lock wait slice in milliseconds
    pub lock_wait_ms: u64,
    /// Wrapper factory lookups before giving up
    pub factory_retries: u32,
    /// Pause between wrapper factory lookups in milliseconds
    pub factory_retry_delay_ms: u64,
}

impl RuntimeConfig {
    /// Defaults rooted at `home`
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            config_file: None,
            lock_wait_ms: DEFAULT_LOCK_WAIT_MS,
            factory_retries: DEFAULT_FACTORY_RETRIES,
            factory_retry_delay_ms: DEFAULT_FACTORY_RETRY_DELAY_MS,
        }
    }

    /// Per-activity filesystems ($LIVEACTIVITY_HOME/activities)
    pub fn activities_dir(&self) -> PathBuf {
        self.home.join("activities")
    }

    /// Install repository ($LIVEACTIVITY_HOME/activities.yaml)
    pub fn repository_path(&self) -> PathBuf {
        self.home.join("activities.yaml")
    }

    /// Status journal ($LIVEACTIVITY_HOME/statuses.jsonl)
    pub fn status_journal_path(&self) -> PathBuf {
        self.home.join("statuses.jsonl")
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }

    pub fn factory_retry_policy(&self) -> FactoryRetryPolicy {
        FactoryRetryPolicy {
            attempts: self.factory_retries,
            delay: Duration::from_millis(self.factory_retry_delay_ms),
        }
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Merge a parsed config file over the defaults
fn resolve(
    file: Option<(&Path, ConfigFile)>,
    env_home: Option<PathBuf>,
    default_home: PathBuf,
) -> RuntimeConfig {
    let Some((config_path, file)) = file else {
        return RuntimeConfig::with_home(env_home.unwrap_or(default_home));
    };

    let config_dir = config_path.parent().unwrap_or(Path::new("."));
    let home = env_home
        .or_else(|| file.paths.home.as_deref().map(|h| resolve_path(config_dir, h)))
        .unwrap_or(default_home);

    RuntimeConfig {
        home,
        config_file: Some(config_path.to_path_buf()),
        lock_wait_ms: file.runtime.lock_wait_ms.unwrap_or(DEFAULT_LOCK_WAIT_MS),
        factory_retries: file.runtime.factory_retries.unwrap_or(DEFAULT_FACTORY_RETRIES),
        factory_retry_delay_ms: file
            .runtime
            .factory_retry_delay_ms
            .unwrap_or(DEFAULT_FACTORY_RETRY_DELAY_MS),
    }
}

/// Load configuration from all sources
fn load_config() -> Result<RuntimeConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(CONFIG_DIR);

    let env_home = std::env::var(HOME_ENV).ok().map(PathBuf::from);

    let config = match find_config_file() {
        Some(path) => {
            let file = load_config_file(&path)?;
            resolve(Some((&path, file)), env_home, default_home)
        }
        None => resolve(None, env_home, default_home),
    };

    Ok(config)
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static RuntimeConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<RuntimeConfig> {
    load_config()
}
