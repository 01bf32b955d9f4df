//! Layered per-activity configuration.
//!
//! Lookup order (highest priority first):
//! 1. Values injected by the runtime at instance initialization
//! 2. Live updates pushed by the master (`<internal>/live.yaml`)
//! 3. The base configuration shipped with the activity (`<install>/activity.yaml`)

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::domain::InstalledLiveActivity;

use super::{LiveActivityConfiguration, LiveActivityConfigurationManager, LiveActivityFilesystem};

/// Base configuration file name inside the install directory
pub const BASE_CONFIGURATION_FILE: &str = "activity.yaml";

/// Live configuration file name inside the internal directory
pub const LIVE_CONFIGURATION_FILE: &str = "live.yaml";

#[derive(Debug, Default)]
struct Layers {
    base: BTreeMap<String, String>,
    live: BTreeMap<String, String>,
    injected: BTreeMap<String, String>,
}

/// Configuration backed by a base file and a persisted live layer
#[derive(Debug)]
pub struct SimpleLiveActivityConfiguration {
    base_path: PathBuf,
    live_path: PathBuf,
    layers: RwLock<Layers>,
}

impl SimpleLiveActivityConfiguration {
    /// Create a configuration reading from the given files
    pub fn new(base_path: impl Into<PathBuf>, live_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            live_path: live_path.into(),
            layers: RwLock::new(Layers::default()),
        }
    }

    /// Create a configuration inside an activity filesystem
    pub fn for_filesystem(filesystem: &dyn LiveActivityFilesystem) -> Self {
        Self::new(
            filesystem.install_directory().join(BASE_CONFIGURATION_FILE),
            filesystem.internal_directory().join(LIVE_CONFIGURATION_FILE),
        )
    }

    /// A configuration with no backing files, seeded with `values`
    pub fn in_memory<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let config = Self::new(PathBuf::new(), PathBuf::new());
        config.layers.write().base = values
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        config
    }

    /// Snapshot of every resolved value
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        let layers = self.layers.read();
        let mut resolved = layers.base.clone();
        resolved.extend(layers.live.clone());
        resolved.extend(layers.injected.clone());
        resolved
    }

    fn write_live(&self, live: &BTreeMap<String, String>) -> Result<()> {
        if self.live_path.as_os_str().is_empty() {
            return Ok(());
        }

        if let Some(parent) = self.live_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let content = serde_yaml::to_string(live).context("Failed to serialize live configuration")?;
        std::fs::write(&self.live_path, content).with_context(|| {
            format!("Failed to write live configuration: {}", self.live_path.display())
        })
    }
}

/// Read a flat YAML map; a missing file is an empty map
fn read_layer(path: &Path, name: &str) -> Result<Option<BTreeMap<String, String>>> {
    if path.as_os_str().is_empty() {
        return Ok(None);
    }

    if !path.exists() {
        warn!(path = %path.display(), "Skipping missing {} configuration file", name);
        return Ok(Some(BTreeMap::new()));
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read configuration file: {}", path.display()))?;

    if content.trim().is_empty() {
        return Ok(Some(BTreeMap::new()));
    }

    let raw: BTreeMap<String, serde_yaml::Value> = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse configuration file: {}", path.display()))?;

    let mut values = BTreeMap::new();
    for (key, value) in raw {
        values.insert(key, scalar_to_string(value)?);
    }

    info!(path = %path.display(), "Using {} configuration file", name);
    Ok(Some(values))
}

fn scalar_to_string(value: serde_yaml::Value) -> Result<String> {
    use serde_yaml::Value;

    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Ok(String::new()),
        other => anyhow::bail!("Configuration values must be scalars, found {:?}", other),
    }
}

impl LiveActivityConfiguration for SimpleLiveActivityConfiguration {
    fn load(&self) -> Result<()> {
        let base = read_layer(&self.base_path, "base")?;
        let live = read_layer(&self.live_path, "live")?;

        let mut layers = self.layers.write();
        if let Some(base) = base {
            layers.base = base;
        }
        if let Some(live) = live {
            layers.live = live;
        }
        Ok(())
    }

    fn update(&self, update: &HashMap<String, String>) -> Result<()> {
        let live = {
            let mut layers = self.layers.write();
            layers
                .live
                .extend(update.iter().map(|(k, v)| (k.clone(), v.clone())));
            layers.live.clone()
        };

        debug!(keys = update.len(), "Persisting live configuration update");
        self.write_live(&live)
    }

    fn get(&self, key: &str) -> Option<String> {
        let layers = self.layers.read();
        layers
            .injected
            .get(key)
            .or_else(|| layers.live.get(key))
            .or_else(|| layers.base.get(key))
            .cloned()
    }

    fn set_value(&self, key: &str, value: String) {
        self.layers.write().injected.insert(key.to_string(), value);
    }
}

/// Builds [`SimpleLiveActivityConfiguration`]s inside each activity filesystem
#[derive(Debug, Clone, Default)]
pub struct SimpleLiveActivityConfigurationManager;

impl SimpleLiveActivityConfigurationManager {
    /// Create a configuration manager
    pub fn new() -> Self {
        Self
    }
}

impl LiveActivityConfigurationManager for SimpleLiveActivityConfigurationManager {
    fn new_configuration(
        &self,
        _activity: &InstalledLiveActivity,
        filesystem: &Arc<dyn LiveActivityFilesystem>,
    ) -> Arc<dyn LiveActivityConfiguration> {
        Arc::new(SimpleLiveActivityConfiguration::for_filesystem(filesystem.as_ref()))
    }
}
