//! Install repository backed by a YAML file.
//!
//! ```yaml
//! activities:
//!   - uuid: 5b3c6a7e-52b1-4d84-8d7e-2f3b0c1f9a10
//!     identifying_name: com.example.kiosk
//!     version: 1.2.0
//!     activity_type: web
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::domain::InstalledLiveActivity;

use super::LiveActivityRepository;

#[derive(Debug, Default, Serialize, Deserialize)]
struct RepositoryFile {
    #[serde(default)]
    activities: Vec<InstalledLiveActivity>,
}

/// In-memory install repository, optionally loaded from YAML
#[derive(Debug, Default)]
pub struct YamlLiveActivityRepository {
    activities: RwLock<BTreeMap<Uuid, InstalledLiveActivity>>,
}

impl YamlLiveActivityRepository {
    /// Create an empty repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a repository file; a missing file gives an empty repository
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "No install repository file, starting empty");
            return Ok(Self::new());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read install repository: {}", path.display()))?;

        Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse install repository: {}", path.display()))
    }

    /// Parse repository YAML
    pub fn from_yaml(content: &str) -> Result<Self> {
        let file: RepositoryFile = serde_yaml::from_str(content)?;
        let repository = Self::new();
        for activity in file.activities {
            repository.insert(activity);
        }
        Ok(repository)
    }

    /// Record an installed activity, replacing any previous record
    pub fn insert(&self, activity: InstalledLiveActivity) {
        self.activities.write().insert(activity.uuid, activity);
    }

    /// Forget an installed activity
    pub fn remove(&self, uuid: Uuid) -> Option<InstalledLiveActivity> {
        self.activities.write().remove(&uuid)
    }
}

impl LiveActivityRepository for YamlLiveActivityRepository {
    fn installed_activity(&self, uuid: Uuid) -> Option<InstalledLiveActivity> {
        self.activities.read().get(&uuid).cloned()
    }

    fn all_installed_activities(&self) -> Vec<InstalledLiveActivity> {
        self.activities.read().values().cloned().collect()
    }
}
