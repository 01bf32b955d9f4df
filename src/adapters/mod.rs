//! Collaborator interfaces for the systems around the runtime.
//!
//! The runtime never talks to disk, the network or the master directly.
//! Everything outside the lifecycle core sits behind one of these traits,
//! with simple implementations provided for standalone use.

pub mod alert;
pub mod configuration;
pub mod publisher;
pub mod repository;
pub mod sampler;
pub mod storage;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::core::LiveActivityRunner;
use crate::domain::{ActivityStatus, InstalledLiveActivity};

pub use alert::LoggingAlertStatusManager;
pub use configuration::{SimpleLiveActivityConfiguration, SimpleLiveActivityConfigurationManager};
pub use publisher::{
    CompositeStatusPublisher, JsonlStatusPublisher, LoggingStatusPublisher, PublishedStatus,
};
pub use repository::YamlLiveActivityRepository;
pub use sampler::SimpleRunnerSampler;
pub use storage::{SimpleLiveActivityFilesystem, SimpleLiveActivityStorageManager};

/// Configuration key naming the activity type
pub const CONFIGURATION_ACTIVITY_TYPE: &str = "activity.type";

/// Configuration key for the install directory
pub const CONFIGURATION_DIR_INSTALL: &str = "activity.dir.install";

/// Configuration key for the log directory
pub const CONFIGURATION_DIR_LOG: &str = "activity.dir.log";

/// Configuration key for the permanent data directory
pub const CONFIGURATION_DIR_DATA: &str = "activity.dir.data";

/// Configuration key for the temporary data directory
pub const CONFIGURATION_DIR_TMP: &str = "activity.dir.tmp";

/// Directories owned by one live activity
pub trait LiveActivityFilesystem: Send + Sync {
    /// Where the activity package is installed
    fn install_directory(&self) -> &Path;

    /// Where the activity writes logs
    fn log_directory(&self) -> &Path;

    /// Data kept across restarts
    fn permanent_data_directory(&self) -> &Path;

    /// Scratch data
    fn temp_data_directory(&self) -> &Path;

    /// Runtime bookkeeping for the activity
    fn internal_directory(&self) -> &Path;
}

/// Configuration for one live activity
pub trait LiveActivityConfiguration: Send + Sync {
    /// (Re)load from the backing store
    fn load(&self) -> Result<()>;

    /// Merge and persist an update
    fn update(&self, update: &HashMap<String, String>) -> Result<()>;

    /// Look up a value
    fn get(&self, key: &str) -> Option<String>;

    /// Set a value for this process only
    fn set_value(&self, key: &str, value: String);
}

/// Creates configurations for live activities
pub trait LiveActivityConfigurationManager: Send + Sync {
    /// Build the configuration for an activity
    fn new_configuration(
        &self,
        activity: &InstalledLiveActivity,
        filesystem: &Arc<dyn LiveActivityFilesystem>,
    ) -> Arc<dyn LiveActivityConfiguration>;
}

/// Owns the on-disk areas of live activities
pub trait LiveActivityStorageManager: Send + Sync {
    /// Filesystem for an activity
    fn activity_filesystem(&self, uuid: Uuid) -> Result<Arc<dyn LiveActivityFilesystem>>;

    /// Remove everything in the activity's temporary data directory
    fn clean_tmp_data(&self, uuid: Uuid) -> Result<()>;

    /// Remove everything in the activity's permanent data directory
    fn clean_permanent_data(&self, uuid: Uuid) -> Result<()>;
}

/// The local install repository
pub trait LiveActivityRepository: Send + Sync {
    /// Look up an installed activity
    fn installed_activity(&self, uuid: Uuid) -> Option<InstalledLiveActivity>;

    /// Every installed activity
    fn all_installed_activities(&self) -> Vec<InstalledLiveActivity>;
}

/// Sends activity statuses to whoever is watching the node
#[async_trait]
pub trait StatusPublisher: Send + Sync {
    /// Publish a status for an activity
    async fn publish(&self, uuid: Uuid, status: &ActivityStatus) -> Result<()>;
}

/// Escalates error statuses
#[async_trait]
pub trait AlertStatusManager: Send + Sync {
    /// Announce the runner's current (error) status
    async fn announce(&self, runner: &LiveActivityRunner) -> Result<()>;
}

/// Periodic health sampling of running activities
pub trait RunnerSampler: Send + Sync {
    /// Start watching a runner that just came up
    fn start_sampling(&self, runner: Arc<LiveActivityRunner>);
}
