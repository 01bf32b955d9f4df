//! Metadata for activities installed on this node.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A live activity known to the local install repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstalledLiveActivity {
    /// Stable identifier used by every command
    pub uuid: Uuid,

    /// Identifying name of the activity package
    pub identifying_name: String,

    /// Version of the activity package
    pub version: String,

    /// Name shown in diagnostics
    #[serde(default)]
    pub display_name: Option<String>,

    /// Activity type, optionally with a `;range` suffix
    #[serde(default)]
    pub activity_type: Option<String>,

    /// When the activity was installed
    #[serde(default = "Utc::now")]
    pub installed_at: DateTime<Utc>,
}

impl InstalledLiveActivity {
    /// Create a record for a freshly installed activity
    pub fn new(uuid: Uuid, identifying_name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            uuid,
            identifying_name: identifying_name.into(),
            version: version.into(),
            display_name: None,
            activity_type: None,
            installed_at: Utc::now(),
        }
    }

    /// Set the activity type
    pub fn with_type(mut self, activity_type: impl Into<String>) -> Self {
        self.activity_type = Some(activity_type.into());
        self
    }

    /// Set the display name
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    /// Display name, falling back to the identifying name
    pub fn display_name(&self) -> &str {
        self.display_name
            .as_deref()
            .unwrap_or(&self.identifying_name)
    }
}
