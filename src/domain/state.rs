//! Activity states and the status records produced by activities.
//!
//! Every live activity reports an [`ActivityStatus`]. Runners cache the last
//! one they saw and the runtime publishes them outward.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a live activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityState {
    /// State cannot be determined
    Unknown,

    /// The activity is not installed on this node
    DoesntExist,

    /// A deployment is in progress
    DeployAttempt,

    /// The deployment failed
    DeployFailure,

    /// Installed and ready to start
    Ready,

    /// Startup is in progress
    StartupAttempt,

    /// Startup failed
    StartupFailure,

    /// Started, not activated
    Running,

    /// Activation is in progress
    ActivateAttempt,

    /// Activation failed; the instance is still running
    ActivateFailure,

    /// Started and activated
    Active,

    /// Deactivation is in progress
    DeactivateAttempt,

    /// Deactivation failed; the instance is still running
    DeactivateFailure,

    /// Shutdown is in progress
    ShutdownAttempt,

    /// Shutdown failed
    ShutdownFailure,

    /// The activity died on its own
    Crashed,
}

impl ActivityState {
    /// Whether an instance is alive in this state
    pub fn is_running(self) -> bool {
        matches!(
            self,
            Self::Running
                | Self::ActivateAttempt
                | Self::ActivateFailure
                | Self::Active
                | Self::DeactivateAttempt
                | Self::DeactivateFailure
                | Self::ShutdownAttempt
        )
    }

    /// Whether this state reports a failure
    pub fn is_error(self) -> bool {
        matches!(
            self,
            Self::DeployFailure
                | Self::StartupFailure
                | Self::ActivateFailure
                | Self::DeactivateFailure
                | Self::ShutdownFailure
                | Self::Crashed
        )
    }

    /// Whether an operation is still in flight
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::DeployAttempt
                | Self::StartupAttempt
                | Self::ActivateAttempt
                | Self::DeactivateAttempt
                | Self::ShutdownAttempt
        )
    }
}

impl fmt::Display for ActivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "UNKNOWN",
            Self::DoesntExist => "DOESNT_EXIST",
            Self::DeployAttempt => "DEPLOY_ATTEMPT",
            Self::DeployFailure => "DEPLOY_FAILURE",
            Self::Ready => "READY",
            Self::StartupAttempt => "STARTUP_ATTEMPT",
            Self::StartupFailure => "STARTUP_FAILURE",
            Self::Running => "RUNNING",
            Self::ActivateAttempt => "ACTIVATE_ATTEMPT",
            Self::ActivateFailure => "ACTIVATE_FAILURE",
            Self::Active => "ACTIVE",
            Self::DeactivateAttempt => "DEACTIVATE_ATTEMPT",
            Self::DeactivateFailure => "DEACTIVATE_FAILURE",
            Self::ShutdownAttempt => "SHUTDOWN_ATTEMPT",
            Self::ShutdownFailure => "SHUTDOWN_FAILURE",
            Self::Crashed => "CRASHED",
        };
        f.write_str(name)
    }
}

impl Default for ActivityState {
    fn default() -> Self {
        Self::Unknown
    }
}

/// A status report for a live activity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityStatus {
    /// The state the activity is in
    pub state: ActivityState,

    /// Human-readable detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Rendered error chain if the status carries a failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActivityStatus {
    /// Create a status with no description or error
    pub fn new(state: ActivityState) -> Self {
        Self {
            state,
            description: None,
            error: None,
        }
    }

    /// The status of an installed activity that is not running
    pub fn ready() -> Self {
        Self::new(ActivityState::Ready)
    }

    /// The status of a started activity
    pub fn running() -> Self {
        Self::new(ActivityState::Running)
    }

    /// The status of an activated activity
    pub fn active() -> Self {
        Self::new(ActivityState::Active)
    }

    /// The status published for uuids unknown to the install repository
    pub fn doesnt_exist() -> Self {
        Self::new(ActivityState::DoesntExist).with_description("Activity does not exist")
    }

    /// Attach a description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Attach an error, keeping its full context chain
    pub fn with_error(mut self, error: &anyhow::Error) -> Self {
        self.error = Some(format!("{:#}", error));
        self
    }
}

impl Default for ActivityStatus {
    fn default() -> Self {
        Self::ready()
    }
}

impl fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.state)?;
        if let Some(ref description) = self.description {
            write!(f, " ({})", description)?;
        }
        if let Some(ref error) = self.error {
            write!(f, ": {}", error)?;
        }
        Ok(())
    }
}
