//! The contract between the runtime and user-supplied activity code.
//!
//! An [`ActivityWrapper`] produced by a wrapper factory creates
//! [`Activity`] instances. The runner drives those instances through their
//! lifecycle and the instances report status changes back through the
//! [`ActivityListener`] handed to them at initialization.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::adapters::{LiveActivityConfiguration, LiveActivityFilesystem};

use super::state::ActivityStatus;

/// Receives status changes reported by activity instances.
///
/// Called on whatever thread the activity reports from; implementations must
/// not block.
pub trait ActivityListener: Send + Sync {
    /// An activity moved from `old` to `new`
    fn on_activity_status_change(&self, uuid: Uuid, old: &ActivityStatus, new: &ActivityStatus);
}

/// Engine-specific execution settings handed to a new instance
#[derive(Debug, Clone, Default)]
pub struct ActivityExecutionContext {
    /// Environment variables for engines that launch processes
    pub environment: HashMap<String, String>,
}

/// Everything an instance receives when it is initialized
#[derive(Clone)]
pub struct ActivityContext {
    /// UUID of the live activity
    pub uuid: Uuid,

    /// Directories owned by the activity
    pub filesystem: Arc<dyn LiveActivityFilesystem>,

    /// The activity's configuration
    pub configuration: Arc<dyn LiveActivityConfiguration>,

    /// Execution settings from the wrapper
    pub execution_context: ActivityExecutionContext,

    /// Where status changes must be reported
    pub listener: Arc<dyn ActivityListener>,
}

/// A running piece of application logic.
///
/// Calls arrive one at a time under the owning runner's instance lock.
pub trait Activity: Send + Sync {
    /// Receive filesystem, configuration and the status listener
    fn initialize(&self, context: ActivityContext) -> Result<()>;

    /// Start the activity
    fn startup(&self) -> Result<()>;

    /// Stop the activity
    fn shutdown(&self) -> Result<()>;

    /// Activate a started activity
    fn activate(&self) -> Result<()>;

    /// Deactivate an activated activity
    fn deactivate(&self) -> Result<()>;

    /// Re-check liveness, updating the status if the activity died
    fn check_activity_state(&self);

    /// Current status
    fn activity_status(&self) -> ActivityStatus;

    /// Force a status, notifying the listener
    fn set_activity_status(&self, status: ActivityStatus);

    /// Apply a live configuration update
    fn update_configuration(&self, update: &HashMap<String, String>) -> Result<()>;

    /// Clean up after a failed startup
    fn handle_startup_failure(&self) -> Result<()> {
        Ok(())
    }
}

/// Bridges generic lifecycle calls to one execution engine
pub trait ActivityWrapper: Send + Sync {
    /// Create a fresh, uninitialized instance
    fn new_instance(&self) -> Result<Arc<dyn Activity>>;

    /// Execution settings for the next instance
    fn new_execution_context(&self) -> ActivityExecutionContext {
        ActivityExecutionContext::default()
    }

    /// The wrapper's instance has been shut down
    fn done(&self) {}
}

/// Status storage for activity implementations.
///
/// Holds the current status and notifies the attached listener on every
/// change, which is how instances feed the runtime's event queue.
#[derive(Default)]
pub struct StatusCell {
    status: Mutex<ActivityStatus>,
    listener: Mutex<Option<(Uuid, Arc<dyn ActivityListener>)>>,
}

impl StatusCell {
    /// Create a cell in the READY state
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the listener from an [`ActivityContext`]
    pub fn attach(&self, context: &ActivityContext) {
        *self.listener.lock() = Some((context.uuid, Arc::clone(&context.listener)));
    }

    /// Current status
    pub fn get(&self) -> ActivityStatus {
        self.status.lock().clone()
    }

    /// Replace the status and notify the listener
    pub fn set(&self, status: ActivityStatus) {
        let old = std::mem::replace(&mut *self.status.lock(), status.clone());

        let listener = self.listener.lock().clone();
        if let Some((uuid, listener)) = listener {
            listener.on_activity_status_change(uuid, &old, &status);
        }
    }
}
