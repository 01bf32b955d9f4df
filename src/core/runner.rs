//! Per-activity runner.
//!
//! A runner owns the live instance of one activity, the last status it saw,
//! and the instance lock that serializes every lifecycle call against that
//! instance. Runner methods block; the runtime calls them from blocking
//! tasks.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::adapters::{
    LiveActivityConfiguration, LiveActivityFilesystem, CONFIGURATION_DIR_DATA,
    CONFIGURATION_DIR_INSTALL, CONFIGURATION_DIR_LOG, CONFIGURATION_DIR_TMP,
};
use crate::domain::{
    Activity, ActivityContext, ActivityListener, ActivityState, ActivityStateTransition,
    ActivityStatus, ActivityWrapper, InstalledLiveActivity,
};

use super::lock::{InstanceLock, LockError, LockOperation, DEFAULT_LOCK_WAIT};

/// Receives statuses set on a runner that has no live instance
pub trait RunnerListener: Send + Sync {
    /// A status was set while the activity had no instance
    fn on_no_instance_status_event(&self, uuid: Uuid);
}

/// Errors raised by runner operations
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("Live activity {uuid} has no running instance to {operation}")]
    NotStarted { uuid: Uuid, operation: &'static str },

    #[error("Failed to update live activity configuration: {0:#}")]
    Configuration(anyhow::Error),
}

/// Collaborators a runner is built from
pub struct RunnerParts {
    pub wrapper: Arc<dyn ActivityWrapper>,
    pub filesystem: Arc<dyn LiveActivityFilesystem>,
    pub configuration: Arc<dyn LiveActivityConfiguration>,
    pub activity_listener: Arc<dyn ActivityListener>,
    pub runner_listener: Arc<dyn RunnerListener>,
}

/// Drives one live activity through its lifecycle
pub struct LiveActivityRunner {
    activity: InstalledLiveActivity,
    wrapper: Arc<dyn ActivityWrapper>,
    filesystem: Arc<dyn LiveActivityFilesystem>,
    configuration: Arc<dyn LiveActivityConfiguration>,
    activity_listener: Arc<dyn ActivityListener>,
    runner_listener: Arc<dyn RunnerListener>,
    cached_status: Mutex<ActivityStatus>,
    instance: InstanceLock<Option<Arc<dyn Activity>>>,
}

impl LiveActivityRunner {
    /// Create a runner in the READY state with no instance
    pub fn new(activity: InstalledLiveActivity, parts: RunnerParts) -> Self {
        let uuid = activity.uuid;
        Self {
            activity,
            wrapper: parts.wrapper,
            filesystem: parts.filesystem,
            configuration: parts.configuration,
            activity_listener: parts.activity_listener,
            runner_listener: parts.runner_listener,
            cached_status: Mutex::new(ActivityStatus::ready()),
            instance: InstanceLock::new(uuid, DEFAULT_LOCK_WAIT, None),
        }
    }

    /// Use a different lock wait slice
    pub fn with_lock_wait(mut self, wait: Duration) -> Self {
        self.instance = InstanceLock::new(self.activity.uuid, wait, None);
        self
    }

    /// UUID of the live activity
    pub fn uuid(&self) -> Uuid {
        self.activity.uuid
    }

    /// Name for logs and alerts
    pub fn display_name(&self) -> &str {
        self.activity.display_name()
    }

    /// Install metadata the runner was created from
    pub fn installed_activity(&self) -> &InstalledLiveActivity {
        &self.activity
    }

    /// The wrapper producing instances
    pub fn wrapper(&self) -> &Arc<dyn ActivityWrapper> {
        &self.wrapper
    }

    /// The activity's configuration
    pub fn configuration(&self) -> &Arc<dyn LiveActivityConfiguration> {
        &self.configuration
    }

    /// Operation currently holding the instance lock
    pub fn lock_holder(&self) -> LockOperation {
        self.instance.holder()
    }

    /// Abort every thread waiting on the instance lock
    pub fn interrupt_lock_waiters(&self) {
        self.instance.interrupt_waiters();
    }

    /// Lock wait slices that elapsed without acquiring the instance lock
    pub fn slow_lock_waits(&self) -> u64 {
        self.instance.slow_waits()
    }

    /// Last known status, without touching the instance
    pub fn cached_status(&self) -> ActivityStatus {
        self.cached_status.lock().clone()
    }

    /// Record a status observed elsewhere without touching the instance
    pub(crate) fn record_status(&self, status: ActivityStatus) {
        *self.cached_status.lock() = status;
    }

    /// Record `new` only while the cache still holds `old`.
    ///
    /// Returns false for an event the runner has already moved past.
    pub(crate) fn record_status_change(&self, old: ActivityState, new: ActivityStatus) -> bool {
        let mut cached = self.cached_status.lock();
        if cached.state != old {
            return false;
        }
        *cached = new;
        true
    }

    /// Start the activity if it has no instance
    pub fn startup(&self) -> Result<(), RunnerError> {
        let guard = self.instance.acquire(LockOperation::Startup)?;
        let mut instance = guard.state();

        if instance.is_some() {
            warn!(uuid = %self.uuid(), "Attempt to start up a live activity that is already running");
            return Ok(());
        }

        info!(uuid = %self.uuid(), activity = %self.display_name(), "Starting up live activity");

        let mut created: Option<Arc<dyn Activity>> = None;
        let result = guarded("startup", || {
            self.configuration
                .load()
                .context("Failed to load activity configuration")?;
            self.inject_directories();

            let activity = self
                .wrapper
                .new_instance()
                .context("Failed to create activity instance")?;
            created = Some(Arc::clone(&activity));

            activity
                .initialize(self.activity_context())
                .context("Failed to initialize activity")?;
            activity.startup().context("Activity failed to start up")?;
            Ok(activity)
        });

        match result {
            Ok(activity) => {
                let status = activity.activity_status();
                self.record_status(status.clone());

                if status.state.is_running() {
                    *instance = Some(activity);
                } else {
                    warn!(
                        uuid = %self.uuid(),
                        state = %status.state,
                        "Live activity did not reach a running state, discarding instance"
                    );
                }
            }
            Err(e) => {
                error!(uuid = %self.uuid(), error = %format!("{:#}", e), "Live activity startup failed");
                *instance = None;
                self.set_status_unprotected(
                    None,
                    ActivityStatus::new(ActivityState::StartupFailure).with_error(&e),
                );

                if let Some(activity) = created {
                    if let Err(cleanup) =
                        guarded("startup failure cleanup", || activity.handle_startup_failure())
                    {
                        error!(
                            uuid = %self.uuid(),
                            error = %format!("{:#}", cleanup),
                            "Cleanup after failed startup also failed"
                        );
                    }
                }
            }
        }

        Ok(())
    }

    /// Shut the activity down if it has an instance
    pub fn shutdown(&self) -> Result<(), RunnerError> {
        let guard = self.instance.acquire(LockOperation::Shutdown)?;
        let mut instance = guard.state();

        let Some(activity) = instance.clone() else {
            warn!(uuid = %self.uuid(), "Attempt to shut down a live activity that is not running");
            return Ok(());
        };

        info!(uuid = %self.uuid(), activity = %self.display_name(), "Shutting down live activity");

        let result = guarded("shutdown", || {
            activity.shutdown().context("Activity failed to shut down")?;
            activity.check_activity_state();
            Ok(activity.activity_status())
        });

        match result {
            Ok(status) => {
                self.record_status(status);
                *instance = None;
            }
            Err(e) => {
                error!(uuid = %self.uuid(), error = %format!("{:#}", e), "Live activity shutdown failed");
                self.set_status_unprotected(
                    Some(&activity),
                    ActivityStatus::new(ActivityState::ShutdownFailure).with_error(&e),
                );
            }
        }

        self.wrapper.done();
        Ok(())
    }

    /// Activate the running instance
    pub fn activate(&self) -> Result<(), RunnerError> {
        let guard = self.instance.acquire(LockOperation::Activate)?;
        let activity = self.require_instance(&guard.state(), "activate")?;

        info!(uuid = %self.uuid(), "Activating live activity");
        match guarded("activate", || activity.activate()) {
            Ok(()) => self.record_status(activity.activity_status()),
            Err(e) => {
                error!(uuid = %self.uuid(), error = %format!("{:#}", e), "Live activity activation failed");
                self.set_status_unprotected(
                    Some(&activity),
                    ActivityStatus::new(ActivityState::ActivateFailure).with_error(&e),
                );
            }
        }

        Ok(())
    }

    /// Deactivate the running instance
    pub fn deactivate(&self) -> Result<(), RunnerError> {
        let guard = self.instance.acquire(LockOperation::Deactivate)?;
        let activity = self.require_instance(&guard.state(), "deactivate")?;

        info!(uuid = %self.uuid(), "Deactivating live activity");
        match guarded("deactivate", || activity.deactivate()) {
            Ok(()) => self.record_status(activity.activity_status()),
            Err(e) => {
                error!(uuid = %self.uuid(), error = %format!("{:#}", e), "Live activity deactivation failed");
                self.set_status_unprotected(
                    Some(&activity),
                    ActivityStatus::new(ActivityState::DeactivateFailure).with_error(&e),
                );
            }
        }

        Ok(())
    }

    /// Perform a lifecycle transition checked against `current`.
    ///
    /// Starting up after a failed shutdown first retries the shutdown.
    pub fn perform_transition(
        &self,
        transition: ActivityStateTransition,
        current: ActivityState,
    ) -> Result<(), RunnerError> {
        match transition {
            ActivityStateTransition::Startup => {
                if current == ActivityState::ShutdownFailure {
                    info!(uuid = %self.uuid(), "Retrying shutdown before starting up again");
                    self.shutdown()?;
                }
                self.startup()
            }
            ActivityStateTransition::Activate => self.activate(),
            ActivityStateTransition::Deactivate => self.deactivate(),
            ActivityStateTransition::Shutdown => self.shutdown(),
        }
    }

    /// Persist a configuration update, pushing it live to a running instance
    pub fn update_configuration(&self, update: &HashMap<String, String>) -> Result<(), RunnerError> {
        let guard = self.instance.acquire(LockOperation::Configure)?;
        let instance = guard.state().clone();

        self.configuration
            .update(update)
            .map_err(RunnerError::Configuration)?;

        if let Some(activity) = instance {
            if activity.activity_status().state.is_running() {
                debug!(uuid = %self.uuid(), keys = update.len(), "Pushing configuration update to live activity");
                guarded("configuration update", || activity.update_configuration(update))
                    .map_err(RunnerError::Configuration)?;
            }
        }

        Ok(())
    }

    /// Ask the instance to re-check itself and return the refreshed status.
    ///
    /// With no instance this is the cached status.
    pub fn sample_status(&self) -> Result<ActivityStatus, RunnerError> {
        let guard = self.instance.acquire(LockOperation::Status)?;
        let instance = guard.state().clone();

        if let Some(activity) = instance {
            let sampled = guarded("status check", || {
                activity.check_activity_state();
                Ok(activity.activity_status())
            });
            match sampled {
                Ok(status) => self.record_status(status),
                Err(e) => {
                    warn!(uuid = %self.uuid(), error = %format!("{:#}", e), "Could not sample live activity status");
                }
            }
        }

        Ok(self.cached_status())
    }

    /// Force a status onto the activity
    pub fn set_status(&self, status: ActivityStatus) -> Result<(), RunnerError> {
        let guard = self.instance.acquire(LockOperation::Status)?;
        let instance = guard.state().clone();
        self.set_status_unprotected(instance.as_ref(), status);
        Ok(())
    }

    /// The live instance, if any
    pub fn instance(&self) -> Result<Option<Arc<dyn Activity>>, RunnerError> {
        let guard = self.instance.acquire(LockOperation::Obtain)?;
        let instance = guard.state().clone();
        Ok(instance)
    }

    /// Must be called with the instance lock held
    fn set_status_unprotected(&self, instance: Option<&Arc<dyn Activity>>, status: ActivityStatus) {
        self.record_status(status.clone());

        match instance {
            Some(activity) => {
                let pushed = guarded("status update", || {
                    activity.set_activity_status(status);
                    Ok(())
                });
                if let Err(e) = pushed {
                    error!(uuid = %self.uuid(), error = %format!("{:#}", e), "Could not push status to live activity");
                }
            }
            None => self.runner_listener.on_no_instance_status_event(self.uuid()),
        }
    }

    fn require_instance(
        &self,
        instance: &Option<Arc<dyn Activity>>,
        operation: &'static str,
    ) -> Result<Arc<dyn Activity>, RunnerError> {
        instance.clone().ok_or(RunnerError::NotStarted {
            uuid: self.uuid(),
            operation,
        })
    }

    fn inject_directories(&self) {
        let directories = [
            (CONFIGURATION_DIR_INSTALL, self.filesystem.install_directory()),
            (CONFIGURATION_DIR_LOG, self.filesystem.log_directory()),
            (CONFIGURATION_DIR_DATA, self.filesystem.permanent_data_directory()),
            (CONFIGURATION_DIR_TMP, self.filesystem.temp_data_directory()),
        ];
        for (key, dir) in directories {
            self.configuration
                .set_value(key, dir.to_string_lossy().into_owned());
        }
    }

    fn activity_context(&self) -> ActivityContext {
        ActivityContext {
            uuid: self.uuid(),
            filesystem: Arc::clone(&self.filesystem),
            configuration: Arc::clone(&self.configuration),
            execution_context: self.wrapper.new_execution_context(),
            listener: Arc::clone(&self.activity_listener),
        }
    }
}

/// Run activity code, turning a panic into an error
fn guarded<T>(operation: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(anyhow!(
            "Activity panicked during {}: {}",
            operation,
            panic_message(payload.as_ref())
        )),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
