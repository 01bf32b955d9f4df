//! The live activity runtime.
//!
//! Resolves commands to runners, applies the command-level transition
//! policy, sequences multi-step goals and handles every status change on a
//! single event consumer. No command method returns an error: failures are
//! logged and published as failure statuses.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{
    AlertStatusManager, LiveActivityConfigurationManager, LiveActivityRepository,
    LiveActivityStorageManager, RunnerSampler, StatusPublisher, CONFIGURATION_ACTIVITY_TYPE,
};
use crate::domain::{
    ActivityState, ActivityStateTransition, ActivityStatus, InstalledLiveActivity, TransitionResult,
};

use super::events::{EventSender, RuntimeEvent};
use super::factory::WrapperFactoryRegistry;
use super::goal::{GoalProgress, GoalTransitioners};
use super::lock::DEFAULT_LOCK_WAIT;
use super::runner::{LiveActivityRunner, RunnerError, RunnerParts};

/// How often shutdown re-interrupts lock waiters while the consumer drains
const SHUTDOWN_INTERRUPT_INTERVAL: Duration = Duration::from_millis(50);

/// Outcome of removing an activity from the node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveActivityResult {
    /// The activity was removed
    Success,

    /// There was nothing to remove
    DoesntExist,

    /// Removal failed
    Failure,
}

/// Collaborators the runtime is built from
pub struct RuntimeComponents {
    pub repository: Arc<dyn LiveActivityRepository>,
    pub storage: Arc<dyn LiveActivityStorageManager>,
    pub configuration_manager: Arc<dyn LiveActivityConfigurationManager>,
    pub factories: Arc<WrapperFactoryRegistry>,
    pub publisher: Arc<dyn StatusPublisher>,
    pub sampler: Arc<dyn RunnerSampler>,
    pub alerts: Arc<dyn AlertStatusManager>,
}

/// Node-local lifecycle manager for live activities
pub struct LiveActivityRuntime {
    shared: Arc<Shared>,
    receiver: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<RuntimeEvent>>>,
    consumer: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    components: RuntimeComponents,
    lock_wait: Duration,
    runners: Mutex<HashMap<Uuid, Arc<LiveActivityRunner>>>,
    goals: Arc<GoalTransitioners>,
    events: EventSender,
}

impl LiveActivityRuntime {
    /// Create a runtime with the default lock wait slice
    pub fn new(components: RuntimeComponents) -> Self {
        Self::with_lock_wait(components, DEFAULT_LOCK_WAIT)
    }

    /// Create a runtime whose runners use `lock_wait` as their wait slice
    pub fn with_lock_wait(components: RuntimeComponents, lock_wait: Duration) -> Self {
        let (events, receiver) = EventSender::channel();
        Self {
            shared: Arc::new(Shared {
                components,
                lock_wait,
                runners: Mutex::new(HashMap::new()),
                goals: Arc::new(GoalTransitioners::new()),
                events,
            }),
            receiver: parking_lot::Mutex::new(Some(receiver)),
            consumer: parking_lot::Mutex::new(None),
        }
    }

    /// Start the event consumer
    pub fn startup(&self) {
        let Some(receiver) = self.receiver.lock().take() else {
            warn!("Live activity runtime already started");
            return;
        };

        let shared = Arc::clone(&self.shared);
        *self.consumer.lock() = Some(tokio::spawn(consume_events(shared, receiver)));
        info!("Live activity runtime started");
    }

    /// Drop pending goals, drain the event queue and stop the consumer.
    ///
    /// Lock waiters are interrupted until the consumer exits, so a goal step
    /// stuck behind a hung activity cannot hold up shutdown.
    pub async fn shutdown(&self) {
        self.shared.goals.clear();

        let consumer = self.consumer.lock().take();
        let Some(mut consumer) = consumer else {
            self.interrupt_lock_waiters().await;
            info!("Live activity runtime shut down");
            return;
        };

        self.shared.events.submit(RuntimeEvent::Stop);
        loop {
            self.interrupt_lock_waiters().await;
            match tokio::time::timeout(SHUTDOWN_INTERRUPT_INTERVAL, &mut consumer).await {
                Ok(Ok(())) => break,
                Ok(Err(e)) => {
                    error!(error = %e, "Live activity event consumer failed");
                    break;
                }
                Err(_) => debug!("Waiting for the live activity event consumer to stop"),
            }
        }

        info!("Live activity runtime shut down");
    }

    async fn interrupt_lock_waiters(&self) {
        for runner in self.all_live_activity_runners().await {
            runner.interrupt_lock_waiters();
        }
    }

    /// Start a live activity
    #[instrument(skip_all, fields(uuid = %uuid))]
    pub async fn startup_live_activity(&self, uuid: Uuid) {
        if let Err(e) = self.shared.try_startup(uuid).await {
            self.shared
                .publish_failure(uuid, ActivityState::StartupFailure, "startup", &e)
                .await;
        }
    }

    /// Shut down a live activity
    #[instrument(skip_all, fields(uuid = %uuid))]
    pub async fn shutdown_live_activity(&self, uuid: Uuid) {
        if let Err(e) = self.shared.try_shutdown(uuid).await {
            self.shared
                .publish_failure(uuid, ActivityState::ShutdownFailure, "shutdown", &e)
                .await;
        }
    }

    /// Activate a live activity, starting it first if needed
    #[instrument(skip_all, fields(uuid = %uuid))]
    pub async fn activate_live_activity(&self, uuid: Uuid) {
        if let Err(e) = self.shared.try_activate(uuid).await {
            self.shared
                .publish_failure(uuid, ActivityState::ActivateFailure, "activate", &e)
                .await;
        }
    }

    /// Deactivate a live activity
    #[instrument(skip_all, fields(uuid = %uuid))]
    pub async fn deactivate_live_activity(&self, uuid: Uuid) {
        if let Err(e) = self.shared.try_deactivate(uuid).await {
            self.shared
                .publish_failure(uuid, ActivityState::DeactivateFailure, "deactivate", &e)
                .await;
        }
    }

    /// Sample and publish the status of a live activity
    #[instrument(skip_all, fields(uuid = %uuid))]
    pub async fn status_live_activity(&self, uuid: Uuid) {
        if let Err(e) = self.shared.try_status(uuid).await {
            self.shared
                .publish_failure(uuid, ActivityState::Unknown, "status", &e)
                .await;
        }
    }

    /// Apply a configuration update to a live activity
    #[instrument(skip_all, fields(uuid = %uuid, keys = update.len()))]
    pub async fn configure_live_activity(&self, uuid: Uuid, update: HashMap<String, String>) {
        if let Err(e) = self.shared.try_configure(uuid, update).await {
            self.shared
                .publish_failure(uuid, ActivityState::Unknown, "configure", &e)
                .await;
        }
    }

    /// Remove the temporary data of a stopped live activity
    #[instrument(skip_all, fields(uuid = %uuid))]
    pub async fn clean_live_activity_tmp_data(&self, uuid: Uuid) {
        if let Err(e) = self.shared.try_clean(uuid, DataArea::Temporary).await {
            self.shared
                .publish_failure(uuid, ActivityState::Unknown, "clean temporary data", &e)
                .await;
        }
    }

    /// Remove the permanent data of a stopped live activity
    #[instrument(skip_all, fields(uuid = %uuid))]
    pub async fn clean_live_activity_permanent_data(&self, uuid: Uuid) {
        if let Err(e) = self.shared.try_clean(uuid, DataArea::Permanent).await {
            self.shared
                .publish_failure(uuid, ActivityState::Unknown, "clean permanent data", &e)
                .await;
        }
    }

    /// Attempt startup on every known runner
    pub async fn startup_all_activities(&self) {
        for runner in self.all_live_activity_runners().await {
            self.startup_live_activity(runner.uuid()).await;
        }
    }

    /// Attempt shutdown on every known runner
    pub async fn shutdown_all_activities(&self) {
        for runner in self.all_live_activity_runners().await {
            self.shutdown_live_activity(runner.uuid()).await;
        }
    }

    /// Report the outcome of removing an activity from the node
    pub async fn on_activity_removed(&self, uuid: Uuid, result: RemoveActivityResult) {
        match result {
            RemoveActivityResult::DoesntExist => {
                self.shared
                    .publish(uuid, &ActivityStatus::doesnt_exist())
                    .await
            }
            result => debug!(%uuid, ?result, "Live activity removal reported"),
        }
    }

    /// Every installed activity
    pub fn installed_activities(&self) -> Vec<InstalledLiveActivity> {
        self.shared.components.repository.all_installed_activities()
    }

    /// The runner for `uuid`, if one has been created
    pub async fn live_activity_runner(&self, uuid: Uuid) -> Option<Arc<LiveActivityRunner>> {
        self.shared.runners.lock().await.get(&uuid).cloned()
    }

    /// Every runner created so far
    pub async fn all_live_activity_runners(&self) -> Vec<Arc<LiveActivityRunner>> {
        self.shared.runners.lock().await.values().cloned().collect()
    }

    /// Goal steps still pending for `uuid`
    pub fn pending_goal(&self, uuid: Uuid) -> Option<Vec<ActivityStateTransition>> {
        self.shared.goals.pending_steps(uuid)
    }

    /// Resolve once every event queued before this call has been handled
    pub async fn flush_events(&self) {
        if self.consumer.lock().is_none() {
            return;
        }

        let (tx, rx) = oneshot::channel();
        if self.shared.events.submit(RuntimeEvent::Flush(tx)) {
            // A stopped consumer drops the sender.
            let _ = rx.await;
        }
    }
}

impl Drop for LiveActivityRuntime {
    fn drop(&mut self) {
        if self.consumer.get_mut().take().is_some() {
            self.shared.goals.clear();
            self.shared.events.submit(RuntimeEvent::Stop);
            debug!("Live activity runtime dropped without shutdown, stopping event consumer");
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum DataArea {
    Temporary,
    Permanent,
}

impl Shared {
    async fn try_startup(&self, uuid: Uuid) -> Result<()> {
        let Some(runner) = self.runner(uuid, true).await? else {
            return self.publish_doesnt_exist(uuid).await;
        };

        let cached = runner.cached_status();
        self.attempt_transition(&runner, ActivityStateTransition::Startup, cached)
            .await
    }

    async fn try_shutdown(&self, uuid: Uuid) -> Result<()> {
        let Some(runner) = self.runner(uuid, false).await? else {
            if self.is_installed(uuid) {
                warn!(%uuid, "Shutdown of a live activity that was never started");
                self.publish(uuid, &ActivityStatus::ready()).await;
                return Ok(());
            }
            return self.publish_doesnt_exist(uuid).await;
        };

        self.attempt_transition(&runner, ActivityStateTransition::Shutdown, ActivityStatus::ready())
            .await
    }

    async fn try_activate(&self, uuid: Uuid) -> Result<()> {
        let Some(runner) = self.runner(uuid, true).await? else {
            return self.publish_doesnt_exist(uuid).await;
        };

        let state = runner.cached_status().state;
        if ActivityStateTransition::Startup.can_transition(state) == TransitionResult::Ok {
            info!(%uuid, %state, "Live activity not running, starting up before activation");
            self.goals.register(
                uuid,
                [ActivityStateTransition::Startup, ActivityStateTransition::Activate],
            );
            self.events.submit(RuntimeEvent::DriveGoal { uuid });
            return Ok(());
        }

        self.attempt_transition(&runner, ActivityStateTransition::Activate, ActivityStatus::active())
            .await
    }

    async fn try_deactivate(&self, uuid: Uuid) -> Result<()> {
        let Some(runner) = self.runner(uuid, false).await? else {
            return self.publish_doesnt_exist(uuid).await;
        };

        self.attempt_transition(
            &runner,
            ActivityStateTransition::Deactivate,
            ActivityStatus::running(),
        )
        .await
    }

    async fn try_status(&self, uuid: Uuid) -> Result<()> {
        match self.runner(uuid, false).await? {
            Some(runner) => {
                let status = blocking(&runner, |r| r.sample_status()).await?;
                self.publish(uuid, &status).await;
                Ok(())
            }
            None if self.is_installed(uuid) => {
                self.publish(uuid, &ActivityStatus::ready()).await;
                Ok(())
            }
            None => self.publish_doesnt_exist(uuid).await,
        }
    }

    async fn try_configure(&self, uuid: Uuid, update: HashMap<String, String>) -> Result<()> {
        let Some(runner) = self.runner(uuid, true).await? else {
            return self.publish_doesnt_exist(uuid).await;
        };

        blocking(&runner, move |r| r.update_configuration(&update)).await?;
        info!(%uuid, "Live activity configuration updated");
        Ok(())
    }

    async fn try_clean(&self, uuid: Uuid, area: DataArea) -> Result<()> {
        if let Some(runner) = self.runner(uuid, false).await? {
            let state = runner.cached_status().state;
            if state.is_running() {
                warn!(%uuid, %state, ?area, "Refusing to clean data of a running live activity");
                return Ok(());
            }
        }

        if !self.is_installed(uuid) {
            return self.publish_doesnt_exist(uuid).await;
        }

        let storage = Arc::clone(&self.components.storage);
        tokio::task::spawn_blocking(move || match area {
            DataArea::Temporary => storage.clean_tmp_data(uuid),
            DataArea::Permanent => storage.clean_permanent_data(uuid),
        })
        .await
        .context("Data cleaning task failed")??;

        info!(%uuid, ?area, "Cleaned live activity data");
        Ok(())
    }

    /// Check `transition` against the cached status and act on the result
    async fn attempt_transition(
        &self,
        runner: &Arc<LiveActivityRunner>,
        transition: ActivityStateTransition,
        noop_status: ActivityStatus,
    ) -> Result<()> {
        let uuid = runner.uuid();
        let cached = runner.cached_status();

        match transition.can_transition(cached.state) {
            TransitionResult::Ok => {
                let current = cached.state;
                blocking(runner, move |r| r.perform_transition(transition, current)).await
            }
            TransitionResult::Noop => {
                warn!(%uuid, %transition, state = %cached.state, "Live activity transition is a no-op");
                self.publish(uuid, &noop_status).await;
                Ok(())
            }
            TransitionResult::Illegal => {
                log_illegal(uuid, transition, cached.state);
                Ok(())
            }
        }
    }

    /// Get the runner for `uuid`, creating it if asked and the activity is installed
    async fn runner(&self, uuid: Uuid, create: bool) -> Result<Option<Arc<LiveActivityRunner>>> {
        let mut runners = self.runners.lock().await;
        if let Some(runner) = runners.get(&uuid) {
            return Ok(Some(Arc::clone(runner)));
        }

        if !create {
            return Ok(None);
        }

        let Some(activity) = self.components.repository.installed_activity(uuid) else {
            return Ok(None);
        };

        let runner = Arc::new(self.new_runner(activity).await?);
        runners.insert(uuid, Arc::clone(&runner));
        info!(%uuid, activity = %runner.display_name(), "Created live activity runner");

        Ok(Some(runner))
    }

    async fn new_runner(&self, activity: InstalledLiveActivity) -> Result<LiveActivityRunner> {
        let uuid = activity.uuid;
        let filesystem = self
            .components
            .storage
            .activity_filesystem(uuid)
            .with_context(|| format!("Failed to prepare filesystem for live activity {}", uuid))?;

        let configuration = self
            .components
            .configuration_manager
            .new_configuration(&activity, &filesystem);
        configuration
            .load()
            .with_context(|| format!("Failed to load configuration for live activity {}", uuid))?;

        let activity_type = configuration
            .get(CONFIGURATION_ACTIVITY_TYPE)
            .or_else(|| activity.activity_type.clone())
            .with_context(|| format!("Live activity {} has no activity type", uuid))?;

        let factory = self.components.factories.resolve(&activity_type).await?;
        let wrapper = factory
            .new_activity_wrapper(&activity, &filesystem, &configuration)
            .with_context(|| format!("Failed to create wrapper for live activity {}", uuid))?;

        let runner = LiveActivityRunner::new(
            activity,
            RunnerParts {
                wrapper,
                filesystem,
                configuration,
                activity_listener: Arc::new(self.events.clone()),
                runner_listener: Arc::new(self.events.clone()),
            },
        );
        Ok(runner.with_lock_wait(self.lock_wait))
    }

    async fn lookup_runner(&self, uuid: Uuid) -> Option<Arc<LiveActivityRunner>> {
        self.runners.lock().await.get(&uuid).cloned()
    }

    fn is_installed(&self, uuid: Uuid) -> bool {
        self.components.repository.installed_activity(uuid).is_some()
    }

    async fn handle_status_change(&self, uuid: Uuid, old: ActivityStatus, new: ActivityStatus) {
        let runner = self.lookup_runner(uuid).await;
        if let Some(runner) = &runner {
            if !runner.record_status_change(old.state, new.clone()) {
                debug!(
                    %uuid,
                    old = %old.state,
                    new = %new.state,
                    cached = %runner.cached_status().state,
                    "Status event is behind the runner's cached status"
                );
            }
        }

        if new.state.is_error() {
            error!(%uuid, old = %old.state, status = %new, "Live activity entered an error state");
        } else {
            info!(%uuid, old = %old.state, new = %new.state, "Live activity status changed");
        }

        if let Some(runner) = &runner {
            if !old.state.is_running() && new.state.is_running() {
                self.components.sampler.start_sampling(Arc::clone(runner));
            }
        }

        self.publish(uuid, &new).await;

        if new.state.is_error() {
            if let Some(runner) = &runner {
                self.alert(runner).await;
            }
            self.goals.abandon(uuid);
        } else if let Some(runner) = runner {
            let state = runner.cached_status().state;
            self.advance_goal(runner, state).await;
        }
    }

    async fn handle_no_instance_status(&self, uuid: Uuid) {
        let Some(runner) = self.lookup_runner(uuid).await else {
            warn!(%uuid, "No-instance status event for an unknown runner");
            return;
        };

        let status = runner.cached_status();
        if status.state.is_error() {
            error!(%uuid, %status, "Live activity with no instance reported an error");
            self.publish(uuid, &status).await;
            self.alert(&runner).await;
            self.goals.abandon(uuid);
        } else {
            warn!(%uuid, %status, "Status set on a live activity with no instance");
        }
    }

    async fn drive_goal(&self, uuid: Uuid) {
        match self.lookup_runner(uuid).await {
            Some(runner) => {
                let state = runner.cached_status().state;
                self.advance_goal(runner, state).await;
            }
            None => {
                warn!(%uuid, "Goal registered for an unknown runner");
                self.goals.abandon(uuid);
            }
        }
    }

    async fn advance_goal(&self, runner: Arc<LiveActivityRunner>, state: ActivityState) {
        let uuid = runner.uuid();
        if !self.goals.is_pending(uuid) {
            return;
        }

        let goals = Arc::clone(&self.goals);
        match tokio::task::spawn_blocking(move || goals.transition(runner.as_ref(), state)).await {
            Ok(GoalProgress::Abandoned) => debug!(%uuid, %state, "Goal abandoned"),
            Ok(progress) => debug!(%uuid, %state, ?progress, "Goal advanced"),
            Err(e) => {
                error!(%uuid, error = %e, "Goal step panicked");
                self.goals.abandon(uuid);
            }
        }
    }

    async fn publish(&self, uuid: Uuid, status: &ActivityStatus) {
        if let Err(e) = self.components.publisher.publish(uuid, status).await {
            error!(%uuid, %status, error = %format!("{:#}", e), "Failed to publish live activity status");
        }
    }

    async fn publish_doesnt_exist(&self, uuid: Uuid) -> Result<()> {
        warn!(%uuid, "Command for a live activity that is not installed");
        self.publish(uuid, &ActivityStatus::doesnt_exist()).await;
        Ok(())
    }

    async fn publish_failure(&self, uuid: Uuid, state: ActivityState, operation: &str, e: &anyhow::Error) {
        error!(%uuid, operation, error = %format!("{:#}", e), "Live activity command failed");
        let status = ActivityStatus::new(state)
            .with_description(format!("Live activity {} failed", operation))
            .with_error(e);
        self.publish(uuid, &status).await;
    }

    async fn alert(&self, runner: &LiveActivityRunner) {
        if let Err(e) = self.components.alerts.announce(runner).await {
            warn!(uuid = %runner.uuid(), error = %format!("{:#}", e), "Failed to raise alert");
        }
    }
}

fn log_illegal(uuid: Uuid, transition: ActivityStateTransition, state: ActivityState) {
    error!(%uuid, %transition, %state, "Illegal live activity transition");
}

/// Run a blocking runner call off the async executor
async fn blocking<T, F>(runner: &Arc<LiveActivityRunner>, f: F) -> Result<T>
where
    F: FnOnce(&LiveActivityRunner) -> Result<T, RunnerError> + Send + 'static,
    T: Send + 'static,
{
    let runner = Arc::clone(runner);
    let result = tokio::task::spawn_blocking(move || f(&runner))
        .await
        .context("Live activity runner task failed")?;
    Ok(result?)
}

async fn consume_events(shared: Arc<Shared>, mut receiver: mpsc::UnboundedReceiver<RuntimeEvent>) {
    debug!("Live activity event consumer running");

    while let Some(event) = receiver.recv().await {
        match event {
            RuntimeEvent::StatusChange { uuid, old, new } => {
                shared.handle_status_change(uuid, old, new).await
            }
            RuntimeEvent::NoInstanceStatus { uuid } => shared.handle_no_instance_status(uuid).await,
            RuntimeEvent::DriveGoal { uuid } => shared.drive_goal(uuid).await,
            RuntimeEvent::Flush(done) => {
                let _ = done.send(());
            }
            RuntimeEvent::Stop => break,
        }
    }

    debug!("Live activity event consumer stopped");
}
