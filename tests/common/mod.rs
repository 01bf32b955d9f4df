//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use semver::Version;
use tempfile::TempDir;
use uuid::Uuid;

use liveactivity::adapters::{
    AlertStatusManager, LiveActivityConfiguration, LiveActivityFilesystem, RunnerSampler,
    SimpleLiveActivityConfiguration, SimpleLiveActivityConfigurationManager,
    SimpleLiveActivityFilesystem, SimpleLiveActivityStorageManager, StatusPublisher,
    YamlLiveActivityRepository,
};
use liveactivity::core::{
    ActivityWrapperFactory, FactoryRetryPolicy, LiveActivityRunner, LiveActivityRuntime,
    RunnerListener, RunnerParts, RuntimeComponents, WrapperFactoryRegistry,
};
use liveactivity::domain::{
    Activity, ActivityContext, ActivityListener, ActivityState, ActivityStatus, ActivityWrapper,
    InstalledLiveActivity, StatusCell,
};

pub const SCRIPTED_TYPE: &str = "scripted";

pub type Hook = Arc<dyn Fn() + Send + Sync>;

/// How scripted activities behave
#[derive(Default, Clone)]
pub struct Script {
    pub fail_startup: bool,
    pub fail_shutdown: bool,
    pub fail_first_shutdown: bool,
    pub crash_on_startup: bool,
    pub fail_activate: bool,
    pub panic_activate: bool,
    pub fail_cleanup: bool,
    pub stay_ready_after_startup: bool,
    pub startup_delay: Option<Duration>,
    pub on_startup: Option<Hook>,
}

/// Call counters shared by every instance of a scripted wrapper
#[derive(Default)]
pub struct Calls {
    pub instances: AtomicUsize,
    pub startups: AtomicUsize,
    pub shutdowns: AtomicUsize,
    pub activations: AtomicUsize,
    pub deactivations: AtomicUsize,
    pub cleanups: AtomicUsize,
    pub config_updates: AtomicUsize,
    pub done: AtomicUsize,
}

impl Calls {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::SeqCst);
}

pub struct ScriptedActivity {
    status: StatusCell,
    script: Arc<Script>,
    calls: Arc<Calls>,
}

impl Activity for ScriptedActivity {
    fn initialize(&self, context: ActivityContext) -> Result<()> {
        self.status.attach(&context);
        Ok(())
    }

    fn startup(&self) -> Result<()> {
        bump(&self.calls.startups);
        if let Some(hook) = &self.script.on_startup {
            hook();
        }
        if let Some(delay) = self.script.startup_delay {
            std::thread::sleep(delay);
        }
        if self.script.fail_startup {
            bail!("scripted startup failure");
        }
        if self.script.crash_on_startup {
            self.status.set(
                ActivityStatus::new(ActivityState::Crashed).with_description("scripted crash"),
            );
            return Ok(());
        }
        if !self.script.stay_ready_after_startup {
            self.status.set(ActivityStatus::running());
        }
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        bump(&self.calls.shutdowns);
        let first = Calls::get(&self.calls.shutdowns) == 1;
        if self.script.fail_shutdown || (self.script.fail_first_shutdown && first) {
            bail!("scripted shutdown failure");
        }
        self.status.set(ActivityStatus::ready());
        Ok(())
    }

    fn activate(&self) -> Result<()> {
        bump(&self.calls.activations);
        if self.script.panic_activate {
            panic!("scripted activate panic");
        }
        if self.script.fail_activate {
            bail!("scripted activate failure");
        }
        self.status.set(ActivityStatus::active());
        Ok(())
    }

    fn deactivate(&self) -> Result<()> {
        bump(&self.calls.deactivations);
        self.status.set(ActivityStatus::running());
        Ok(())
    }

    fn check_activity_state(&self) {}

    fn activity_status(&self) -> ActivityStatus {
        self.status.get()
    }

    fn set_activity_status(&self, status: ActivityStatus) {
        self.status.set(status);
    }

    fn update_configuration(&self, _update: &HashMap<String, String>) -> Result<()> {
        bump(&self.calls.config_updates);
        Ok(())
    }

    fn handle_startup_failure(&self) -> Result<()> {
        bump(&self.calls.cleanups);
        if self.script.fail_cleanup {
            bail!("scripted cleanup failure");
        }
        Ok(())
    }
}

pub struct ScriptedWrapper {
    script: Arc<Script>,
    calls: Arc<Calls>,
}

impl ScriptedWrapper {
    pub fn new(script: Script, calls: Arc<Calls>) -> Self {
        Self {
            script: Arc::new(script),
            calls,
        }
    }
}

impl ActivityWrapper for ScriptedWrapper {
    fn new_instance(&self) -> Result<Arc<dyn Activity>> {
        bump(&self.calls.instances);
        Ok(Arc::new(ScriptedActivity {
            status: StatusCell::new(),
            script: Arc::clone(&self.script),
            calls: Arc::clone(&self.calls),
        }))
    }

    fn done(&self) {
        bump(&self.calls.done);
    }
}

pub struct ScriptedFactory {
    activity_type: String,
    version: Option<Version>,
    script: Script,
    calls: Arc<Calls>,
}

impl ScriptedFactory {
    pub fn new(activity_type: &str, version: Option<&str>) -> Self {
        Self::with_script(activity_type, version, Script::default(), Arc::new(Calls::default()))
    }

    pub fn with_script(
        activity_type: &str,
        version: Option<&str>,
        script: Script,
        calls: Arc<Calls>,
    ) -> Self {
        Self {
            activity_type: activity_type.to_string(),
            version: version.map(|v| Version::parse(v).unwrap()),
            script,
            calls,
        }
    }
}

impl ActivityWrapperFactory for ScriptedFactory {
    fn activity_type(&self) -> &str {
        &self.activity_type
    }

    fn version(&self) -> Option<Version> {
        self.version.clone()
    }

    fn new_activity_wrapper(
        &self,
        _activity: &InstalledLiveActivity,
        _filesystem: &Arc<dyn LiveActivityFilesystem>,
        _configuration: &Arc<dyn LiveActivityConfiguration>,
    ) -> Result<Arc<dyn ActivityWrapper>> {
        Ok(Arc::new(ScriptedWrapper::new(
            self.script.clone(),
            Arc::clone(&self.calls),
        )))
    }
}

#[derive(Default)]
pub struct RecordingActivityListener {
    pub changes: Mutex<Vec<(ActivityState, ActivityState)>>,
}

impl ActivityListener for RecordingActivityListener {
    fn on_activity_status_change(&self, _uuid: Uuid, old: &ActivityStatus, new: &ActivityStatus) {
        self.changes.lock().push((old.state, new.state));
    }
}

#[derive(Default)]
pub struct RecordingRunnerListener {
    pub events: Mutex<Vec<Uuid>>,
}

impl RunnerListener for RecordingRunnerListener {
    fn on_no_instance_status_event(&self, uuid: Uuid) {
        self.events.lock().push(uuid);
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    pub published: Mutex<Vec<(Uuid, ActivityStatus)>>,
}

impl RecordingPublisher {
    pub fn states(&self, uuid: Uuid) -> Vec<ActivityState> {
        self.statuses(uuid).into_iter().map(|s| s.state).collect()
    }

    pub fn statuses(&self, uuid: Uuid) -> Vec<ActivityStatus> {
        self.published
            .lock()
            .iter()
            .filter(|(u, _)| *u == uuid)
            .map(|(_, s)| s.clone())
            .collect()
    }

    pub fn last(&self, uuid: Uuid) -> Option<ActivityStatus> {
        self.statuses(uuid).pop()
    }
}

#[async_trait]
impl StatusPublisher for RecordingPublisher {
    async fn publish(&self, uuid: Uuid, status: &ActivityStatus) -> Result<()> {
        self.published.lock().push((uuid, status.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSampler {
    pub sampled: Mutex<Vec<Uuid>>,
    /// Runner cached state at the moment sampling started
    pub observed: Mutex<Vec<ActivityState>>,
}

impl RunnerSampler for RecordingSampler {
    fn start_sampling(&self, runner: Arc<LiveActivityRunner>) {
        self.sampled.lock().push(runner.uuid());
        self.observed.lock().push(runner.cached_status().state);
    }
}

#[derive(Default)]
pub struct RecordingAlerts {
    pub announced: Mutex<Vec<(Uuid, ActivityState)>>,
}

#[async_trait]
impl AlertStatusManager for RecordingAlerts {
    async fn announce(&self, runner: &LiveActivityRunner) -> Result<()> {
        self.announced
            .lock()
            .push((runner.uuid(), runner.cached_status().state));
        Ok(())
    }
}

/// A standalone runner over a scripted wrapper
pub struct RunnerFixture {
    pub temp: TempDir,
    pub runner: Arc<LiveActivityRunner>,
    pub calls: Arc<Calls>,
    pub activity_events: Arc<RecordingActivityListener>,
    pub no_instance_events: Arc<RecordingRunnerListener>,
}

impl RunnerFixture {
    pub fn new(script: Script) -> Self {
        let temp = TempDir::new().unwrap();
        let filesystem = SimpleLiveActivityFilesystem::new(temp.path());
        filesystem.ensure_directories().unwrap();
        let filesystem: Arc<dyn LiveActivityFilesystem> = Arc::new(filesystem);
        let configuration = Arc::new(SimpleLiveActivityConfiguration::for_filesystem(
            filesystem.as_ref(),
        ));

        let calls = Arc::new(Calls::default());
        let activity_events = Arc::new(RecordingActivityListener::default());
        let no_instance_events = Arc::new(RecordingRunnerListener::default());

        let runner = LiveActivityRunner::new(
            InstalledLiveActivity::new(Uuid::new_v4(), "com.example.scripted", "1.0.0")
                .with_type(SCRIPTED_TYPE),
            RunnerParts {
                wrapper: Arc::new(ScriptedWrapper::new(script, Arc::clone(&calls))),
                filesystem,
                configuration,
                activity_listener: activity_events.clone(),
                runner_listener: no_instance_events.clone(),
            },
        )
        .with_lock_wait(Duration::from_millis(50));

        Self {
            temp,
            runner: Arc::new(runner),
            calls,
            activity_events,
            no_instance_events,
        }
    }
}

/// A started runtime over scripted activities and recording collaborators
pub struct Harness {
    pub temp: TempDir,
    pub repository: Arc<YamlLiveActivityRepository>,
    pub storage: Arc<SimpleLiveActivityStorageManager>,
    pub factories: Arc<WrapperFactoryRegistry>,
    pub publisher: Arc<RecordingPublisher>,
    pub sampler: Arc<RecordingSampler>,
    pub alerts: Arc<RecordingAlerts>,
    pub calls: Arc<Calls>,
    pub runtime: LiveActivityRuntime,
}

impl Harness {
    /// Must be called inside a tokio runtime
    pub fn new(script: Script) -> Self {
        let harness = Self::unstarted(script);
        harness.runtime.startup();
        harness
    }

    /// A harness whose event consumer has not been started
    pub fn unstarted(script: Script) -> Self {
        let temp = TempDir::new().unwrap();
        let repository = Arc::new(YamlLiveActivityRepository::new());
        let storage = Arc::new(SimpleLiveActivityStorageManager::new(temp.path().join("activities")));
        let factories = Arc::new(WrapperFactoryRegistry::new().with_retry_policy(FactoryRetryPolicy {
            attempts: 2,
            delay: Duration::from_millis(10),
        }));
        let publisher = Arc::new(RecordingPublisher::default());
        let sampler = Arc::new(RecordingSampler::default());
        let alerts = Arc::new(RecordingAlerts::default());
        let calls = Arc::new(Calls::default());

        factories.register(Arc::new(ScriptedFactory::with_script(
            SCRIPTED_TYPE,
            Some("1.0.0"),
            script,
            Arc::clone(&calls),
        )));

        let runtime = LiveActivityRuntime::with_lock_wait(
            RuntimeComponents {
                repository: repository.clone(),
                storage: storage.clone(),
                configuration_manager: Arc::new(SimpleLiveActivityConfigurationManager::new()),
                factories: Arc::clone(&factories),
                publisher: publisher.clone(),
                sampler: sampler.clone(),
                alerts: alerts.clone(),
            },
            Duration::from_millis(100),
        );

        Self {
            temp,
            repository,
            storage,
            factories,
            publisher,
            sampler,
            alerts,
            calls,
            runtime,
        }
    }

    /// Install a scripted activity
    pub fn install(&self) -> Uuid {
        self.install_with_type(SCRIPTED_TYPE)
    }

    pub fn install_with_type(&self, activity_type: &str) -> Uuid {
        let uuid = Uuid::new_v4();
        self.repository.insert(
            InstalledLiveActivity::new(uuid, "com.example.scripted", "1.0.0")
                .with_type(activity_type),
        );
        uuid
    }

    /// Wait until the runner's cached state is `state` and its events are handled
    pub async fn wait_for_state(&self, uuid: Uuid, state: ActivityState) -> bool {
        for _ in 0..200 {
            self.runtime.flush_events().await;
            if let Some(runner) = self.runtime.live_activity_runner(uuid).await {
                if runner.cached_status().state == state {
                    self.runtime.flush_events().await;
                    return true;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

/// Compare instances by address
pub fn same_instance(a: &Arc<dyn Activity>, b: &Arc<dyn Activity>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}
