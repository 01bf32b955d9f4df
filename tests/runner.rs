//! Runner Integration Tests
//!
//! Lifecycle operations, failure handling and instance lock behavior of a
//! single live activity runner.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use common::{same_instance, Calls, Hook, RunnerFixture, Script};
use liveactivity::core::{LiveActivityRunner, LockError, LockOperation, RunnerError};
use liveactivity::domain::{ActivityState, ActivityStateTransition, ActivityStatus};

#[test]
fn test_startup_and_shutdown() {
    let fixture = RunnerFixture::new(Script::default());
    let runner = &fixture.runner;

    runner.startup().unwrap();
    assert_eq!(runner.cached_status().state, ActivityState::Running);
    assert!(runner.instance().unwrap().is_some());

    runner.shutdown().unwrap();
    assert_eq!(runner.cached_status().state, ActivityState::Ready);
    assert!(runner.instance().unwrap().is_none());
    assert_eq!(Calls::get(&fixture.calls.done), 1);

    assert_eq!(
        *fixture.activity_events.changes.lock(),
        vec![
            (ActivityState::Ready, ActivityState::Running),
            (ActivityState::Running, ActivityState::Ready),
        ]
    );
}

#[test]
fn test_second_startup_keeps_instance() {
    let fixture = RunnerFixture::new(Script::default());
    let runner = &fixture.runner;

    runner.startup().unwrap();
    let first = runner.instance().unwrap().unwrap();

    runner.startup().unwrap();
    let second = runner.instance().unwrap().unwrap();

    assert!(same_instance(&first, &second));
    assert_eq!(Calls::get(&fixture.calls.instances), 1);
    assert_eq!(Calls::get(&fixture.calls.startups), 1);
}

#[test]
fn test_startup_failure_discards_instance() {
    let fixture = RunnerFixture::new(Script {
        fail_startup: true,
        ..Default::default()
    });
    let runner = &fixture.runner;

    runner.startup().unwrap();

    let status = runner.cached_status();
    assert_eq!(status.state, ActivityState::StartupFailure);
    assert!(status.error.unwrap().contains("scripted startup failure"));
    assert!(runner.instance().unwrap().is_none());
    assert_eq!(Calls::get(&fixture.calls.cleanups), 1);
    assert_eq!(*fixture.no_instance_events.events.lock(), vec![runner.uuid()]);
}

#[test]
fn test_cleanup_failure_does_not_mask_startup_failure() {
    let fixture = RunnerFixture::new(Script {
        fail_startup: true,
        fail_cleanup: true,
        ..Default::default()
    });

    fixture.runner.startup().unwrap();

    let status = fixture.runner.cached_status();
    assert_eq!(status.state, ActivityState::StartupFailure);
    let error = status.error.unwrap();
    assert!(error.contains("scripted startup failure"));
    assert!(!error.contains("cleanup"));
}

#[test]
fn test_instance_not_running_after_startup_is_discarded() {
    let fixture = RunnerFixture::new(Script {
        stay_ready_after_startup: true,
        ..Default::default()
    });

    fixture.runner.startup().unwrap();

    assert!(fixture.runner.instance().unwrap().is_none());
    assert_eq!(fixture.runner.cached_status().state, ActivityState::Ready);
}

#[test]
fn test_shutdown_without_instance_is_noop() {
    let fixture = RunnerFixture::new(Script::default());
    let runner = &fixture.runner;
    runner
        .set_status(ActivityStatus::new(ActivityState::Crashed))
        .unwrap();

    runner.shutdown().unwrap();
    runner.shutdown().unwrap();

    assert_eq!(runner.cached_status().state, ActivityState::Crashed);
    assert_eq!(Calls::get(&fixture.calls.shutdowns), 0);
    assert_eq!(Calls::get(&fixture.calls.done), 0);
}

#[test]
fn test_activate_without_instance_fails() {
    let fixture = RunnerFixture::new(Script::default());

    match fixture.runner.activate() {
        Err(RunnerError::NotStarted { operation, .. }) => assert_eq!(operation, "activate"),
        other => panic!("expected NotStarted, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_activate_and_deactivate() {
    let fixture = RunnerFixture::new(Script::default());
    let runner = &fixture.runner;

    runner.startup().unwrap();
    runner.activate().unwrap();
    assert_eq!(runner.cached_status().state, ActivityState::Active);

    runner.deactivate().unwrap();
    assert_eq!(runner.cached_status().state, ActivityState::Running);
    assert_eq!(Calls::get(&fixture.calls.deactivations), 1);
}

#[test]
fn test_activate_failure_keeps_instance() {
    let fixture = RunnerFixture::new(Script {
        fail_activate: true,
        ..Default::default()
    });
    let runner = &fixture.runner;

    runner.startup().unwrap();
    runner.activate().unwrap();

    assert_eq!(runner.cached_status().state, ActivityState::ActivateFailure);
    assert!(runner.instance().unwrap().is_some());
    assert_eq!(
        fixture.activity_events.changes.lock().last(),
        Some(&(ActivityState::Running, ActivityState::ActivateFailure))
    );
}

#[test]
fn test_panicking_activate_is_a_failure() {
    let fixture = RunnerFixture::new(Script {
        panic_activate: true,
        ..Default::default()
    });
    let runner = &fixture.runner;

    runner.startup().unwrap();
    runner.activate().unwrap();

    let status = runner.cached_status();
    assert_eq!(status.state, ActivityState::ActivateFailure);
    assert!(status.error.unwrap().contains("scripted activate panic"));

    // The lock survived the panic.
    assert_eq!(runner.lock_holder(), LockOperation::Neutral);
    runner.deactivate().unwrap();
}

#[test]
fn test_shutdown_failure_keeps_instance() {
    let fixture = RunnerFixture::new(Script {
        fail_shutdown: true,
        ..Default::default()
    });
    let runner = &fixture.runner;

    runner.startup().unwrap();
    runner.shutdown().unwrap();

    assert_eq!(runner.cached_status().state, ActivityState::ShutdownFailure);
    assert!(runner.instance().unwrap().is_some());
    assert_eq!(Calls::get(&fixture.calls.done), 1);
}

#[test]
fn test_startup_after_shutdown_failure_retries_shutdown() {
    let fixture = RunnerFixture::new(Script {
        fail_first_shutdown: true,
        ..Default::default()
    });
    let runner = &fixture.runner;

    runner.startup().unwrap();
    let failed = runner.instance().unwrap().unwrap();
    runner.shutdown().unwrap();
    assert_eq!(runner.cached_status().state, ActivityState::ShutdownFailure);

    runner
        .perform_transition(ActivityStateTransition::Startup, ActivityState::ShutdownFailure)
        .unwrap();

    assert_eq!(Calls::get(&fixture.calls.shutdowns), 2);
    assert_eq!(Calls::get(&fixture.calls.instances), 2);
    assert_eq!(runner.cached_status().state, ActivityState::Running);
    let restarted = runner.instance().unwrap().unwrap();
    assert!(!same_instance(&failed, &restarted));
}

#[test]
fn test_update_configuration() {
    let fixture = RunnerFixture::new(Script::default());
    let runner = &fixture.runner;
    let update: HashMap<String, String> = [("color".to_string(), "blue".to_string())]
        .into_iter()
        .collect();

    // Not running: persisted only.
    runner.update_configuration(&update).unwrap();
    assert_eq!(runner.configuration().get("color"), Some("blue".to_string()));
    assert_eq!(Calls::get(&fixture.calls.config_updates), 0);

    runner.startup().unwrap();
    runner.update_configuration(&update).unwrap();
    assert_eq!(Calls::get(&fixture.calls.config_updates), 1);
    assert!(fixture
        .temp
        .path()
        .join("internal")
        .join("live.yaml")
        .exists());
}

#[test]
fn test_reentrant_call_is_rejected() {
    let slot: Arc<Mutex<Option<Arc<LiveActivityRunner>>>> = Arc::new(Mutex::new(None));
    let outcome: Arc<Mutex<Option<Result<ActivityStatus, RunnerError>>>> = Arc::new(Mutex::new(None));

    let hook: Hook = {
        let slot = Arc::clone(&slot);
        let outcome = Arc::clone(&outcome);
        Arc::new(move || {
            let runner = slot.lock().clone();
            if let Some(runner) = runner {
                *outcome.lock() = Some(runner.sample_status());
            }
        })
    };

    let fixture = RunnerFixture::new(Script {
        on_startup: Some(hook),
        ..Default::default()
    });
    *slot.lock() = Some(Arc::clone(&fixture.runner));

    fixture.runner.startup().unwrap();

    match outcome.lock().take() {
        Some(Err(RunnerError::Lock(LockError::Nested { held, requested, .. }))) => {
            assert_eq!(held, LockOperation::Startup);
            assert_eq!(requested, LockOperation::Status);
        }
        other => panic!("expected nested lock error, got {:?}", other.map(|r| r.map(|_| ()))),
    }

    // The outer startup still completed and the lock was released once.
    assert_eq!(fixture.runner.cached_status().state, ActivityState::Running);
    assert_eq!(fixture.runner.lock_holder(), LockOperation::Neutral);

    let runner = Arc::clone(&fixture.runner);
    let sampled = thread::spawn(move || runner.sample_status().map(|s| s.state))
        .join()
        .unwrap();
    assert_eq!(sampled.unwrap(), ActivityState::Running);

    slot.lock().take();
}

#[test]
fn test_interrupted_lock_wait() {
    let fixture = RunnerFixture::new(Script {
        startup_delay: Some(Duration::from_millis(400)),
        ..Default::default()
    });
    let runner = &fixture.runner;

    thread::scope(|s| {
        let starting = s.spawn(|| runner.startup());
        thread::sleep(Duration::from_millis(50));
        assert_eq!(runner.lock_holder(), LockOperation::Startup);

        let waiting = s.spawn(|| runner.sample_status().map(|_| ()));
        thread::sleep(Duration::from_millis(150));
        runner.interrupt_lock_waiters();

        assert!(matches!(
            waiting.join().unwrap(),
            Err(RunnerError::Lock(LockError::Interrupted { .. }))
        ));
        starting.join().unwrap().unwrap();
    });

    assert_eq!(runner.cached_status().state, ActivityState::Running);
}

#[test]
fn test_waiter_proceeds_after_long_hold() {
    let fixture = RunnerFixture::new(Script {
        startup_delay: Some(Duration::from_millis(200)),
        ..Default::default()
    });
    let runner = &fixture.runner;

    thread::scope(|s| {
        let starting = s.spawn(|| runner.startup());
        thread::sleep(Duration::from_millis(30));

        // Waits through several lock wait slices, then sees the started instance.
        let status = runner.sample_status().unwrap();
        assert_eq!(status.state, ActivityState::Running);
        starting.join().unwrap().unwrap();
    });
}

#[test]
fn test_wait_keeps_retrying_past_each_slice() {
    let fixture = RunnerFixture::new(Script {
        startup_delay: Some(Duration::from_millis(300)),
        ..Default::default()
    });
    let runner = &fixture.runner;

    thread::scope(|s| {
        let starting = s.spawn(|| runner.startup());
        thread::sleep(Duration::from_millis(30));

        let waiting = s.spawn(|| runner.sample_status().map(|status| status.state));
        thread::sleep(Duration::from_millis(150));

        // Still blocked behind startup after more than one slice.
        assert!(!waiting.is_finished());
        assert_eq!(runner.lock_holder(), LockOperation::Startup);
        assert!(runner.slow_lock_waits() >= 1);

        assert_eq!(waiting.join().unwrap().unwrap(), ActivityState::Running);
        starting.join().unwrap().unwrap();
    });

    // 50ms slices over roughly 270ms of waiting.
    assert!(runner.slow_lock_waits() >= 3);
}
