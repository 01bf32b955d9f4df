//! Wrapper Factory Registry Tests
//!
//! Version selection, replacement and the retrying resolution used when an
//! execution engine registers after the first command that needs it.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use semver::Version;

use common::ScriptedFactory;
use liveactivity::core::{
    ActivityWrapperFactory, FactoryError, FactoryRetryPolicy, WrapperFactoryRegistry,
    DEFAULT_VERSION,
};

fn factory(activity_type: &str, version: Option<&str>) -> Arc<dyn ActivityWrapperFactory> {
    Arc::new(ScriptedFactory::new(activity_type, version))
}

fn quick_registry(attempts: u32, delay_ms: u64) -> WrapperFactoryRegistry {
    WrapperFactoryRegistry::new().with_retry_policy(FactoryRetryPolicy {
        attempts,
        delay: Duration::from_millis(delay_ms),
    })
}

fn version_of(found: &Arc<dyn ActivityWrapperFactory>) -> Version {
    found.version().unwrap_or(DEFAULT_VERSION)
}

#[test]
fn test_highest_version_without_range() {
    let registry = WrapperFactoryRegistry::new();
    registry.register(factory("web", Some("1.0.0")));
    registry.register(factory("web", Some("2.5.0")));
    registry.register(factory("web", Some("1.5.0")));

    let found = registry.lookup("web").unwrap().unwrap();
    assert_eq!(version_of(&found), Version::new(2, 5, 0));
}

#[test]
fn test_range_selects_highest_match() {
    let registry = WrapperFactoryRegistry::new();
    registry.register(factory("web", Some("1.0.0")));
    registry.register(factory("web", Some("1.5.0")));
    registry.register(factory("web", Some("2.5.0")));

    let found = registry.lookup("web;[1.0,2.0)").unwrap().unwrap();
    assert_eq!(version_of(&found), Version::new(1, 5, 0));

    let exact = registry.lookup("web;1.0").unwrap().unwrap();
    assert_eq!(version_of(&exact), Version::new(1, 0, 0));

    assert!(registry.lookup("web;[3.0,)").unwrap().is_none());
}

#[test]
fn test_reversed_range_bounds_are_swapped() {
    let registry = WrapperFactoryRegistry::new();
    registry.register(factory("web", Some("1.0.0")));
    registry.register(factory("web", Some("1.5.0")));
    registry.register(factory("web", Some("2.5.0")));

    let found = registry.lookup("web;[2.0,1.0)").unwrap().unwrap();
    assert_eq!(version_of(&found), Version::new(1, 5, 0));

    let single = registry.lookup("web;[1.0,1.0)").unwrap().unwrap();
    assert_eq!(version_of(&single), Version::new(1, 0, 0));
}

#[test]
fn test_type_names_are_case_insensitive() {
    let registry = WrapperFactoryRegistry::new();
    registry.register(factory("Native", Some("1.0.0")));

    assert!(registry.lookup("native").unwrap().is_some());
    assert!(registry.lookup("NATIVE;[1.0,2.0)").unwrap().is_some());
    assert_eq!(
        registry.registered(),
        vec![("native".to_string(), Version::new(1, 0, 0))]
    );
}

#[test]
fn test_unversioned_factory_gets_default_version() {
    let registry = WrapperFactoryRegistry::new();
    registry.register(factory("script", None));

    assert_eq!(
        registry.registered(),
        vec![("script".to_string(), DEFAULT_VERSION)]
    );
    assert!(registry.lookup("script;0.0.0").unwrap().is_some());
}

#[test]
fn test_stale_unregister_is_ignored() {
    let registry = WrapperFactoryRegistry::new();
    let original = factory("web", Some("1.0.0"));
    let replacement = factory("web", Some("1.0.0"));

    registry.register(Arc::clone(&original));
    registry.register(Arc::clone(&replacement));

    // The replaced factory no longer owns the key.
    assert!(!registry.unregister(&original));
    assert!(registry.lookup("web").unwrap().is_some());

    assert!(registry.unregister(&replacement));
    assert!(registry.lookup("web").unwrap().is_none());
    assert!(registry.registered().is_empty());

    assert!(!registry.unregister(&replacement));
}

#[test]
fn test_invalid_range_is_rejected() {
    let registry = WrapperFactoryRegistry::new();
    registry.register(factory("web", Some("1.0.0")));

    assert!(matches!(
        registry.lookup("web;(1.0,2.0)"),
        Err(FactoryError::InvalidRange { .. })
    ));
}

#[tokio::test]
async fn test_invalid_range_fails_without_retrying() {
    let registry = quick_registry(5, 200);

    let started = Instant::now();
    let result = registry.resolve("web;[1.0,2.0").await;

    assert!(matches!(result, Err(FactoryError::InvalidRange { .. })));
    assert!(started.elapsed() < Duration::from_millis(200));
}

#[tokio::test]
async fn test_resolve_gives_up_after_retries() {
    let registry = quick_registry(3, 50);
    registry.register(factory("web", Some("2.5.0")));

    let started = Instant::now();
    let result = registry.resolve("web;[1.0,2.0)").await;
    let elapsed = started.elapsed();

    match result {
        Err(FactoryError::NotFound {
            activity_type,
            range,
            attempts,
        }) => {
            assert_eq!(activity_type, "web");
            assert_eq!(range, "[1.0.0, 2.0.0)");
            assert_eq!(attempts, 3);
        }
        Err(other) => panic!("expected NotFound, got {}", other),
        Ok(_) => panic!("expected NotFound, got a factory"),
    }

    // Two pauses between three attempts.
    assert!(elapsed >= Duration::from_millis(100));
}

#[tokio::test]
async fn test_resolve_unknown_type_reports_any_range() {
    let registry = quick_registry(1, 10);

    match registry.resolve("flash").await {
        Err(FactoryError::NotFound { range, attempts, .. }) => {
            assert_eq!(range, "any");
            assert_eq!(attempts, 1);
        }
        Err(other) => panic!("expected NotFound, got {}", other),
        Ok(_) => panic!("expected NotFound, got a factory"),
    }
}

#[tokio::test]
async fn test_late_registration_is_resolved() {
    let registry = Arc::new(quick_registry(20, 20));

    let late = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            registry.register(factory("web", Some("1.2.0")));
        })
    };

    let found = registry.resolve("web;[1.0,2.0)").await.unwrap();
    assert_eq!(version_of(&found), Version::new(1, 2, 0));

    late.await.unwrap();
}
