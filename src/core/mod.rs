//! Core lifecycle orchestration.
//!
//! This module contains:
//! - InstanceLock: per-activity exclusive lock with holder tracking
//! - LiveActivityRunner: drives one activity instance
//! - WrapperFactoryRegistry: versioned execution-engine factories
//! - GoalTransitioners: multi-step transition goals
//! - LiveActivityRuntime: command dispatch and the event consumer

pub mod events;
pub mod factory;
pub mod goal;
pub mod lock;
pub mod runner;
pub mod runtime;

// Re-export commonly used types
pub use events::{EventSender, RuntimeEvent};
pub use factory::{
    parse_type_string, parse_version, ActivityWrapperFactory, FactoryError, FactoryRetryPolicy,
    VersionRange, WrapperFactoryRegistry, DEFAULT_VERSION, VERSION_RANGE_SEPARATOR,
};
pub use goal::{GoalProgress, GoalTransitioners, TransitionTarget};
pub use lock::{
    InstanceLock, InstanceLockGuard, LockError, LockOperation, DEFAULT_LOCK_WAIT, MIN_LOCK_WAIT,
};
pub use runner::{LiveActivityRunner, RunnerError, RunnerListener, RunnerParts};
pub use runtime::{LiveActivityRuntime, RemoveActivityResult, RuntimeComponents};
