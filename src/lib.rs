//! liveactivity - Node-local lifecycle runtime for live activities
//!
//! Manages dynamically deployed units of application logic ("activities")
//! identified by UUID: starting, stopping, activating and deactivating them
//! safely against live user code, and reporting every status change.
//!
//! # Architecture
//!
//! - Every activity has a runner owning its instance and an instance lock
//!   that serializes lifecycle calls against it
//! - Execution engines plug in through a versioned wrapper factory registry
//! - The runtime dispatches commands to runners and funnels every status
//!   change through a single-consumer event queue, which publishes, alerts
//!   and advances multi-step goals in order
//!
//! # Modules
//!
//! - `adapters`: Collaborator interfaces and simple implementations
//! - `core`: Lock, runner, factory registry, goals and the runtime
//! - `domain`: States, statuses, transitions and the activity contract
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Drive the runtime from stdin
//! echo "status 5b3c6a7e-52b1-4d84-8d7e-2f3b0c1f9a10" | liveactivity run
//!
//! # Show installed activities
//! liveactivity list
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use core::{
    ActivityWrapperFactory, LiveActivityRunner, LiveActivityRuntime, RuntimeComponents,
    WrapperFactoryRegistry,
};
pub use domain::{Activity, ActivityState, ActivityStatus, ActivityWrapper, InstalledLiveActivity};
