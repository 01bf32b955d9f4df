//! Domain types for the live activity runtime.
//!
//! This module contains the core data structures:
//! - State: Activity states and status reports
//! - Transition: Command-level lifecycle transitions
//! - Activity: The contract user-supplied activity code implements
//! - Installed: Metadata for installed activities

pub mod activity;
pub mod installed;
pub mod state;
pub mod transition;

// Re-export commonly used types
pub use activity::{
    Activity, ActivityContext, ActivityExecutionContext, ActivityListener, ActivityWrapper,
    StatusCell,
};
pub use installed::InstalledLiveActivity;
pub use state::{ActivityState, ActivityStatus};
pub use transition::{ActivityStateTransition, TransitionResult};
