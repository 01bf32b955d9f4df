//! Command-level state transitions.
//!
//! Each lifecycle command is checked against the activity's last known
//! state before anything touches the instance.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::state::ActivityState;

/// Outcome of checking a transition against a state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionResult {
    /// The transition can be performed
    Ok,

    /// Already where the transition would lead
    Noop,

    /// Not valid from the current state
    Illegal,
}

/// A lifecycle transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStateTransition {
    Startup,
    Activate,
    Deactivate,
    Shutdown,
}

impl ActivityStateTransition {
    /// Check whether the transition is possible from `state`
    pub fn can_transition(self, state: ActivityState) -> TransitionResult {
        use ActivityState::*;

        match self {
            Self::Startup => {
                if state.is_running() {
                    TransitionResult::Noop
                } else {
                    match state {
                        Ready | StartupFailure | ShutdownFailure | Crashed => TransitionResult::Ok,
                        _ => TransitionResult::Illegal,
                    }
                }
            }
            Self::Activate => match state {
                Running | ActivateFailure => TransitionResult::Ok,
                Active => TransitionResult::Noop,
                _ => TransitionResult::Illegal,
            },
            Self::Deactivate => match state {
                Active | ActivateFailure | DeactivateFailure => TransitionResult::Ok,
                Running => TransitionResult::Noop,
                _ => TransitionResult::Illegal,
            },
            Self::Shutdown => match state {
                Ready => TransitionResult::Noop,
                DeployAttempt | DeployFailure | DoesntExist | Unknown => TransitionResult::Illegal,
                _ => TransitionResult::Ok,
            },
        }
    }
}

impl fmt::Display for ActivityStateTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Startup => "startup",
            Self::Activate => "activate",
            Self::Deactivate => "deactivate",
            Self::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}
