//! Goal-directed multi-step transitions.
//!
//! A goal is an ordered list of transitions registered for one activity,
//! such as `[Startup, Activate]` for activating a stopped activity. The
//! event consumer advances it each time a new state is observed.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{ActivityState, ActivityStateTransition, TransitionResult};

use super::runner::{LiveActivityRunner, RunnerError};

/// Something a goal step can be performed against
pub trait TransitionTarget {
    /// UUID of the activity
    fn uuid(&self) -> Uuid;

    /// Perform `transition`, given the state it was checked against
    fn perform(&self, transition: ActivityStateTransition, current: ActivityState) -> Result<(), RunnerError>;
}

impl TransitionTarget for LiveActivityRunner {
    fn uuid(&self) -> Uuid {
        LiveActivityRunner::uuid(self)
    }

    fn perform(&self, transition: ActivityStateTransition, current: ActivityState) -> Result<(), RunnerError> {
        self.perform_transition(transition, current)
    }
}

/// Where a goal stands after being advanced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoalProgress {
    /// No goal was registered
    Idle,

    /// Steps remain; waiting for the next state
    InProgress,

    /// Every step is done
    Done,

    /// The goal was given up
    Abandoned,
}

/// Pending goals, one per activity
#[derive(Debug, Default)]
pub struct GoalTransitioners {
    pending: Mutex<HashMap<Uuid, VecDeque<ActivityStateTransition>>>,
}

impl GoalTransitioners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a goal, superseding any goal already pending for `uuid`
    pub fn register<I>(&self, uuid: Uuid, steps: I)
    where
        I: IntoIterator<Item = ActivityStateTransition>,
    {
        let steps: VecDeque<_> = steps.into_iter().collect();
        debug!(%uuid, ?steps, "Registering goal transitions");

        if let Some(previous) = self.pending.lock().insert(uuid, steps) {
            info!(%uuid, ?previous, "Superseded pending goal transitions");
        }
    }

    /// Steps still pending for `uuid`
    pub fn pending_steps(&self, uuid: Uuid) -> Option<Vec<ActivityStateTransition>> {
        self.pending
            .lock()
            .get(&uuid)
            .map(|steps| steps.iter().copied().collect())
    }

    /// Whether a goal is pending for `uuid`
    pub fn is_pending(&self, uuid: Uuid) -> bool {
        self.pending.lock().contains_key(&uuid)
    }

    /// Drop the goal for `uuid`; returns whether one was pending
    pub fn abandon(&self, uuid: Uuid) -> bool {
        let removed = self.pending.lock().remove(&uuid).is_some();
        if removed {
            warn!(%uuid, "Abandoned goal transitions");
        }
        removed
    }

    /// Drop every pending goal
    pub fn clear(&self) {
        self.pending.lock().clear();
    }

    /// Advance the goal for `target` now that it is in `state`.
    ///
    /// Runner calls made here block on the instance lock.
    pub fn transition<T>(&self, target: &T, state: ActivityState) -> GoalProgress
    where
        T: TransitionTarget + ?Sized,
    {
        let uuid = target.uuid();
        let Some(mut steps) = self.pending.lock().remove(&uuid) else {
            return GoalProgress::Idle;
        };

        let progress = advance(&mut steps, target, state);
        match progress {
            GoalProgress::InProgress => {
                let mut pending = self.pending.lock();
                if pending.contains_key(&uuid) {
                    debug!(%uuid, "Goal superseded while it was being advanced");
                } else {
                    pending.insert(uuid, steps);
                }
            }
            GoalProgress::Done => info!(%uuid, %state, "Goal transitions complete"),
            GoalProgress::Abandoned => warn!(%uuid, %state, ?steps, "Abandoned goal transitions"),
            GoalProgress::Idle => {}
        }

        progress
    }
}

fn advance<T>(steps: &mut VecDeque<ActivityStateTransition>, target: &T, state: ActivityState) -> GoalProgress
where
    T: TransitionTarget + ?Sized,
{
    if state.is_error() {
        return GoalProgress::Abandoned;
    }

    while let Some(&step) = steps.front() {
        match step.can_transition(state) {
            TransitionResult::Ok => {
                if let Err(e) = target.perform(step, state) {
                    warn!(uuid = %target.uuid(), %step, error = %e, "Goal step failed");
                    return GoalProgress::Abandoned;
                }
                steps.pop_front();
                return if steps.is_empty() {
                    GoalProgress::Done
                } else {
                    GoalProgress::InProgress
                };
            }
            TransitionResult::Noop => {
                steps.pop_front();
            }
            TransitionResult::Illegal if state.is_transient() => return GoalProgress::InProgress,
            TransitionResult::Illegal => return GoalProgress::Abandoned,
        }
    }

    GoalProgress::Done
}
