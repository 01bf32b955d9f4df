//! Health sampling of running activities.
//!
//! The sampler only keeps the set of runners worth watching; whoever owns
//! the schedule calls [`SimpleRunnerSampler::sample_all`] periodically.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::LiveActivityRunner;
use crate::domain::ActivityStatus;

use super::RunnerSampler;

/// Sampler holding the runners that came up
#[derive(Default)]
pub struct SimpleRunnerSampler {
    runners: Mutex<Vec<Arc<LiveActivityRunner>>>,
}

impl SimpleRunnerSampler {
    /// Create an empty sampler
    pub fn new() -> Self {
        Self::default()
    }

    /// UUIDs currently being sampled
    pub fn sampled(&self) -> Vec<Uuid> {
        self.runners.lock().iter().map(|r| r.uuid()).collect()
    }

    /// Sample every watched runner, dropping the ones that stopped running.
    ///
    /// Blocks on each runner's instance lock in turn.
    pub fn sample_all(&self) -> Vec<(Uuid, ActivityStatus)> {
        let runners: Vec<_> = self.runners.lock().clone();
        let mut results = Vec::with_capacity(runners.len());
        let mut stopped = Vec::new();

        for runner in runners {
            match runner.sample_status() {
                Ok(status) => {
                    if !status.state.is_running() {
                        stopped.push(runner.uuid());
                    }
                    results.push((runner.uuid(), status));
                }
                Err(e) => {
                    warn!(uuid = %runner.uuid(), error = %e, "Could not sample live activity");
                }
            }
        }

        if !stopped.is_empty() {
            debug!(count = stopped.len(), "No longer sampling stopped live activities");
            self.runners.lock().retain(|r| !stopped.contains(&r.uuid()));
        }

        results
    }
}

impl RunnerSampler for SimpleRunnerSampler {
    fn start_sampling(&self, runner: Arc<LiveActivityRunner>) {
        let mut runners = self.runners.lock();
        if !runners.iter().any(|r| r.uuid() == runner.uuid()) {
            debug!(uuid = %runner.uuid(), "Sampling live activity");
            runners.push(runner);
        }
    }
}
