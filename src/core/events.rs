//! The runtime's single-consumer event queue.
//!
//! Activity callbacks arrive on arbitrary threads, often while the reporting
//! runner still holds its instance lock. They are only ever turned into
//! [`RuntimeEvent`]s here; all side effects happen on the consumer.

use tokio::sync::{mpsc, oneshot};
use tracing::debug;
use uuid::Uuid;

use crate::domain::{ActivityListener, ActivityStatus};

use super::runner::RunnerListener;

/// Work for the event consumer
#[derive(Debug)]
pub enum RuntimeEvent {
    /// An activity reported a status change
    StatusChange {
        uuid: Uuid,
        old: ActivityStatus,
        new: ActivityStatus,
    },

    /// A status was set on a runner with no live instance
    NoInstanceStatus { uuid: Uuid },

    /// Advance the pending goal using the runner's cached state
    DriveGoal { uuid: Uuid },

    /// Signal once every earlier event has been handled
    Flush(oneshot::Sender<()>),

    /// Stop the consumer
    Stop,
}

/// Cloneable handle for submitting events
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<RuntimeEvent>,
}

impl EventSender {
    /// Create a queue and its receiving end
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RuntimeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue an event; returns false if the consumer is gone
    pub fn submit(&self, event: RuntimeEvent) -> bool {
        match self.tx.send(event) {
            Ok(()) => true,
            Err(mpsc::error::SendError(event)) => {
                debug!(?event, "Event queue closed, dropping event");
                false
            }
        }
    }
}

impl ActivityListener for EventSender {
    fn on_activity_status_change(&self, uuid: Uuid, old: &ActivityStatus, new: &ActivityStatus) {
        self.submit(RuntimeEvent::StatusChange {
            uuid,
            old: old.clone(),
            new: new.clone(),
        });
    }
}

impl RunnerListener for EventSender {
    fn on_no_instance_status_event(&self, uuid: Uuid) {
        self.submit(RuntimeEvent::NoInstanceStatus { uuid });
    }
}
