//! The per-activity instance lock.
//!
//! Acquisition blocks in timed slices and logs every slice it spends
//! waiting, naming the operation currently holding the lock. A thread that
//! re-enters the lock from inside a protected section is a programming
//! error: the nested acquisition is released immediately and reported as
//! [`LockError::Nested`].

use std::cell::{RefCell, RefMut};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

/// Default time slice between lock-wait diagnostics
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(20);

/// How often a waiter checks for interruption
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Shortest wait slice; smaller values are raised to this
pub const MIN_LOCK_WAIT: Duration = Duration::from_millis(10);

/// The operation holding the instance lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOperation {
    /// Nothing holds the lock
    Neutral,
    Configure,
    Startup,
    Activate,
    Deactivate,
    Status,
    Shutdown,
    Obtain,
}

impl fmt::Display for LockOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Neutral => "NEUTRAL",
            Self::Configure => "CONFIGURE",
            Self::Startup => "STARTUP",
            Self::Activate => "ACTIVATE",
            Self::Deactivate => "DEACTIVATE",
            Self::Status => "STATUS",
            Self::Shutdown => "SHUTDOWN",
            Self::Obtain => "OBTAIN",
        };
        f.write_str(name)
    }
}

/// Failures acquiring the instance lock
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Wait on the instance lock for activity {uuid} was interrupted")]
    Interrupted { uuid: Uuid },

    #[error("Nested calls to instance lock protected methods for activity {uuid}: {requested} attempted while in {held}")]
    Nested {
        uuid: Uuid,
        held: LockOperation,
        requested: LockOperation,
    },
}

#[derive(Debug)]
struct Holder {
    thread: Option<ThreadId>,
    operation: LockOperation,
}

impl Holder {
    fn neutral() -> Self {
        Self {
            thread: None,
            operation: LockOperation::Neutral,
        }
    }
}

/// Exclusive lock around the state of one activity
pub struct InstanceLock<T> {
    uuid: Uuid,
    wait_slice: Duration,
    mutex: ReentrantMutex<RefCell<T>>,
    holder: Mutex<Holder>,
    interrupts: AtomicU64,
    slow_waits: AtomicU64,
}

impl<T> InstanceLock<T> {
    /// Create a lock for the activity `uuid`
    pub fn new(uuid: Uuid, wait_slice: Duration, value: T) -> Self {
        Self {
            uuid,
            wait_slice: wait_slice.max(MIN_LOCK_WAIT),
            mutex: ReentrantMutex::new(RefCell::new(value)),
            holder: Mutex::new(Holder::neutral()),
            interrupts: AtomicU64::new(0),
            slow_waits: AtomicU64::new(0),
        }
    }

    /// Time between lock-wait diagnostics
    pub fn wait_slice(&self) -> Duration {
        self.wait_slice
    }

    /// Wait slices that elapsed without acquiring, across all waiters
    pub fn slow_waits(&self) -> u64 {
        self.slow_waits.load(Ordering::SeqCst)
    }

    /// The operation currently holding the lock
    pub fn holder(&self) -> LockOperation {
        self.holder.lock().operation
    }

    /// Abort every wait currently blocked on this lock
    pub fn interrupt_waiters(&self) {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
    }

    /// Block until the lock is held for `operation`.
    ///
    /// Waits indefinitely unless interrupted, logging once per wait slice.
    pub fn acquire(&self, operation: LockOperation) -> Result<InstanceLockGuard<'_, T>, LockError> {
        let generation = self.interrupts.load(Ordering::SeqCst);
        let started = Instant::now();
        let mut next_warning = self.wait_slice;

        let guard = loop {
            if let Some(guard) = self.mutex.try_lock_for(POLL_INTERVAL.min(self.wait_slice)) {
                break guard;
            }

            if self.interrupts.load(Ordering::SeqCst) != generation {
                warn!(uuid = %self.uuid, %operation, "A wait on the activity instance lock was interrupted");
                return Err(LockError::Interrupted { uuid: self.uuid });
            }

            let waited = started.elapsed();
            if waited >= next_warning {
                self.slow_waits.fetch_add(1, Ordering::SeqCst);
                warn!(
                    uuid = %self.uuid,
                    waited_ms = waited.as_millis() as u64,
                    holder = %self.holder(),
                    %operation,
                    "A wait on the activity instance lock has been blocked"
                );
                next_warning += self.wait_slice;
            }
        };

        let current = thread::current().id();
        let mut holder = self.holder.lock();
        if holder.thread == Some(current) {
            let held = holder.operation;
            drop(holder);
            drop(guard);
            return Err(LockError::Nested {
                uuid: self.uuid,
                held,
                requested: operation,
            });
        }

        *holder = Holder {
            thread: Some(current),
            operation,
        };
        drop(holder);

        Ok(InstanceLockGuard { lock: self, guard })
    }
}

/// Proof of holding an [`InstanceLock`]; releases on drop
pub struct InstanceLockGuard<'a, T> {
    lock: &'a InstanceLock<T>,
    guard: ReentrantMutexGuard<'a, RefCell<T>>,
}

impl<T> InstanceLockGuard<'_, T> {
    /// Mutable access to the protected state
    pub fn state(&self) -> RefMut<'_, T> {
        self.guard.borrow_mut()
    }
}

impl<T> Drop for InstanceLockGuard<'_, T> {
    fn drop(&mut self) {
        // Reset before the mutex itself is released by the field drop.
        *self.lock.holder.lock() = Holder::neutral();
    }
}
