//! # Synchronizer
//!
//! Runs operations on the game thread. The client is not thread safe, so calling its functions
//! (walking, sending packets) from another thread has to go through the [`ThreadSynchronizer`],
//! which queues the operation and runs it from the periodic hook.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use crossbeam_queue::SegQueue;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::{BindingError, Required, Result};
use crate::hooks::{names, PeriodicHook, SubscriptionId};

/// Options of the [`ThreadSynchronizer`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynchronizerOptions {
    /// Most operations run per tick, the rest waits for the next one
    pub max_tasks_per_iteration: usize,
}

impl Default for SynchronizerOptions {
    fn default() -> Self {
        Self {
            max_tasks_per_iteration: 10,
        }
    }
}

/// Queued operation
type Operation = Box<dyn FnOnce() + Send>;

/// Runs `action`, turning a panic into an error
fn run<T>(action: impl FnOnce() -> T) -> Result<T> {
    panic::catch_unwind(AssertUnwindSafe(action)).map_err(|payload| {
        let error = BindingError::from_panic(payload);
        log::error!("Synchronizer obtained an exception: {error}");
        error
    })
}

/// Executes operations on the thread calling the periodic function
pub struct ThreadSynchronizer {
    /// Options
    options: SynchronizerOptions,
    /// Source of the ticks
    periodic: Option<Arc<PeriodicHook>>,
    /// Operations waiting for a tick, in order
    queue: SegQueue<Operation>,
    /// Thread the last tick ran on
    target_thread: RwLock<Option<ThreadId>>,
    /// Subscription to the periodic hook while started
    subscription: Mutex<Option<SubscriptionId>>,
}

impl ThreadSynchronizer {
    /// Creates a stopped synchronizer
    pub fn new(periodic: Option<Arc<PeriodicHook>>, options: SynchronizerOptions) -> Arc<Self> {
        Arc::new(Self {
            options,
            periodic,
            queue: SegQueue::new(),
            target_thread: RwLock::new(None),
            subscription: Mutex::new(None),
        })
    }

    /// Starts draining the queue on every call of the periodic function
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let periodic = self.periodic.as_ref().required(
            "Could not start synchronizer, because the periodic hook is not present",
            names::PERIODIC,
        )?;

        let mut subscription = self.subscription.lock();
        if subscription.is_none() {
            let synchronizer: Weak<Self> = Arc::downgrade(self);
            *subscription = Some(periodic.subscribe(move || {
                if let Some(synchronizer) = synchronizer.upgrade() {
                    synchronizer.tick();
                }
            }));
            log::debug!("Synchronizer started");
        }
        Ok(())
    }

    /// Stops draining the queue; queued operations stay queued
    pub fn stop(&self) {
        if let (Some(id), Some(periodic)) = (self.subscription.lock().take(), &self.periodic) {
            periodic.unsubscribe(id);
            log::debug!("Synchronizer stopped");
        }
    }

    /// Whether the current thread is the one the queue is drained on
    pub fn is_synchronized(&self) -> bool {
        *self.target_thread.read() == Some(thread::current().id())
    }

    /// Amount of queued operations
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Runs up to `max_tasks_per_iteration` queued operations on the current thread
    ///
    /// Called by the periodic hook once started.
    pub fn tick(&self) {
        *self.target_thread.write() = Some(thread::current().id());

        for _ in 0..self.options.max_tasks_per_iteration {
            let Some(operation) = self.queue.pop() else {
                break;
            };
            let _ = run(operation);
        }
    }

    /// Queues `action`, or runs it right away if `execute_if_synchronized` is set and the current
    /// thread is the game thread
    pub fn enqueue_operation<F>(&self, action: F, execute_if_synchronized: bool)
    where
        F: FnOnce() + Send + 'static,
    {
        if execute_if_synchronized && self.is_synchronized() {
            let _ = run(action);
            return;
        }
        self.queue.push(Box::new(action));
    }

    /// Runs `action` on the game thread and returns its result
    ///
    /// On the game thread the action runs right away. Otherwise it is queued and the future resolves
    /// after the next tick ran it, or with [`BindingError::Cancelled`] when `token` is cancelled
    /// first. A cancelled action is still executed later, its result is discarded.
    pub async fn synchronize<T, F>(&self, action: F, token: &CancellationToken) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if self.is_synchronized() {
            return run(action);
        }
        if token.is_cancelled() {
            return Err(BindingError::Cancelled);
        }

        let (tx, rx) = oneshot::channel();
        self.queue.push(Box::new(move || {
            let _ = tx.send(run(action));
        }));

        tokio::select! {
            biased;
            result = rx => result.unwrap_or(Err(BindingError::OperationDropped)),
            _ = token.cancelled() => Err(BindingError::Cancelled),
        }
    }
}

impl Drop for ThreadSynchronizer {
    fn drop(&mut self) {
        self.stop();
    }
}
