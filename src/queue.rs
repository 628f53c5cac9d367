//! Per-user task queue: the engine's only serialization primitive.
//!
//! Every inbound event for a user, message or watchdog-originated, runs
//! through here. Tasks for one user execute strictly one at a time in
//! enqueue order, including their awaits, so overlapping webhook retries
//! can never interleave against the same session. Tasks for different
//! users run on independent workers and interleave freely.
//!
//! Each active user gets a flume mailbox plus one drain worker. The worker
//! takes the map lock only to decide whether to exit, so the
//! empty-check-and-remove cannot race a concurrent enqueue, and the
//! mailbox is deallocated the moment it drains.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use rustc_hash::FxHashMap;
use tokio::sync::Notify;

use crate::error::EngineError;

/// One queued unit of work for a single user.
pub type Task = BoxFuture<'static, Result<(), EngineError>>;

/// Serializes task execution per user id.
#[derive(Clone, Debug, Default)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

#[derive(Default)]
struct QueueInner {
    mailboxes: Mutex<FxHashMap<String, flume::Sender<Task>>>,
    drained: Notify,
}

impl std::fmt::Debug for QueueInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueInner")
            .field("active_users", &self.lock().len())
            .finish()
    }
}

impl QueueInner {
    fn lock(&self) -> std::sync::MutexGuard<'_, FxHashMap<String, flume::Sender<Task>>> {
        self.mailboxes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TaskQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a task behind any in-flight work for this user.
    ///
    /// Spawns a drain worker if the user has no active mailbox.
    pub fn enqueue(&self, user_id: &str, task: Task) {
        let mut map = self.inner.lock();
        if let Some(tx) = map.get(user_id) {
            // Worker exit removes the sender under this same lock, so an
            // entry found here is guaranteed live.
            let _ = tx.send(task);
            return;
        }
        let (tx, rx) = flume::unbounded();
        let _ = tx.send(task);
        map.insert(user_id.to_string(), tx);
        drop(map);

        let inner = self.inner.clone();
        let user = user_id.to_string();
        tokio::spawn(async move {
            drain(inner, user, rx).await;
        });
    }

    /// Number of users with a live mailbox (tasks queued or running).
    #[must_use]
    pub fn active_users(&self) -> usize {
        self.inner.lock().len()
    }

    /// Wait until every mailbox has drained and been deallocated.
    pub async fn drained(&self) {
        loop {
            let notified = self.inner.drained.notified();
            if self.inner.lock().is_empty() {
                return;
            }
            notified.await;
        }
    }
}

async fn drain(inner: Arc<QueueInner>, user: String, rx: flume::Receiver<Task>) {
    loop {
        let task = match rx.try_recv() {
            Ok(task) => task,
            Err(_) => {
                // Decide exit under the lock: either a task slipped in, or
                // we remove the mailbox before anyone else can see it empty.
                let mut map = inner.lock();
                match rx.try_recv() {
                    Ok(task) => {
                        drop(map);
                        task
                    }
                    Err(_) => {
                        map.remove(&user);
                        drop(map);
                        inner.drained.notify_waiters();
                        return;
                    }
                }
            }
        };

        // Failures are isolated per task; the queue keeps draining.
        match AssertUnwindSafe(task).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                tracing::warn!(user = %user, %error, "user task failed");
            }
            Err(_) => {
                tracing::error!(user = %user, "user task panicked");
            }
        }
    }
}
