//! A task group with a growing completion barrier.
//!
//! [`TaskGroup::join_all`] waits for every task spawned on the group,
//! including tasks spawned by other tasks while the join is already waiting.
//! A child is always spawned before its parent returns, so the outstanding
//! count cannot reach zero while any work is still being discovered.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// How a spawned task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion<L, T> {
    /// The task ran to completion.
    Finished(T),
    /// The group was cancelled before the task finished (or started).
    Cancelled(L),
}

/// Spawns tasks, cancels them together and waits for all of them.
///
/// Cloning gives another handle to the same group, which is how tasks spawn
/// children. Every task is labelled with an `L` so cancelled tasks can still
/// be told apart.
pub struct TaskGroup<L, T> {
    tracker: TaskTracker,
    token: CancellationToken,
    limit: Option<Arc<Semaphore>>,
    tx: mpsc::UnboundedSender<Completion<L, T>>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Completion<L, T>>>>,
}

impl<L, T> Clone for TaskGroup<L, T> {
    fn clone(&self) -> Self {
        Self {
            tracker: self.tracker.clone(),
            token: self.token.clone(),
            limit: self.limit.clone(),
            tx: self.tx.clone(),
            rx: Arc::clone(&self.rx),
        }
    }
}

impl<L, T> TaskGroup<L, T>
where
    L: Send + 'static,
    T: Send + 'static,
{
    /// Create a group, optionally capping how many tasks run at once.
    ///
    /// The cap is enforced inside each task, so [`spawn`](Self::spawn) never
    /// waits and a parent never blocks on its own children.
    pub fn new(max_in_flight: Option<usize>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tracker: TaskTracker::new(),
            token: CancellationToken::new(),
            limit: max_in_flight.map(|max| Arc::new(Semaphore::new(max.max(1)))),
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Spawn `task` on the current runtime.
    ///
    /// If the group is cancelled before the task completes, the task is
    /// dropped at its next suspension point and reported as
    /// [`Cancelled`](Completion::Cancelled) with its label.
    pub fn spawn<F>(&self, label: L, task: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        let token = self.token.clone();
        let limit = self.limit.clone();
        let tx = self.tx.clone();
        self.tracker.spawn(async move {
            let run = async move {
                // The semaphore is never closed, so acquiring only fails if it is gone.
                let _permit = match limit {
                    Some(semaphore) => semaphore.acquire_owned().await.ok(),
                    None => None,
                };
                task.await
            };
            let completion = tokio::select! {
                biased;
                () = token.cancelled() => Completion::Cancelled(label),
                output = run => Completion::Finished(output),
            };
            // Receiver lives as long as any handle to the group.
            _ = tx.send(completion);
        });
    }

    /// Cancel every task that has not finished yet.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the group is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Number of tasks that have not finished yet.
    pub fn outstanding(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for every task, then return how each one ended.
    ///
    /// Completions come back in the order tasks finished.
    pub async fn join_all(&self) -> Vec<Completion<L, T>> {
        self.tracker.close();
        self.tracker.wait().await;
        let mut rx = self.rx.lock().await;
        let mut completions = Vec::new();
        while let Ok(completion) = rx.try_recv() {
            completions.push(completion);
        }
        completions
    }
}
