use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot, Semaphore};
use tracing::{debug, error, warn};

use crate::config::QueueFullPolicy;

type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

struct Job {
    fut: TaskFuture,
    done: Option<oneshot::Sender<()>>,
    guard: Option<InFlightGuard>,
}

/// What happened to a delayed submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued,
    /// A copy for the same target is already queued or running.
    Coalesced,
    Dropped,
}

/// Bounded pool executing copy tasks: a queue of at most `queue_size` jobs
/// drained by up to `max_workers` concurrent tasks. Tasks share no mutable
/// state; coordination is limited to the per-target in-flight set.
pub struct Copier {
    tx: mpsc::Sender<Job>,
    queue_full: QueueFullPolicy,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl Copier {
    pub fn new(max_workers: usize, queue_size: usize, queue_full: QueueFullPolicy) -> Self {
        let (tx, rx) = mpsc::channel(queue_size.max(1));
        tokio::spawn(dispatch(rx, Arc::new(Semaphore::new(max_workers.max(1)))));
        Self {
            tx,
            queue_full,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Enqueues a task and returns without waiting for completion. Submissions
    /// for a target already in flight coalesce. When the queue is full the
    /// configured policy decides between caller backpressure and dropping.
    pub async fn submit(
        &self,
        target: &str,
        fut: impl Future<Output = ()> + Send + 'static,
    ) -> SubmitOutcome {
        let Some(guard) = self.track(target) else {
            debug!(target, "copy already in flight, coalescing");
            return SubmitOutcome::Coalesced;
        };
        let job = Job {
            fut: Box::pin(fut),
            done: None,
            guard: Some(guard),
        };

        match self.queue_full {
            QueueFullPolicy::Block => {
                if self.tx.send(job).await.is_err() {
                    error!(target, "copy queue closed, dropping task");
                    return SubmitOutcome::Dropped;
                }
                SubmitOutcome::Queued
            }
            QueueFullPolicy::Drop => match self.tx.try_send(job) {
                Ok(()) => SubmitOutcome::Queued,
                Err(_) => {
                    warn!(target, "copy queue full, dropping task");
                    SubmitOutcome::Dropped
                }
            },
        }
    }

    /// Enqueues a task and blocks the caller until it terminates.
    pub async fn submit_and_wait(
        &self,
        target: &str,
        fut: impl Future<Output = ()> + Send + 'static,
    ) {
        let (done_tx, done_rx) = oneshot::channel();
        let job = Job {
            fut: Box::pin(fut),
            done: Some(done_tx),
            // A concurrent copy of the same target is fine here: the task's
            // existence short-circuit makes the extra run cheap.
            guard: self.track(target),
        };
        if self.tx.send(job).await.is_err() {
            error!(target, "copy queue closed, dropping task");
            return;
        }
        let _ = done_rx.await;
    }

    /// Marks `target` as in flight for work executed outside the pool.
    /// Returns `None` when a copy for it is already tracked.
    pub fn track(&self, target: &str) -> Option<InFlightGuard> {
        let mut set = lock_set(&self.in_flight);
        if !set.insert(target.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            set: Arc::clone(&self.in_flight),
            key: target.to_string(),
        })
    }
}

/// Releases the in-flight entry on drop, on every exit path.
pub struct InFlightGuard {
    set: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock_set(&self.set).remove(&self.key);
    }
}

fn lock_set(set: &Mutex<HashSet<String>>) -> std::sync::MutexGuard<'_, HashSet<String>> {
    match set.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

async fn dispatch(mut rx: mpsc::Receiver<Job>, workers: Arc<Semaphore>) {
    while let Some(job) = rx.recv().await {
        let Ok(permit) = Arc::clone(&workers).acquire_owned().await else {
            break;
        };
        tokio::spawn(async move {
            let Job { fut, done, guard } = job;
            fut.await;
            drop(guard);
            if let Some(done) = done {
                let _ = done.send(());
            }
            drop(permit);
        });
    }
}
