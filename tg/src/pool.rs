//! Bounded-concurrency dispatch over an [`ErrorJoinGroup`]
//!
//! With a cap of zero every dispatched job gets its own task. With a cap of N
//! jobs go through a bounded queue drained by long-lived workers. Workers are
//! created lazily, one on each of the first N dispatches, so a pool never has
//! more workers than jobs.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Cancelled;
use crate::join::ErrorJoinGroup;

/// A unit of work handed to the pool
pub type Job<E> = BoxFuture<'static, Result<(), E>>;

type SharedReceiver<E> = Arc<Mutex<mpsc::Receiver<Job<E>>>>;

/// Dispatches jobs onto at most `cap` concurrent workers
pub struct WorkerPool<E> {
    cap: usize,
    group: ErrorJoinGroup<E>,
    queue: Option<mpsc::Sender<Job<E>>>,
    receiver: Option<SharedReceiver<E>>,
    dispatched: usize,
    workers: usize,
}

impl<E: Send + 'static> WorkerPool<E> {
    /// Create a pool over `group`; a `cap` of zero means uncapped
    pub fn new(cap: usize, group: ErrorJoinGroup<E>) -> Self {
        debug!(cap, "WorkerPool::new: called");
        Self {
            cap,
            group,
            queue: None,
            receiver: None,
            dispatched: 0,
            workers: 0,
        }
    }

    /// The token that stops dispatch; cancelled on the first job error
    pub fn token(&self) -> &CancellationToken {
        self.group.token()
    }

    /// Number of jobs dispatched so far
    pub fn dispatched(&self) -> usize {
        self.dispatched
    }

    /// Number of tasks spawned so far (workers, or one per job when uncapped)
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Hand a job to the pool
    ///
    /// Uncapped pools spawn the job directly. Capped pools enqueue it, waiting
    /// while the queue is full; if the group's token is cancelled first the job
    /// is dropped and [`Cancelled`] is returned.
    pub async fn dispatch(&mut self, job: Job<E>) -> Result<(), Cancelled> {
        let index = self.dispatched;
        self.dispatched += 1;
        debug!(index, cap = self.cap, "WorkerPool::dispatch: called");

        if self.cap == 0 {
            self.group.spawn(job);
            self.workers += 1;
            return Ok(());
        }

        if index == 0 {
            debug!(capacity = self.cap, "WorkerPool::dispatch: creating queue");
            let (tx, rx) = mpsc::channel(self.cap);
            self.queue = Some(tx);
            self.receiver = Some(Arc::new(Mutex::new(rx)));
        }

        if index < self.cap
            && let Some(receiver) = &self.receiver
        {
            debug!(worker = index, "WorkerPool::dispatch: spawning worker");
            let cancel = self.group.token().clone();
            self.group.spawn(worker(index, receiver.clone(), cancel));
            self.workers += 1;
        }

        let Some(queue) = &self.queue else {
            return Err(Cancelled);
        };
        let token = self.group.token();

        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(index, "WorkerPool::dispatch: cancelled before job was queued");
                Err(Cancelled)
            }
            sent = queue.send(job) => sent.map_err(|_| Cancelled),
        }
    }

    /// Close the queue and join every worker, returning the first job error
    pub async fn wait(self) -> Result<(), E> {
        debug!(dispatched = self.dispatched, workers = self.workers, "WorkerPool::wait: called");
        let WorkerPool {
            group, queue, receiver, ..
        } = self;
        drop(queue);
        drop(receiver);
        group.wait().await
    }
}

/// Pull jobs until the queue closes, a job fails, or the group is cancelled
async fn worker<E>(id: usize, jobs: SharedReceiver<E>, cancel: CancellationToken) -> Result<(), E> {
    loop {
        let job = jobs.lock().await.recv().await;
        let Some(job) = job else {
            debug!(worker = id, "worker: queue closed");
            return Ok(());
        };
        if cancel.is_cancelled() {
            debug!(worker = id, "worker: group cancelled, abandoning queued work");
            return Ok(());
        }
        job.await?;
    }
}
