//! # Bounded Worker Pool
//!
//! A fixed number of worker tasks pulling units of work from a bounded queue.
//! Submission never blocks: when the queue is full the caller gets
//! [`SubmitError::Saturated`] back and decides what happens to the work.
//!
//! ```text
//! try_submit → [bounded mpsc queue] → worker 1..N → catch_unwind(work)
//! ```

use futures::future::BoxFuture;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::WorkerPoolConfig;

pub type WorkItem = BoxFuture<'static, ()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("worker pool queue is full")]
    Saturated,
    #[error("worker pool is shut down")]
    ShutDown,
}

#[derive(Debug)]
pub struct BoundedWorkerPool {
    sender: parking_lot::Mutex<Option<mpsc::Sender<WorkItem>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    pool_size: usize,
    queue_size: usize,
    busy: Arc<AtomicUsize>,
}

impl BoundedWorkerPool {
    /// Spawns the workers; must be called inside a tokio runtime
    pub fn new(pool_size: usize, queue_size: usize) -> Self {
        let pool_size = pool_size.max(1);
        let queue_size = queue_size.max(1);
        let (sender, receiver) = mpsc::channel::<WorkItem>(queue_size);
        let receiver = Arc::new(Mutex::new(receiver));
        let busy = Arc::new(AtomicUsize::new(0));

        let workers = (0..pool_size)
            .map(|worker_id| {
                let receiver = Arc::clone(&receiver);
                let busy = Arc::clone(&busy);
                tokio::spawn(async move {
                    loop {
                        let work = {
                            let mut receiver = receiver.lock().await;
                            receiver.recv().await
                        };
                        let Some(work) = work else {
                            break;
                        };

                        busy.fetch_add(1, Ordering::SeqCst);
                        if AssertUnwindSafe(work).catch_unwind().await.is_err() {
                            error!(worker_id = worker_id, "Job worker task panicked");
                        }
                        busy.fetch_sub(1, Ordering::SeqCst);
                    }
                    debug!(worker_id = worker_id, "Job worker stopped");
                })
            })
            .collect();

        Self {
            sender: parking_lot::Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            pool_size,
            queue_size,
            busy,
        }
    }

    pub fn from_config(config: &WorkerPoolConfig) -> Self {
        Self::new(config.core_pool_size, config.queue_size)
    }

    pub fn try_submit(&self, work: WorkItem) -> Result<(), SubmitError> {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(SubmitError::ShutDown);
        };
        sender.try_send(work).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SubmitError::Saturated,
            mpsc::error::TrySendError::Closed(_) => SubmitError::ShutDown,
        })
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn queue_size(&self) -> usize {
        self.queue_size
    }

    /// Work items currently running
    pub fn busy_workers(&self) -> usize {
        self.busy.load(Ordering::SeqCst)
    }

    /// Free queue slots, 0 once shut down
    pub fn available_capacity(&self) -> usize {
        self.sender
            .lock()
            .as_ref()
            .map(mpsc::Sender::capacity)
            .unwrap_or(0)
    }

    pub fn is_shut_down(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Stop accepting work, let queued work drain and wait for the workers.
    /// Returns `false` if the workers did not finish within `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        let sender = self.sender.lock().take();
        drop(sender);

        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock().await);
        if workers.is_empty() {
            return true;
        }

        let join_all = futures::future::join_all(workers);
        match tokio::time::timeout(timeout, join_all).await {
            Ok(_) => {
                info!(pool_size = self.pool_size, "Job worker pool shut down");
                true
            }
            Err(_) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    busy_workers = self.busy_workers(),
                    "Job worker pool did not shut down in time; proceeding"
                );
                false
            }
        }
    }
}
