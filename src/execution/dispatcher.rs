//! Hands acquired batches to the worker pool.

use chrono::Duration;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::execute_jobs::ExecuteJobsRunnable;
use super::metrics::JobExecutorMetrics;
use super::rejected_jobs::RejectedJobsHandler;
use super::worker_pool::{BoundedWorkerPool, SubmitError};
use crate::acquisition::{AcquisitionSignal, JobAcquisitionContext};
use crate::engine::ProcessEngine;
use crate::models::JobId;

/// State shared by everything that runs jobs on behalf of one executor
#[derive(Debug)]
pub struct DispatchContext {
    lock_owner: String,
    lock_duration: Duration,
    active: AtomicBool,
    signal: Arc<AcquisitionSignal>,
    metrics: Arc<JobExecutorMetrics>,
}

impl DispatchContext {
    pub fn new(
        lock_owner: impl Into<String>,
        lock_duration: Duration,
        signal: Arc<AcquisitionSignal>,
        metrics: Arc<JobExecutorMetrics>,
    ) -> Self {
        Self {
            lock_owner: lock_owner.into(),
            lock_duration,
            active: AtomicBool::new(true),
            signal,
            metrics,
        }
    }

    pub fn lock_owner(&self) -> &str {
        &self.lock_owner
    }

    pub fn lock_duration(&self) -> Duration {
        self.lock_duration
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    pub fn signal(&self) -> &Arc<AcquisitionSignal> {
        &self.signal
    }

    pub fn metrics(&self) -> &Arc<JobExecutorMetrics> {
        &self.metrics
    }
}

#[derive(Debug)]
pub struct JobDispatcher {
    pool: BoundedWorkerPool,
    rejected_jobs_handler: Arc<dyn RejectedJobsHandler>,
    dispatch: Arc<DispatchContext>,
}

impl JobDispatcher {
    pub fn new(
        pool: BoundedWorkerPool,
        rejected_jobs_handler: Arc<dyn RejectedJobsHandler>,
        dispatch: Arc<DispatchContext>,
    ) -> Self {
        Self {
            pool,
            rejected_jobs_handler,
            dispatch,
        }
    }

    pub fn dispatch_context(&self) -> &Arc<DispatchContext> {
        &self.dispatch
    }

    pub fn pool(&self) -> &BoundedWorkerPool {
        &self.pool
    }

    /// Submit one batch as a single unit of work; a refused batch goes to the
    /// rejected jobs handler
    pub async fn execute_jobs(
        &self,
        job_ids: Vec<JobId>,
        engine: &Arc<ProcessEngine>,
        context: &mut JobAcquisitionContext,
    ) {
        if job_ids.is_empty() {
            return;
        }

        let runnable = ExecuteJobsRunnable::new(
            job_ids.clone(),
            Arc::clone(engine),
            Arc::clone(&self.dispatch),
        );

        match self.pool.try_submit(Box::pin(runnable.run())) {
            Ok(()) => {}
            Err(error) => {
                if error == SubmitError::ShutDown {
                    debug!(engine = %engine.name(), "Worker pool is shut down");
                }
                self.dispatch.metrics().record_rejected_batch();
                self.rejected_jobs_handler
                    .jobs_rejected(job_ids, engine, &self.dispatch, context)
                    .await;
            }
        }
    }

    /// Mark the executor inactive and drain the pool
    pub async fn shutdown(&self, timeout: std::time::Duration) -> bool {
        self.dispatch.set_active(false);
        self.pool.shutdown(timeout).await
    }
}
