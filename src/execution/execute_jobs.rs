//! # Batch Execution
//!
//! One [`ExecuteJobsRunnable`] runs one acquired batch on a worker. Jobs run strictly
//! one after another, which is what keeps exclusive jobs of a process instance from
//! overlapping: they were batched together at acquisition time, and follow-up
//! exclusive jobs created while the batch runs are appended to the same
//! [`ExclusiveJobQueue`] instead of going back through acquisition.

use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

use super::dispatcher::DispatchContext;
use super::execute_job::execute_job;
use crate::constants::events;
use crate::engine::ProcessEngine;
use crate::models::JobId;

/// FIFO of job ids a single worker still has to run
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ExclusiveJobQueue {
    jobs: VecDeque<JobId>,
}

impl ExclusiveJobQueue {
    pub fn new(job_ids: impl IntoIterator<Item = JobId>) -> Self {
        Self {
            jobs: job_ids.into_iter().collect(),
        }
    }

    pub fn push(&mut self, job_id: JobId) {
        self.jobs.push_back(job_id);
    }

    pub fn pop(&mut self) -> Option<JobId> {
        self.jobs.pop_front()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn drain(&mut self) -> Vec<JobId> {
        self.jobs.drain(..).collect()
    }
}

#[derive(Debug)]
pub struct ExecuteJobsRunnable {
    job_ids: Vec<JobId>,
    engine: Arc<ProcessEngine>,
    dispatch: Arc<DispatchContext>,
}

impl ExecuteJobsRunnable {
    pub fn new(job_ids: Vec<JobId>, engine: Arc<ProcessEngine>, dispatch: Arc<DispatchContext>) -> Self {
        Self {
            job_ids,
            engine,
            dispatch,
        }
    }

    pub async fn run(self) {
        let Self {
            job_ids,
            engine,
            dispatch,
        } = self;
        let mut queue = ExclusiveJobQueue::new(job_ids);

        while let Some(job_id) = queue.pop() {
            if !dispatch.is_active() {
                let mut remaining = vec![job_id];
                remaining.extend(queue.drain());
                unlock_jobs(&engine, remaining).await;
                break;
            }

            execute_job(job_id, &engine, &dispatch, &mut queue).await;
        }
    }
}

/// Give locks back so another node can pick the jobs up
async fn unlock_jobs(engine: &ProcessEngine, job_ids: Vec<JobId>) {
    for job_id in job_ids {
        match engine.store().release(job_id).await {
            Ok(()) => debug!(
                event = events::JOB_UNLOCKED,
                engine = %engine.name(),
                job_id = %job_id,
                "Executor inactive; job unlocked"
            ),
            Err(error) => warn!(
                engine = %engine.name(),
                job_id = %job_id,
                error = %error,
                "Failed to unlock job; it stays locked until the lock expires"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::AcquisitionSignal;
    use crate::execution::JobExecutorMetrics;
    use crate::models::Job;
    use crate::store::{InMemoryJobStore, JobStore};
    use chrono::{Duration, Utc};

    #[test]
    fn test_queue_is_fifo() {
        let (a, b, c) = (uuid::Uuid::new_v4(), uuid::Uuid::new_v4(), uuid::Uuid::new_v4());
        let mut queue = ExclusiveJobQueue::new([a, b]);
        queue.push(c);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop(), Some(a));
        assert_eq!(queue.drain(), vec![b, c]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_inactive_executor_unlocks_instead_of_running() {
        let store = Arc::new(InMemoryJobStore::new());
        let engine = Arc::new(ProcessEngine::builder("default").store(store.clone()).build().unwrap());
        let dispatch = Arc::new(DispatchContext::new(
            "node-1",
            Duration::minutes(5),
            Arc::new(AcquisitionSignal::new()),
            Arc::new(JobExecutorMetrics::new()),
        ));
        dispatch.set_active(false);

        let now = Utc::now();
        let mut ids = Vec::new();
        for _ in 0..2 {
            let mut job = Job::message("event", 3, now).with_process_instance("pi-1");
            job.lock("node-1", now + Duration::minutes(5));
            ids.push(job.id);
            store.insert(job).await.unwrap();
        }

        ExecuteJobsRunnable::new(ids.clone(), engine, dispatch).run().await;

        for id in ids {
            let job = store.find_by_id(id).await.unwrap().unwrap();
            assert!(job.lock_owner.is_none());
            assert_eq!(job.retries, 3);
            assert!(job.exception_message.is_none());
        }
    }
}
