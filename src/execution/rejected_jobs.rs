//! What happens to a batch the worker pool had no room for.

use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::debug;

use super::dispatcher::DispatchContext;
use super::execute_jobs::ExecuteJobsRunnable;
use crate::acquisition::JobAcquisitionContext;
use crate::config::RejectedJobsPolicy;
use crate::constants::events;
use crate::engine::ProcessEngine;
use crate::models::JobId;

#[async_trait]
pub trait RejectedJobsHandler: Send + Sync + Debug {
    async fn jobs_rejected(
        &self,
        job_ids: Vec<JobId>,
        engine: &Arc<ProcessEngine>,
        dispatch: &Arc<DispatchContext>,
        context: &mut JobAcquisitionContext,
    );
}

/// Hand the batch back to the acquisition loop. It is submitted again, ahead of
/// newly acquired work, on the next cycle and counts against that cycle's batch size.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotifyAcquisitionRejectedJobsHandler;

#[async_trait]
impl RejectedJobsHandler for NotifyAcquisitionRejectedJobsHandler {
    async fn jobs_rejected(
        &self,
        job_ids: Vec<JobId>,
        engine: &Arc<ProcessEngine>,
        _dispatch: &Arc<DispatchContext>,
        context: &mut JobAcquisitionContext,
    ) {
        debug!(
            event = events::JOB_REJECTED,
            engine = %engine.name(),
            jobs = job_ids.len(),
            "Worker pool saturated; batch deferred to next acquisition cycle"
        );
        context.submit_rejected_batch(engine.name(), job_ids);
    }
}

/// Run the batch on the acquisition task itself
#[derive(Debug, Default, Clone, Copy)]
pub struct CallerRunsRejectedJobsHandler;

#[async_trait]
impl RejectedJobsHandler for CallerRunsRejectedJobsHandler {
    async fn jobs_rejected(
        &self,
        job_ids: Vec<JobId>,
        engine: &Arc<ProcessEngine>,
        dispatch: &Arc<DispatchContext>,
        _context: &mut JobAcquisitionContext,
    ) {
        debug!(
            event = events::JOB_REJECTED,
            engine = %engine.name(),
            jobs = job_ids.len(),
            "Worker pool saturated; running batch on the acquisition task"
        );
        ExecuteJobsRunnable::new(job_ids, Arc::clone(engine), Arc::clone(dispatch))
            .run()
            .await;
    }
}

pub fn rejected_jobs_handler_for(policy: RejectedJobsPolicy) -> Arc<dyn RejectedJobsHandler> {
    match policy {
        RejectedJobsPolicy::NotifyAcquisition => Arc::new(NotifyAcquisitionRejectedJobsHandler),
        RejectedJobsPolicy::CallerRuns => Arc::new(CallerRunsRejectedJobsHandler),
    }
}
