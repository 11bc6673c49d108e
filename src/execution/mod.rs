//! # Job Execution
//!
//! Everything between an acquired batch and the outcome written back to the store:
//! the bounded worker pool, per-batch runners with their local exclusive queue,
//! rejected batch handling, single job execution with its success and failure
//! listeners, retry policies and executor metrics.

pub mod context;
pub mod dispatcher;
pub mod execute_job;
pub mod execute_jobs;
pub mod metrics;
pub mod rejected_jobs;
pub mod retry;
pub mod worker_pool;

pub use context::JobExecutionContext;
pub use dispatcher::{DispatchContext, JobDispatcher};
pub use execute_job::{execute_job, JobOutcome};
pub use execute_jobs::{ExclusiveJobQueue, ExecuteJobsRunnable};
pub use metrics::{JobExecutorMetrics, MetricsSnapshot};
pub use rejected_jobs::{
    rejected_jobs_handler_for, CallerRunsRejectedJobsHandler,
    NotifyAcquisitionRejectedJobsHandler, RejectedJobsHandler,
};
pub use retry::{RetryDecision, RetryPolicy};
pub use worker_pool::{BoundedWorkerPool, SubmitError, WorkItem};
