//! # Job Store
//!
//! Persistence interface the executor works against. Every mutation of an existing
//! job is conditional on the job's `revision`; a stale revision surfaces as
//! [`ExecutorError::OptimisticLocking`](crate::error::ExecutorError::OptimisticLocking)
//! (or `false` from [`JobStore::try_lock`]), which is how concurrent acquirers on
//! different nodes are kept from executing the same job.
//!
//! Exclusive jobs add one more rule: while an exclusive job of a process instance
//! holds a live lock, no other exclusive job of that instance can be acquired. The
//! only jobs exempt are those locked by the same acquisition request (same owner and
//! same lock expiration), which end up in one batch and run one after another.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::fmt::Debug;

use crate::acquisition::{acquire_jobs, AcquiredJobs};
use crate::error::Result;
use crate::models::{Job, JobId, JobType};

pub use memory::InMemoryJobStore;
#[cfg(feature = "postgres")]
pub use postgres::PgJobStore;

/// Outcome of a failed attempt, written back by the failure listener
#[derive(Debug, Clone, PartialEq)]
pub struct JobFailure {
    pub job_id: JobId,
    pub expected_revision: i32,
    pub exception_message: String,
    pub exception_details: Option<String>,
    pub retries: i32,
    pub due_date: Option<DateTime<Utc>>,
}

/// Filter for [`JobStore::find_jobs`]; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobQuery {
    pub process_instance_id: Option<String>,
    pub handler_type: Option<String>,
    pub job_definition_id: Option<String>,
    pub tenant_id: Option<String>,
    pub job_type: Option<JobType>,
    pub locked_by: Option<String>,
    pub with_exception: bool,
    pub no_retries_left: bool,
    pub limit: Option<usize>,
}

impl JobQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process_instance(mut self, process_instance_id: impl Into<String>) -> Self {
        self.process_instance_id = Some(process_instance_id.into());
        self
    }

    pub fn handler_type(mut self, handler_type: impl Into<String>) -> Self {
        self.handler_type = Some(handler_type.into());
        self
    }

    pub fn job_definition(mut self, job_definition_id: impl Into<String>) -> Self {
        self.job_definition_id = Some(job_definition_id.into());
        self
    }

    pub fn tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn timers(mut self) -> Self {
        self.job_type = Some(JobType::Timer);
        self
    }

    pub fn messages(mut self) -> Self {
        self.job_type = Some(JobType::Message);
        self
    }

    pub fn locked_by(mut self, owner: impl Into<String>) -> Self {
        self.locked_by = Some(owner.into());
        self
    }

    pub fn with_exception(mut self) -> Self {
        self.with_exception = true;
        self
    }

    /// Dead jobs: no retries left
    pub fn no_retries_left(mut self) -> Self {
        self.no_retries_left = true;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, job: &Job) -> bool {
        fn eq(filter: &Option<String>, value: &Option<String>) -> bool {
            filter.is_none() || filter == value
        }

        eq(&self.process_instance_id, &job.process_instance_id)
            && self
                .handler_type
                .as_ref()
                .map_or(true, |handler_type| handler_type == &job.handler_type)
            && eq(&self.job_definition_id, &job.job_definition_id)
            && eq(&self.tenant_id, &job.tenant_id)
            && self.job_type.map_or(true, |job_type| job_type == job.job_type)
            && eq(&self.locked_by, &job.lock_owner)
            && (!self.with_exception || job.exception_message.is_some())
            && (!self.no_retries_left || job.retries == 0)
    }
}

#[async_trait]
pub trait JobStore: Send + Sync + Debug {
    async fn insert(&self, job: Job) -> Result<()>;

    async fn find_by_id(&self, id: JobId) -> Result<Option<Job>>;

    /// Due, unlocked (or lock expired), non-suspended jobs with retries left,
    /// highest priority first, then earliest due date. Exclusive jobs of a process
    /// instance that already has a locked exclusive job are left out.
    async fn find_acquirable(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Job>>;

    /// Lock one job if its revision is unchanged, it is still acquirable and no other
    /// acquisition holds an exclusive job of its process instance.
    /// Returns `false` when another acquirer got there first.
    async fn try_lock(
        &self,
        id: JobId,
        expected_revision: i32,
        lock_owner: &str,
        lock_expiration_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// One acquisition request: find up to `max_jobs` acquirable jobs and lock them
    async fn lock(
        &self,
        engine: &str,
        max_jobs: usize,
        lock_owner: &str,
        lock_duration: Duration,
        now: DateTime<Utc>,
    ) -> Result<AcquiredJobs> {
        acquire_jobs::lock_due_jobs(self, engine, max_jobs, lock_owner, lock_duration, now).await
    }

    /// Clear lock owner and expiration regardless of revision
    async fn release(&self, id: JobId) -> Result<()>;

    /// Persist a failed attempt and unlock the job
    async fn record_failure(&self, failure: &JobFailure) -> Result<()>;

    /// Lock a job for `lock_owner` whatever its due date, as long as the revision is
    /// unchanged. Used to run a single job on demand.
    async fn lock_job(
        &self,
        id: JobId,
        expected_revision: i32,
        lock_owner: &str,
        lock_expiration_time: DateTime<Utc>,
    ) -> Result<()>;

    /// Finish a successful execution as one unit: delete the job and insert the jobs
    /// the execution created. Nothing is written unless the job still has
    /// `expected_revision` and is locked by `lock_owner`.
    async fn complete(
        &self,
        id: JobId,
        expected_revision: i32,
        lock_owner: &str,
        created: Vec<Job>,
    ) -> Result<()>;

    /// Returns `false` when the job was already gone
    async fn delete(&self, id: JobId) -> Result<bool>;

    /// Unlocked, active timers due no later than `before`, earliest first
    async fn find_due_unlocked_timers(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Job>>;

    async fn update_due_date(
        &self,
        id: JobId,
        expected_revision: i32,
        due_date: Option<DateTime<Utc>>,
        repeat_offset_ms: i64,
    ) -> Result<()>;

    async fn update_retries(&self, id: JobId, expected_revision: i32, retries: i32) -> Result<()>;

    async fn update_priority(&self, id: JobId, expected_revision: i32, priority: i64) -> Result<()>;

    async fn update_suspension(
        &self,
        id: JobId,
        expected_revision: i32,
        suspended: bool,
    ) -> Result<()>;

    async fn find_jobs(&self, query: &JobQuery) -> Result<Vec<Job>>;
}
