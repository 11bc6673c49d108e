//! Per-job execution state handed to a [`JobHandler`](crate::registry::JobHandler).
//!
//! Jobs a handler creates are buffered here and only written to the store once the
//! handler has succeeded. A failed execution leaves no new jobs behind.

use chrono::{DateTime, Utc};

use crate::declaration::{JobCreationSettings, JobDeclaration};
use crate::error::Result;
use crate::models::{CreationContext, Job, JobId};

#[derive(Debug)]
pub struct JobExecutionContext {
    job: Job,
    engine_name: String,
    now: DateTime<Utc>,
    settings: JobCreationSettings,
    created_jobs: Vec<Job>,
}

impl JobExecutionContext {
    pub fn new(
        job: Job,
        engine_name: impl Into<String>,
        now: DateTime<Utc>,
        settings: JobCreationSettings,
    ) -> Self {
        Self {
            job,
            engine_name: engine_name.into(),
            now,
            settings,
            created_jobs: Vec::new(),
        }
    }

    /// The job being executed, as loaded before the handler ran
    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn engine_name(&self) -> &str {
        &self.engine_name
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Buffer an already built job for insertion on success
    pub fn schedule_job(&mut self, job: Job) -> JobId {
        let id = job.id;
        self.created_jobs.push(job);
        id
    }

    /// Instantiate `declaration` for `ctx` and buffer the result
    pub fn create_job<S: CreationContext + ?Sized>(
        &mut self,
        declaration: &JobDeclaration,
        ctx: &S,
    ) -> Result<JobId> {
        let job = declaration.create_job_instance(ctx, &self.settings, self.now)?;
        Ok(self.schedule_job(job))
    }

    pub fn created_jobs(&self) -> &[Job] {
        &self.created_jobs
    }

    pub(crate) fn into_parts(self) -> (Job, Vec<Job>) {
        (self.job, self.created_jobs)
    }
}
