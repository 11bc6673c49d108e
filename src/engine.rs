//! # Process Engines
//!
//! A [`ProcessEngine`] bundles what the executor needs to run one engine's jobs: the
//! job store, the handler registry, the retry policy and the job creation settings.
//! Engines are registered with a [`JobExecutor`](crate::executor::JobExecutor) which
//! acquires for all of them from a single loop.
//!
//! The engine also carries the job management operations callers use between
//! executions: scheduling new jobs, moving due dates, resetting retries, changing
//! priorities and suspending or activating jobs. Every one of them is a
//! revision-checked store update. Job definitions registered with the engine apply
//! to jobs created afterwards and, on request, to the existing jobs of the definition.
//!
//! [`ProcessEngine::execute_job`] runs one job right away on the caller's task,
//! through the same execution path the executor's workers use.
//!
//! ```rust
//! use std::sync::Arc;
//! use tasker_job_executor::engine::ProcessEngine;
//! use tasker_job_executor::store::InMemoryJobStore;
//!
//! let engine = ProcessEngine::builder("default")
//!     .store(Arc::new(InMemoryJobStore::new()))
//!     .build()
//!     .unwrap();
//! assert_eq!(engine.name(), "default");
//! ```

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::acquisition::AcquisitionSignal;
use crate::constants::{defaults::MANUAL_EXECUTION_LOCK_SECONDS, events};
use crate::declaration::{apply_due_date_change, JobCreationSettings, JobDeclaration};
use crate::error::{ExecutorError, HandlerError, Result};
use crate::execution::{
    self, DispatchContext, ExclusiveJobQueue, JobExecutorMetrics, JobOutcome, RetryPolicy,
};
use crate::models::{CreationContext, Job, JobDefinition, JobId};
use crate::registry::JobHandlerRegistry;
use crate::store::{JobQuery, JobStore};
use crate::utils::{system_clock, SharedClock};

#[derive(Debug)]
pub struct ProcessEngine {
    name: String,
    store: Arc<dyn JobStore>,
    handlers: Arc<JobHandlerRegistry>,
    retry_policy: RetryPolicy,
    creation_settings: JobCreationSettings,
    clock: SharedClock,
    signal: parking_lot::RwLock<Option<Arc<AcquisitionSignal>>>,
    job_definitions: DashMap<String, JobDefinition>,
}

impl ProcessEngine {
    pub fn builder(name: impl Into<String>) -> ProcessEngineBuilder {
        ProcessEngineBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn handlers(&self) -> &Arc<JobHandlerRegistry> {
        &self.handlers
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn creation_settings(&self) -> &JobCreationSettings {
        &self.creation_settings
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) fn attach_job_executor(&self, signal: Arc<AcquisitionSignal>) {
        *self.signal.write() = Some(signal);
    }

    pub(crate) fn detach_job_executor(&self) {
        *self.signal.write() = None;
    }

    pub fn has_job_executor(&self) -> bool {
        self.signal.read().is_some()
    }

    /// Wake the acquisition loop if `job` can be acquired right away
    pub fn hint_job_executor(&self, job: &Job) {
        if !job.is_acquirable_at(self.now()) {
            return;
        }
        if let Some(signal) = self.signal.read().as_ref() {
            signal.job_was_added();
        }
    }

    pub async fn schedule_job(&self, job: Job) -> Result<JobId> {
        let id = job.id;
        let hint = job.clone();
        self.store.insert(job).await?;
        self.hint_job_executor(&hint);
        debug!(engine = %self.name, job_id = %id, "Scheduled job");
        Ok(id)
    }

    /// Instantiate `declaration` for `ctx` and persist it.
    ///
    /// When the declaration's job definition is registered with this engine, the
    /// registered settings are used instead of the declaration's copy.
    pub async fn create_job<S: CreationContext + ?Sized>(
        &self,
        declaration: &JobDeclaration,
        ctx: &S,
    ) -> Result<JobId> {
        let registered = declaration
            .job_definition
            .as_ref()
            .and_then(|definition| self.job_definition(&definition.id));
        let job = match registered {
            Some(definition) => declaration
                .clone()
                .with_job_definition(definition)
                .create_job_instance(ctx, &self.creation_settings, self.now())?,
            None => declaration.create_job_instance(ctx, &self.creation_settings, self.now())?,
        };
        self.schedule_job(job).await
    }

    /// Execute one job now, on the calling task, whether or not it is due.
    ///
    /// The job is locked for the duration of the call. A handler failure is recorded
    /// on the job exactly as for executor runs and then returned to the caller.
    pub async fn execute_job(&self, id: JobId) -> Result<()> {
        let job = self.load(id).await?;
        let now = self.now();
        if job.is_locked_at(now) {
            return Err(ExecutorError::InvalidState(format!(
                "job {id} is locked by {} and cannot be executed",
                job.lock_owner.as_deref().unwrap_or_default()
            )));
        }

        let lock_owner = format!("{}:manual:{}", self.name, Uuid::new_v4());
        let lock_duration = Duration::seconds(MANUAL_EXECUTION_LOCK_SECONDS);
        self.store
            .lock_job(id, job.revision, &lock_owner, now + lock_duration)
            .await?;

        let signal = self
            .signal
            .read()
            .clone()
            .unwrap_or_else(|| Arc::new(AcquisitionSignal::new()));
        let dispatch = DispatchContext::new(
            lock_owner,
            lock_duration,
            signal,
            Arc::new(JobExecutorMetrics::new()),
        );
        let mut queue = ExclusiveJobQueue::default();

        let outcome = execution::execute_job(id, self, &dispatch, &mut queue).await;
        // follow-ups were locked for this call; leaving them would strand them
        while let Some(follow_up) = queue.pop() {
            execution::execute_job(follow_up, self, &dispatch, &mut queue).await;
        }

        info!(
            engine = %self.name,
            job_id = %id,
            outcome = ?outcome,
            "Job executed on demand"
        );
        match outcome {
            JobOutcome::Succeeded => Ok(()),
            JobOutcome::Failed { .. } => {
                let failed = self.load(id).await?;
                let mut error = HandlerError::new(
                    failed
                        .exception_message
                        .unwrap_or_else(|| "job execution failed".to_string()),
                );
                error.details = failed.exception_details;
                Err(ExecutorError::Handler(error))
            }
            JobOutcome::Skipped => Err(ExecutorError::JobNotFound(id)),
            JobOutcome::FailureNotRecorded => Err(ExecutorError::optimistic_locking(
                id,
                "failure of on-demand execution could not be recorded",
            )),
        }
    }

    /// Remove a job that is not currently executing. The job's handler, if
    /// registered, is told through [`JobHandler::on_delete`](crate::registry::JobHandler::on_delete).
    pub async fn delete_job(&self, id: JobId) -> Result<()> {
        let job = self.load(id).await?;
        if job.is_locked_at(self.now()) {
            return Err(ExecutorError::InvalidState(format!(
                "job {id} is being executed and cannot be deleted"
            )));
        }

        if !self.store.delete(id).await? {
            return Err(ExecutorError::JobNotFound(id));
        }
        if let Ok(handler) = self.handlers.resolve(&job.handler_type) {
            match handler.parse_configuration(job.handler_configuration.as_deref()) {
                Ok(configuration) => handler.on_delete(&configuration, &job),
                Err(error) => warn!(
                    engine = %self.name,
                    job_id = %id,
                    error = %error,
                    "Deleted job has an unreadable configuration; handler not notified"
                ),
            }
        }
        info!(event = events::JOB_DELETED, engine = %self.name, job_id = %id, "Job deleted");
        Ok(())
    }

    pub async fn find_job(&self, id: JobId) -> Result<Option<Job>> {
        self.store.find_by_id(id).await
    }

    pub async fn find_jobs(&self, query: &JobQuery) -> Result<Vec<Job>> {
        self.store.find_jobs(query).await
    }

    /// Jobs out of retries with a recorded failure
    pub async fn find_dead_jobs(&self) -> Result<Vec<Job>> {
        let candidates = self
            .store
            .find_jobs(&JobQuery::new().no_retries_left().with_exception())
            .await?;
        Ok(candidates.into_iter().filter(Job::is_dead).collect())
    }

    /// Move a job's due date. With `cascade` later occurrences of a repeating timer
    /// shift by the same amount; without it only this occurrence moves.
    pub async fn set_job_due_date(
        &self,
        id: JobId,
        due_date: DateTime<Utc>,
        cascade: bool,
    ) -> Result<()> {
        let mut job = self.load(id).await?;
        let revision = job.revision;
        apply_due_date_change(&mut job, due_date, cascade);
        self.store
            .update_due_date(id, revision, job.due_date, job.repeat_offset_ms)
            .await?;
        info!(
            engine = %self.name,
            job_id = %id,
            due_date = %due_date,
            cascade = cascade,
            "Job due date changed"
        );
        self.hint_job_executor(&job);
        Ok(())
    }

    /// Recompute a timer's due date from its declaration, relative to now or to
    /// the job's creation time
    pub async fn recalculate_job_due_date<S: CreationContext + ?Sized>(
        &self,
        id: JobId,
        declaration: &JobDeclaration,
        ctx: &S,
        creation_date_based: bool,
    ) -> Result<()> {
        let mut job = self.load(id).await?;
        let revision = job.revision;
        declaration.reconfigure(
            ctx,
            &mut job,
            &self.creation_settings,
            self.now(),
            creation_date_based,
        )?;
        self.store
            .update_due_date(id, revision, job.due_date, job.repeat_offset_ms)
            .await?;
        self.hint_job_executor(&job);
        Ok(())
    }

    /// Give a job (typically a dead one) new retries
    pub async fn set_job_retries(&self, id: JobId, retries: i32) -> Result<()> {
        if retries < 0 {
            return Err(ExecutorError::InvalidState(format!(
                "retries must not be negative, got {retries}"
            )));
        }
        let mut job = self.load(id).await?;
        self.store.update_retries(id, job.revision, retries).await?;
        job.set_retries(retries);
        self.hint_job_executor(&job);
        Ok(())
    }

    /// Apply new retries to every job of a definition that has run out of them
    pub async fn set_job_retries_by_job_definition_id(
        &self,
        job_definition_id: &str,
        retries: i32,
    ) -> Result<usize> {
        if retries < 0 {
            return Err(ExecutorError::InvalidState(format!(
                "retries must not be negative, got {retries}"
            )));
        }
        let jobs = self
            .store
            .find_jobs(
                &JobQuery::new()
                    .job_definition(job_definition_id)
                    .no_retries_left(),
            )
            .await?;
        for job in &jobs {
            self.store.update_retries(job.id, job.revision, retries).await?;
            let mut updated = job.clone();
            updated.set_retries(retries);
            self.hint_job_executor(&updated);
        }
        info!(
            engine = %self.name,
            job_definition_id = job_definition_id,
            retries = retries,
            jobs = jobs.len(),
            "Job retries set for job definition"
        );
        Ok(jobs.len())
    }

    pub async fn set_job_priority(&self, id: JobId, priority: i64) -> Result<()> {
        let job = self.load(id).await?;
        self.store.update_priority(id, job.revision, priority).await?;
        debug!(engine = %self.name, job_id = %id, priority = priority, "Job priority changed");
        Ok(())
    }

    /// Register `definition`, replacing any definition with the same id
    pub fn register_job_definition(&self, definition: JobDefinition) {
        self.job_definitions.insert(definition.id.clone(), definition);
    }

    pub fn job_definition(&self, id: &str) -> Option<JobDefinition> {
        self.job_definitions.get(id).map(|entry| entry.value().clone())
    }

    /// Set or clear the priority every new job of the definition gets. With `cascade`
    /// a new priority is also written to the definition's existing jobs.
    pub async fn set_overriding_job_priority_for_job_definition(
        &self,
        job_definition_id: &str,
        priority: Option<i64>,
        cascade: bool,
    ) -> Result<()> {
        self.update_job_definition(job_definition_id, |definition| {
            definition.overriding_job_priority = priority;
        })?;

        if let Some(priority) = priority.filter(|_| cascade) {
            let jobs = self
                .store
                .find_jobs(&JobQuery::new().job_definition(job_definition_id))
                .await?;
            for job in jobs {
                self.store.update_priority(job.id, job.revision, priority).await?;
            }
        }
        info!(
            engine = %self.name,
            job_definition_id = job_definition_id,
            priority = ?priority,
            cascade = cascade,
            "Overriding job priority changed"
        );
        Ok(())
    }

    pub async fn suspend_job_definition(
        &self,
        job_definition_id: &str,
        include_jobs: bool,
    ) -> Result<()> {
        self.set_job_definition_suspension(job_definition_id, true, include_jobs)
            .await
    }

    pub async fn activate_job_definition(
        &self,
        job_definition_id: &str,
        include_jobs: bool,
    ) -> Result<()> {
        self.set_job_definition_suspension(job_definition_id, false, include_jobs)
            .await
    }

    async fn set_job_definition_suspension(
        &self,
        job_definition_id: &str,
        suspended: bool,
        include_jobs: bool,
    ) -> Result<()> {
        self.update_job_definition(job_definition_id, |definition| {
            definition.suspended = suspended;
        })?;

        if include_jobs {
            let jobs = self
                .store
                .find_jobs(&JobQuery::new().job_definition(job_definition_id))
                .await?;
            for mut job in jobs {
                if job.suspended == suspended {
                    continue;
                }
                self.store
                    .update_suspension(job.id, job.revision, suspended)
                    .await?;
                job.suspended = suspended;
                self.hint_job_executor(&job);
            }
        }
        info!(
            engine = %self.name,
            job_definition_id = job_definition_id,
            suspended = suspended,
            include_jobs = include_jobs,
            "Job definition suspension changed"
        );
        Ok(())
    }

    fn update_job_definition<F>(&self, id: &str, change: F) -> Result<()>
    where
        F: FnOnce(&mut JobDefinition),
    {
        let mut definition = self
            .job_definitions
            .get_mut(id)
            .ok_or_else(|| ExecutorError::JobDefinitionNotFound(id.to_string()))?;
        change(definition.value_mut());
        Ok(())
    }

    pub async fn suspend_job(&self, id: JobId) -> Result<()> {
        self.set_suspension(id, true).await
    }

    pub async fn activate_job(&self, id: JobId) -> Result<()> {
        self.set_suspension(id, false).await
    }

    async fn set_suspension(&self, id: JobId, suspended: bool) -> Result<()> {
        let mut job = self.load(id).await?;
        self.store
            .update_suspension(id, job.revision, suspended)
            .await?;
        job.suspended = suspended;
        self.hint_job_executor(&job);
        Ok(())
    }

    async fn load(&self, id: JobId) -> Result<Job> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or(ExecutorError::JobNotFound(id))
    }
}

pub struct ProcessEngineBuilder {
    name: String,
    store: Option<Arc<dyn JobStore>>,
    handlers: Arc<JobHandlerRegistry>,
    retry_policy: RetryPolicy,
    creation_settings: JobCreationSettings,
    clock: SharedClock,
}

impl ProcessEngineBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            store: None,
            handlers: Arc::new(JobHandlerRegistry::new()),
            retry_policy: RetryPolicy::Default,
            creation_settings: JobCreationSettings::default(),
            clock: system_clock(),
        }
    }

    pub fn store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn handlers(mut self, handlers: Arc<JobHandlerRegistry>) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn creation_settings(mut self, creation_settings: JobCreationSettings) -> Self {
        self.creation_settings = creation_settings;
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Result<ProcessEngine> {
        if self.name.trim().is_empty() {
            return Err(ExecutorError::Registration(
                "process engine name must not be empty".to_string(),
            ));
        }
        let store = self.store.ok_or_else(|| {
            ExecutorError::Registration(format!("process engine '{}' has no job store", self.name))
        })?;
        Ok(ProcessEngine {
            name: self.name,
            store,
            handlers: self.handlers,
            retry_policy: self.retry_policy,
            creation_settings: self.creation_settings,
            clock: self.clock,
            signal: parking_lot::RwLock::new(None),
            job_definitions: DashMap::new(),
        })
    }
}

/// Engines served by one executor, in registration order
#[derive(Debug, Default)]
pub struct EngineRegistry {
    engines: parking_lot::RwLock<Vec<Arc<ProcessEngine>>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, engine: Arc<ProcessEngine>) -> Result<()> {
        let mut engines = self.engines.write();
        if engines.iter().any(|e| e.name() == engine.name()) {
            return Err(ExecutorError::Registration(format!(
                "process engine '{}' is already registered",
                engine.name()
            )));
        }
        engines.push(engine);
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> Result<Arc<ProcessEngine>> {
        let mut engines = self.engines.write();
        let position = engines
            .iter()
            .position(|e| e.name() == name)
            .ok_or_else(|| ExecutorError::EngineNotRegistered(name.to_string()))?;
        Ok(engines.remove(position))
    }

    /// Copy of the current engine list; the acquisition loop works on this per cycle
    pub fn snapshot(&self) -> Vec<Arc<ProcessEngine>> {
        self.engines.read().clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<ProcessEngine>> {
        self.engines
            .read()
            .iter()
            .find(|e| e.name() == name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.engines.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.read().is_empty()
    }
}
