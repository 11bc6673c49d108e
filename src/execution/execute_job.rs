//! # Job Execution
//!
//! Runs a single locked job and writes the outcome back.
//!
//! ## Flow
//!
//! ```text
//! load job ─┬─ gone / not ours ──────────────► Skipped
//!           └─ resolve handler ─ parse config ─ execute
//!                    │               │            ├─ Ok ──► commit ──► success listener
//!                    └─ fatal ───────┴────────────┴─ Err ─► failure listener
//! ```
//!
//! Jobs created by the handler are buffered in the [`JobExecutionContext`] and
//! written during commit, so a failed attempt leaves nothing behind. During commit,
//! new exclusive jobs of the same process instance that are already due are locked
//! by this node and appended to the worker's local queue; every other acquirable
//! new job wakes the acquisition loop instead.
//!
//! The failure listener retries optimistic locking conflicts a bounded number of
//! times and then gives up, leaving the job to be picked up again once its lock
//! expires.

use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

use super::context::JobExecutionContext;
use super::dispatcher::DispatchContext;
use super::execute_jobs::ExclusiveJobQueue;
use crate::constants::defaults::{FATAL_FAILURE_PREFIX, MAX_FAILURE_LISTENER_ATTEMPTS};
use crate::constants::events;
use crate::declaration::next_timer_occurrence;
use crate::engine::ProcessEngine;
use crate::error::{ExecutorError, HandlerError, Result};
use crate::logging::{log_error, log_job_operation};
use crate::models::{Job, JobId};
use crate::registry::JobHandler;
use crate::store::JobFailure;

/// How one execution attempt ended
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Succeeded,
    Failed { retries_left: i32 },
    /// The job was gone or no longer locked by this node
    Skipped,
    /// The failure could not be written back
    FailureNotRecorded,
}

pub async fn execute_job(
    job_id: JobId,
    engine: &ProcessEngine,
    dispatch: &DispatchContext,
    queue: &mut ExclusiveJobQueue,
) -> JobOutcome {
    let mut job = match engine.store().find_by_id(job_id).await {
        Ok(Some(job)) => job,
        Ok(None) => {
            debug!(engine = %engine.name(), job_id = %job_id, "Job no longer exists; skipping");
            return JobOutcome::Skipped;
        }
        Err(error) => {
            log_error(
                "job_executor",
                "load_job",
                &error.to_string(),
                Some(&job_id.to_string()),
            );
            return JobOutcome::Skipped;
        }
    };

    if !job.is_locked_by(dispatch.lock_owner()) {
        debug!(
            engine = %engine.name(),
            job_id = %job_id,
            lock_owner = ?job.lock_owner,
            "Job is not locked by this node; skipping"
        );
        return JobOutcome::Skipped;
    }

    job.increment_sequence_counter();
    let handler_type = job.handler_type.clone();

    let result = match run_handler(job, engine).await {
        Ok(completed) => commit(completed, engine, dispatch, queue).await,
        Err(error) => Err(error),
    };

    match result {
        Ok(()) => {
            on_success(job_id, &handler_type, engine, dispatch);
            JobOutcome::Succeeded
        }
        Err(error) => match on_failure(job_id, &error, engine, dispatch).await {
            Ok(Some(retries_left)) => JobOutcome::Failed { retries_left },
            Ok(None) => JobOutcome::Skipped,
            Err(listener_error) => {
                log_error(
                    "job_executor",
                    "record_failure",
                    &listener_error.to_string(),
                    Some(&job_id.to_string()),
                );
                JobOutcome::FailureNotRecorded
            }
        },
    }
}

struct CompletedExecution {
    handler: Arc<dyn JobHandler>,
    configuration: Value,
    job: Job,
    created_jobs: Vec<Job>,
}

async fn run_handler(job: Job, engine: &ProcessEngine) -> Result<CompletedExecution> {
    let handler = engine.handlers().resolve(&job.handler_type)?;
    let configuration = handler
        .parse_configuration(job.handler_configuration.as_deref())
        .map_err(|e| ExecutorError::InvalidHandlerConfiguration {
            handler_type: job.handler_type.clone(),
            reason: e.message,
        })?;

    let mut context = JobExecutionContext::new(
        job,
        engine.name(),
        engine.now(),
        engine.creation_settings().clone(),
    );

    match AssertUnwindSafe(handler.execute(&configuration, &mut context))
        .catch_unwind()
        .await
    {
        Ok(Ok(())) => {
            let (job, created_jobs) = context.into_parts();
            Ok(CompletedExecution {
                handler,
                configuration,
                job,
                created_jobs,
            })
        }
        Ok(Err(handler_error)) => Err(ExecutorError::Handler(handler_error)),
        Err(_) => Err(ExecutorError::Handler(HandlerError::new(format!(
            "handler '{}' panicked",
            handler.handler_type()
        )))),
    }
}

/// Persist the side effects of a successful execution and delete the job.
///
/// The store only accepts the commit while the job is unchanged and still locked by
/// this node, so an execution that outlived its lock leaves nothing behind.
async fn commit(
    completed: CompletedExecution,
    engine: &ProcessEngine,
    dispatch: &DispatchContext,
    queue: &mut ExclusiveJobQueue,
) -> Result<()> {
    let CompletedExecution {
        handler,
        configuration,
        job,
        mut created_jobs,
    } = completed;
    let now = engine.now();

    if let Some(successor) =
        next_timer_occurrence(&job, engine.creation_settings().default_retries, now)?
    {
        debug!(
            event = events::TIMER_REPEATED,
            engine = %engine.name(),
            job_id = %job.id,
            successor_id = %successor.id,
            due_date = ?successor.due_date,
            "Scheduled next timer occurrence"
        );
        created_jobs.push(successor);
    }

    let mut run_locally = Vec::new();
    let mut wake_acquisition = false;
    for created in &mut created_jobs {
        let local = job.is_exclusive_in_instance()
            && created.exclusive
            && created.is_in_same_process_instance(&job)
            && created.is_acquirable_at(now);

        if local {
            created.lock(dispatch.lock_owner(), now + dispatch.lock_duration());
            run_locally.push(created.id);
        } else if created.is_acquirable_at(now) {
            wake_acquisition = true;
        }
    }

    engine
        .store()
        .complete(job.id, job.revision, dispatch.lock_owner(), created_jobs)
        .await?;
    handler.on_delete(&configuration, &job);

    for id in run_locally {
        queue.push(id);
        dispatch.metrics().record_exclusive_job_locked();
    }
    if wake_acquisition {
        dispatch.signal().job_was_added();
    }
    Ok(())
}

fn on_success(job_id: JobId, handler_type: &str, engine: &ProcessEngine, dispatch: &DispatchContext) {
    dispatch.metrics().record_success();
    log_job_operation(
        events::JOB_EXECUTED,
        engine.name(),
        Some(job_id),
        Some(handler_type),
        "succeeded",
        None,
    );
}

/// Record a failed attempt. Returns the retries left, or `None` when the job is gone
/// or another node has taken its lock over.
async fn on_failure(
    job_id: JobId,
    error: &ExecutorError,
    engine: &ProcessEngine,
    dispatch: &DispatchContext,
) -> Result<Option<i32>> {
    let fatal = error.is_fatal();
    let (exception_message, exception_details) = describe_failure(error);

    let mut attempt = 0;
    let retries_left = loop {
        attempt += 1;

        let Some(job) = engine.store().find_by_id(job_id).await? else {
            return Ok(None);
        };
        if !job.is_locked_by(dispatch.lock_owner()) {
            warn!(
                engine = %engine.name(),
                job_id = %job_id,
                lock_owner = ?job.lock_owner,
                error = %error,
                "Job lock was lost during execution; failure discarded"
            );
            return Ok(None);
        }
        let decision = engine
            .retry_policy()
            .next_attempt(&job, fatal, engine.now())?;
        let failure = JobFailure {
            job_id,
            expected_revision: job.revision,
            exception_message: exception_message.clone(),
            exception_details: exception_details.clone(),
            retries: decision.retries,
            due_date: decision.due_date,
        };

        match engine.store().record_failure(&failure).await {
            Ok(()) => break decision.retries,
            Err(e) if e.is_optimistic_locking() && attempt < MAX_FAILURE_LISTENER_ATTEMPTS => {
                debug!(
                    job_id = %job_id,
                    attempt = attempt,
                    "Conflict while recording job failure; retrying"
                );
            }
            Err(e) => return Err(e),
        }
    };

    dispatch.metrics().record_failure();
    warn!(
        event = events::JOB_FAILED,
        engine = %engine.name(),
        job_id = %job_id,
        error = %error,
        fatal = fatal,
        retries_left = retries_left,
        "Job execution failed"
    );

    if retries_left == 0 {
        warn!(
            event = events::JOB_RETRIES_EXHAUSTED,
            engine = %engine.name(),
            job_id = %job_id,
            "Job has no retries left and needs attention"
        );
    } else {
        dispatch.signal().job_was_added();
    }

    Ok(Some(retries_left))
}

fn describe_failure(error: &ExecutorError) -> (String, Option<String>) {
    match error {
        ExecutorError::Handler(handler_error) => {
            (handler_error.message.clone(), handler_error.details.clone())
        }
        error if error.is_fatal() => (format!("{FATAL_FAILURE_PREFIX}: {error}"), None),
        error => (error.to_string(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::AcquisitionSignal;
    use crate::execution::JobExecutorMetrics;
    use crate::registry::JobHandlerRegistry;
    use crate::store::{InMemoryJobStore, JobStore};
    use async_trait::async_trait;
    use chrono::{Duration, Utc};

    struct FlakyHandler;

    #[async_trait]
    impl JobHandler for FlakyHandler {
        fn handler_type(&self) -> &str {
            "flaky"
        }

        async fn execute(
            &self,
            configuration: &Value,
            context: &mut JobExecutionContext,
        ) -> std::result::Result<(), HandlerError> {
            // buffered job must not survive the failure
            context.schedule_job(Job::message("flaky", 3, context.now()));
            if configuration["fail"].as_bool().unwrap_or(false) {
                return Err(HandlerError::new("downstream unavailable").with_details("503"));
            }
            Ok(())
        }
    }

    fn setup() -> (Arc<InMemoryJobStore>, ProcessEngine, DispatchContext) {
        let store = Arc::new(InMemoryJobStore::new());
        let handlers = Arc::new(JobHandlerRegistry::new());
        handlers.register(Arc::new(FlakyHandler)).unwrap();
        let engine = ProcessEngine::builder("default")
            .store(store.clone())
            .handlers(handlers)
            .build()
            .unwrap();
        let dispatch = DispatchContext::new(
            "node-1",
            Duration::minutes(5),
            Arc::new(AcquisitionSignal::new()),
            Arc::new(JobExecutorMetrics::new()),
        );
        (store, engine, dispatch)
    }

    async fn insert_locked(store: &InMemoryJobStore, job: Job) -> JobId {
        let mut job = job;
        job.lock("node-1", Utc::now() + Duration::minutes(5));
        let id = job.id;
        store.insert(job).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_success_deletes_job_and_commits_created_jobs() {
        let (store, engine, dispatch) = setup();
        let id = insert_locked(&store, Job::message("flaky", 3, Utc::now())).await;

        let outcome = execute_job(id, &engine, &dispatch, &mut ExclusiveJobQueue::default()).await;

        assert_eq!(outcome, JobOutcome::Succeeded);
        assert!(store.find_by_id(id).await.unwrap().is_none());
        assert_eq!(store.len().await, 1);
        assert!(dispatch.signal().is_job_added());
        assert_eq!(dispatch.metrics().snapshot().jobs_succeeded, 1);
    }

    #[tokio::test]
    async fn test_failure_decrements_retries_and_discards_created_jobs() {
        let (store, engine, dispatch) = setup();
        let id = insert_locked(
            &store,
            Job::message("flaky", 2, Utc::now()).with_configuration(r#"{"fail":true}"#),
        )
        .await;

        let outcome = execute_job(id, &engine, &dispatch, &mut ExclusiveJobQueue::default()).await;
        assert_eq!(outcome, JobOutcome::Failed { retries_left: 1 });

        let job = store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(job.retries, 1);
        assert_eq!(job.exception_message.as_deref(), Some("downstream unavailable"));
        assert_eq!(job.exception_details.as_deref(), Some("503"));
        assert!(job.lock_owner.is_none());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_handler_is_fatal() {
        let (store, engine, dispatch) = setup();
        let id = insert_locked(&store, Job::message("nobody-handles-this", 3, Utc::now())).await;

        let outcome = execute_job(id, &engine, &dispatch, &mut ExclusiveJobQueue::default()).await;
        assert_eq!(outcome, JobOutcome::Failed { retries_left: 0 });

        let job = store.find_by_id(id).await.unwrap().unwrap();
        assert!(job.is_dead());
        assert!(job
            .exception_message
            .as_deref()
            .unwrap_or_default()
            .starts_with(FATAL_FAILURE_PREFIX));
        assert!(!dispatch.signal().is_job_added());
    }

    #[tokio::test]
    async fn test_job_locked_elsewhere_is_skipped() {
        let (store, engine, dispatch) = setup();
        let mut job = Job::message("flaky", 3, Utc::now());
        job.lock("node-2", Utc::now() + Duration::minutes(5));
        let id = job.id;
        store.insert(job).await.unwrap();

        let outcome = execute_job(id, &engine, &dispatch, &mut ExclusiveJobQueue::default()).await;
        assert_eq!(outcome, JobOutcome::Skipped);
        assert!(store.find_by_id(id).await.unwrap().is_some());

        let missing =
            execute_job(uuid::Uuid::new_v4(), &engine, &dispatch, &mut ExclusiveJobQueue::default())
                .await;
        assert_eq!(missing, JobOutcome::Skipped);
    }

    #[test]
    fn test_describe_failure() {
        let (message, details) = describe_failure(&ExecutorError::Handler(
            HandlerError::new("boom").with_details("trace"),
        ));
        assert_eq!(message, "boom");
        assert_eq!(details.as_deref(), Some("trace"));

        let (message, _) = describe_failure(&ExecutorError::UnknownHandler("x".to_string()));
        assert!(message.starts_with(FATAL_FAILURE_PREFIX));
    }
}
