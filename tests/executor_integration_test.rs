//! The executor as a whole: background acquisition, dispatch onto the worker
//! pool, backpressure and shutdown.

mod common;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use common::{engine_with, eventually, fast_config, OverlapDetectingHandler, RecordingHandler};
use tasker_job_executor::acquisition::AcquisitionState;
use tasker_job_executor::config::RejectedJobsPolicy;
use tasker_job_executor::error::{ExecutorError, HandlerError, Result};
use tasker_job_executor::execution::JobExecutionContext;
use tasker_job_executor::executor::JobExecutor;
use tasker_job_executor::models::{Job, JobId};
use tasker_job_executor::registry::JobHandler;
use tasker_job_executor::store::{InMemoryJobStore, JobFailure, JobQuery, JobStore};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_executor_runs_scheduled_jobs_and_stops() {
    let store = Arc::new(InMemoryJobStore::new());
    let handler = RecordingHandler::new("async-continuation");
    let engine = engine_with(store.clone(), vec![handler.clone()], None);

    for n in 0..5 {
        engine
            .schedule_job(
                Job::message("async-continuation", 3, Utc::now())
                    .with_configuration(n.to_string()),
            )
            .await
            .unwrap();
    }

    let executor = JobExecutor::builder(fast_config()).build().unwrap();
    executor.register_engine(Arc::clone(&engine)).unwrap();
    executor.start().unwrap();

    let drained = eventually(5_000, || {
        let store = Arc::clone(&store);
        async move { store.is_empty().await }
    })
    .await;
    assert!(drained, "all jobs should have been executed");
    assert_eq!(handler.count(), 5);

    executor.shutdown().await.unwrap();
    assert_eq!(executor.state(), AcquisitionState::Stopped);
    assert!(!engine.has_job_executor());

    let metrics = executor.metrics();
    assert_eq!(metrics.jobs_succeeded, 5);
    assert_eq!(metrics.jobs_acquired, 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_new_job_wakes_an_idle_executor() {
    let store = Arc::new(InMemoryJobStore::new());
    let handler = RecordingHandler::new("async-continuation");
    let engine = engine_with(store.clone(), vec![handler.clone()], None);

    let mut config = fast_config();
    // far longer than the test is willing to wait
    config.acquisition.wait_time_ms = 30_000;
    config.acquisition.max_wait_ms = 60_000;
    let executor = JobExecutor::builder(config).build().unwrap();
    executor.register_engine(Arc::clone(&engine)).unwrap();
    executor.start().unwrap();

    let running = &executor;
    let idle = eventually(2_000, || async move {
        running.metrics().acquisition_cycles >= 1
            && running.state() == AcquisitionState::Sleeping
    })
    .await;
    assert!(idle, "first cycle finds nothing and goes to sleep");

    engine
        .schedule_job(Job::message("async-continuation", 3, Utc::now()))
        .await
        .unwrap();

    let executed = eventually(2_000, || {
        let handler = Arc::clone(&handler);
        async move { handler.count() == 1 }
    })
    .await;
    assert!(executed, "scheduling must cut the idle wait short");

    executor.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exclusive_jobs_of_one_instance_never_overlap() {
    let store = Arc::new(InMemoryJobStore::new());
    let handler = OverlapDetectingHandler::new();
    let engine = engine_with(store.clone(), vec![handler.clone()], None);

    let now = Utc::now();
    for instance in ["pi-1", "pi-2"] {
        for _ in 0..4 {
            store
                .insert(Job::message("slow", 3, now).with_process_instance(instance))
                .await
                .unwrap();
        }
    }

    let executor = JobExecutor::builder(fast_config()).build().unwrap();
    executor.register_engine(Arc::clone(&engine)).unwrap();
    executor.start().unwrap();

    let drained = eventually(5_000, || {
        let handler = Arc::clone(&handler);
        async move { handler.completed() == 8 }
    })
    .await;
    executor.shutdown().await.unwrap();

    assert!(drained);
    assert!(!handler.overlapped());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rejected_batches_are_retried_on_later_cycles() {
    let store = Arc::new(InMemoryJobStore::new());
    let handler = OverlapDetectingHandler::new();
    let engine = engine_with(store.clone(), vec![handler.clone()], None);

    let now = Utc::now();
    for _ in 0..6 {
        store
            .insert(Job::message("slow", 3, now).with_exclusive(false))
            .await
            .unwrap();
    }

    let mut config = fast_config();
    config.worker_pool.core_pool_size = 1;
    config.worker_pool.queue_size = 1;
    let executor = JobExecutor::builder(config).build().unwrap();
    executor.register_engine(Arc::clone(&engine)).unwrap();
    executor.start().unwrap();

    let drained = eventually(10_000, || {
        let store = Arc::clone(&store);
        async move { store.is_empty().await }
    })
    .await;
    executor.shutdown().await.unwrap();

    assert!(drained, "rejection must delay jobs, never drop them");
    assert_eq!(handler.completed(), 6);
    let metrics = executor.metrics();
    assert!(metrics.rejected_batches >= 1);
    assert_eq!(metrics.jobs_succeeded, 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_caller_runs_policy_executes_overflow_inline() {
    let store = Arc::new(InMemoryJobStore::new());
    let handler = RecordingHandler::new("async-continuation");
    let engine = engine_with(store.clone(), vec![handler.clone()], None);

    let now = Utc::now();
    for _ in 0..6 {
        store
            .insert(Job::message("async-continuation", 3, now).with_exclusive(false))
            .await
            .unwrap();
    }

    let mut config = fast_config();
    config.worker_pool.core_pool_size = 1;
    config.worker_pool.queue_size = 1;
    config.worker_pool.rejected_jobs_policy = RejectedJobsPolicy::CallerRuns;
    let executor = JobExecutor::builder(config).build().unwrap();
    executor.register_engine(Arc::clone(&engine)).unwrap();
    executor.start().unwrap();

    let drained = eventually(5_000, || {
        let store = Arc::clone(&store);
        async move { store.is_empty().await }
    })
    .await;
    executor.shutdown().await.unwrap();

    assert!(drained);
    assert_eq!(handler.count(), 6);
    assert_eq!(executor.metrics().jobs_succeeded, 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_interrupts_a_long_idle_wait() {
    let store = Arc::new(InMemoryJobStore::new());
    let engine = engine_with(store, vec![], None);

    let mut config = fast_config();
    config.acquisition.wait_time_ms = 60_000;
    config.acquisition.max_wait_ms = 60_000;
    let executor = JobExecutor::builder(config).build().unwrap();
    executor.register_engine(engine).unwrap();
    executor.start().unwrap();
    tokio::time::sleep(StdDuration::from_millis(50)).await;

    let stopped = tokio::time::timeout(StdDuration::from_secs(2), executor.shutdown()).await;
    assert!(matches!(stopped, Ok(Ok(()))));
    assert!(!executor.is_active());
}

/// Delegates to an in-memory store; once stalled, candidate queries hang
#[derive(Debug, Default)]
struct StallingStore {
    inner: InMemoryJobStore,
    stalled: AtomicBool,
}

#[async_trait]
impl JobStore for StallingStore {
    async fn insert(&self, job: Job) -> Result<()> {
        self.inner.insert(job).await
    }

    async fn find_by_id(&self, id: JobId) -> Result<Option<Job>> {
        self.inner.find_by_id(id).await
    }

    async fn find_acquirable(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Job>> {
        if self.stalled.load(Ordering::SeqCst) {
            tokio::time::sleep(StdDuration::from_secs(30)).await;
        }
        self.inner.find_acquirable(now, limit).await
    }

    async fn try_lock(
        &self,
        id: JobId,
        expected_revision: i32,
        lock_owner: &str,
        lock_expiration_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.inner
            .try_lock(id, expected_revision, lock_owner, lock_expiration_time, now)
            .await
    }

    async fn lock_job(
        &self,
        id: JobId,
        expected_revision: i32,
        lock_owner: &str,
        lock_expiration_time: DateTime<Utc>,
    ) -> Result<()> {
        self.inner
            .lock_job(id, expected_revision, lock_owner, lock_expiration_time)
            .await
    }

    async fn release(&self, id: JobId) -> Result<()> {
        self.inner.release(id).await
    }

    async fn record_failure(&self, failure: &JobFailure) -> Result<()> {
        self.inner.record_failure(failure).await
    }

    async fn complete(
        &self,
        id: JobId,
        expected_revision: i32,
        lock_owner: &str,
        created: Vec<Job>,
    ) -> Result<()> {
        self.inner
            .complete(id, expected_revision, lock_owner, created)
            .await
    }

    async fn delete(&self, id: JobId) -> Result<bool> {
        self.inner.delete(id).await
    }

    async fn find_due_unlocked_timers(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Job>> {
        self.inner.find_due_unlocked_timers(before, limit).await
    }

    async fn update_due_date(
        &self,
        id: JobId,
        expected_revision: i32,
        due_date: Option<DateTime<Utc>>,
        repeat_offset_ms: i64,
    ) -> Result<()> {
        self.inner
            .update_due_date(id, expected_revision, due_date, repeat_offset_ms)
            .await
    }

    async fn update_retries(&self, id: JobId, expected_revision: i32, retries: i32) -> Result<()> {
        self.inner.update_retries(id, expected_revision, retries).await
    }

    async fn update_priority(&self, id: JobId, expected_revision: i32, priority: i64) -> Result<()> {
        self.inner.update_priority(id, expected_revision, priority).await
    }

    async fn update_suspension(
        &self,
        id: JobId,
        expected_revision: i32,
        suspended: bool,
    ) -> Result<()> {
        self.inner
            .update_suspension(id, expected_revision, suspended)
            .await
    }

    async fn find_jobs(&self, query: &JobQuery) -> Result<Vec<Job>> {
        self.inner.find_jobs(query).await
    }
}

/// Never finishes within a test's lifetime
#[derive(Default)]
struct StuckHandler {
    started: AtomicBool,
}

#[async_trait]
impl JobHandler for StuckHandler {
    fn handler_type(&self) -> &str {
        "stuck"
    }

    async fn execute(
        &self,
        _configuration: &Value,
        _context: &mut JobExecutionContext,
    ) -> std::result::Result<(), HandlerError> {
        self.started.store(true, Ordering::SeqCst);
        tokio::time::sleep(StdDuration::from_secs(30)).await;
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_timeout_covers_acquisition_and_workers_together() {
    let store = Arc::new(StallingStore::default());
    let handler = Arc::new(StuckHandler::default());
    let engine = engine_with(store.clone(), vec![handler.clone()], None);
    engine
        .schedule_job(Job::message("stuck", 3, Utc::now()))
        .await
        .unwrap();

    let mut config = fast_config();
    config.worker_pool.shutdown_timeout_seconds = 1;
    let executor = JobExecutor::builder(config).build().unwrap();
    executor.register_engine(engine).unwrap();
    executor.start().unwrap();

    let started = eventually(5_000, || {
        let handler = Arc::clone(&handler);
        async move { handler.started.load(Ordering::SeqCst) }
    })
    .await;
    assert!(started);
    // the next acquisition cycle hangs in the store
    store.stalled.store(true, Ordering::SeqCst);
    tokio::time::sleep(StdDuration::from_millis(300)).await;

    let begun = tokio::time::Instant::now();
    let result = executor.shutdown().await;
    let elapsed = begun.elapsed();

    assert!(matches!(result, Err(ExecutorError::Timeout(_))));
    assert!(
        elapsed < StdDuration::from_millis(1_600),
        "shutdown took {elapsed:?} with a 1s budget"
    );
}

/// Holds every execution until released and flags any two running at once
#[derive(Default)]
struct GatedHandler {
    running: AtomicUsize,
    started: AtomicUsize,
    completed: AtomicUsize,
    overlapped: AtomicBool,
    released: AtomicBool,
}

#[async_trait]
impl JobHandler for GatedHandler {
    fn handler_type(&self) -> &str {
        "gated"
    }

    async fn execute(
        &self,
        _configuration: &Value,
        _context: &mut JobExecutionContext,
    ) -> std::result::Result<(), HandlerError> {
        if self.running.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        self.started.fetch_add(1, Ordering::SeqCst);
        while !self.released.load(Ordering::SeqCst) {
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exclusive_job_scheduled_while_its_instance_runs_waits() {
    let store = Arc::new(InMemoryJobStore::new());
    let handler = Arc::new(GatedHandler::default());
    let engine = engine_with(store.clone(), vec![handler.clone()], None);
    engine
        .schedule_job(Job::message("gated", 3, Utc::now()).with_process_instance("pi-1"))
        .await
        .unwrap();

    let executor = JobExecutor::builder(fast_config()).build().unwrap();
    executor.register_engine(Arc::clone(&engine)).unwrap();
    executor.start().unwrap();

    let first_running = eventually(5_000, || {
        let handler = Arc::clone(&handler);
        async move { handler.started.load(Ordering::SeqCst) == 1 }
    })
    .await;
    assert!(first_running);

    engine
        .schedule_job(Job::message("gated", 3, Utc::now()).with_process_instance("pi-1"))
        .await
        .unwrap();
    // several acquisition cycles pass while the first job holds the instance
    tokio::time::sleep(StdDuration::from_millis(300)).await;
    assert_eq!(handler.started.load(Ordering::SeqCst), 1);

    handler.released.store(true, Ordering::SeqCst);
    let drained = eventually(5_000, || {
        let handler = Arc::clone(&handler);
        async move { handler.completed.load(Ordering::SeqCst) == 2 }
    })
    .await;
    executor.shutdown().await.unwrap();

    assert!(drained);
    assert!(!handler.overlapped.load(Ordering::SeqCst));
}
