//! Shared fixtures for the integration tests: handlers that record what ran,
//! engine and dispatch builders, and polling helpers.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tasker_job_executor::acquisition::AcquisitionSignal;
use tasker_job_executor::config::JobExecutorConfig;
use tasker_job_executor::engine::ProcessEngine;
use tasker_job_executor::error::HandlerError;
use tasker_job_executor::execution::{DispatchContext, JobExecutionContext, JobExecutorMetrics};
use tasker_job_executor::models::Job;
use tasker_job_executor::registry::{JobHandler, JobHandlerRegistry};
use tasker_job_executor::store::JobStore;
use tasker_job_executor::utils::SharedClock;

pub const NODE: &str = "node-a";

pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

/// Executor configuration with short waits so tests finish quickly
pub fn fast_config() -> JobExecutorConfig {
    let mut config = JobExecutorConfig::default();
    config.acquisition.wait_time_ms = 20;
    config.acquisition.max_wait_ms = 100;
    config.acquisition.max_jobs_per_acquisition = 10;
    config.acquisition.lock_owner = Some(NODE.to_string());
    config.worker_pool.core_pool_size = 4;
    config.worker_pool.queue_size = 8;
    config.worker_pool.shutdown_timeout_seconds = 5;
    config
}

pub fn engine_with(
    store: Arc<dyn JobStore>,
    handlers: Vec<Arc<dyn JobHandler>>,
    clock: Option<SharedClock>,
) -> Arc<ProcessEngine> {
    let registry = Arc::new(JobHandlerRegistry::new());
    for handler in handlers {
        registry.register(handler).unwrap();
    }
    let mut builder = ProcessEngine::builder("default")
        .store(store)
        .handlers(registry);
    if let Some(clock) = clock {
        builder = builder.clock(clock);
    }
    Arc::new(builder.build().unwrap())
}

pub fn dispatch_context() -> Arc<DispatchContext> {
    Arc::new(DispatchContext::new(
        NODE,
        Duration::minutes(5),
        Arc::new(AcquisitionSignal::new()),
        Arc::new(JobExecutorMetrics::new()),
    ))
}

/// Poll `condition` every 10ms until it holds or `timeout_ms` passes
pub async fn eventually<F, Fut>(timeout_ms: u64, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_millis(timeout_ms);
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}

/// Succeeds and records the configuration of every job it ran
pub struct RecordingHandler {
    handler_type: String,
    executed: Mutex<Vec<Value>>,
}

impl RecordingHandler {
    pub fn new(handler_type: &str) -> Arc<Self> {
        Arc::new(Self {
            handler_type: handler_type.to_string(),
            executed: Mutex::new(Vec::new()),
        })
    }

    pub fn executed(&self) -> Vec<Value> {
        self.executed.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.executed.lock().len()
    }
}

#[async_trait]
impl JobHandler for RecordingHandler {
    fn handler_type(&self) -> &str {
        &self.handler_type
    }

    async fn execute(
        &self,
        configuration: &Value,
        _context: &mut JobExecutionContext,
    ) -> Result<(), HandlerError> {
        self.executed.lock().push(configuration.clone());
        Ok(())
    }
}

/// Always fails
pub struct FailingHandler;

#[async_trait]
impl JobHandler for FailingHandler {
    fn handler_type(&self) -> &str {
        "failing"
    }

    async fn execute(
        &self,
        _configuration: &Value,
        _context: &mut JobExecutionContext,
    ) -> Result<(), HandlerError> {
        Err(HandlerError::new("remote service refused the request"))
    }
}

/// Sleeps while holding a per-process-instance slot and flags any overlap
#[derive(Default)]
pub struct OverlapDetectingHandler {
    running: Mutex<HashMap<String, usize>>,
    overlapped: AtomicBool,
    completed: AtomicUsize,
}

impl OverlapDetectingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn overlapped(&self) -> bool {
        self.overlapped.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobHandler for OverlapDetectingHandler {
    fn handler_type(&self) -> &str {
        "slow"
    }

    async fn execute(
        &self,
        _configuration: &Value,
        context: &mut JobExecutionContext,
    ) -> Result<(), HandlerError> {
        let instance = context
            .job()
            .process_instance_id
            .clone()
            .unwrap_or_default();
        {
            let mut running = self.running.lock();
            let active = running.entry(instance.clone()).or_insert(0);
            *active += 1;
            if *active > 1 {
                self.overlapped.store(true, Ordering::SeqCst);
            }
        }

        tokio::time::sleep(std::time::Duration::from_millis(15)).await;

        if let Some(active) = self.running.lock().get_mut(&instance) {
            *active -= 1;
        }
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Lock `job` for [`NODE`] and insert it
pub async fn insert_locked(store: &dyn JobStore, mut job: Job, now: DateTime<Utc>) -> Job {
    job.lock(NODE, now + Duration::minutes(5));
    store.insert(job.clone()).await.unwrap();
    job
}
