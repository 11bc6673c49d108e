//! # Job Executor
//!
//! Entry point of the crate. A [`JobExecutor`] owns one acquisition loop and one
//! bounded worker pool and serves any number of registered [`ProcessEngine`]s.
//!
//! ## Lifecycle
//!
//! ```text
//! build ─► register_engine* ─► start ─► (acquire / execute) ─► shutdown
//! ```
//!
//! `shutdown` stops the acquisition loop after its current cycle, lets the worker
//! pool drain for up to `worker_pool.shutdown_timeout_seconds`, and marks the
//! executor inactive so that batches still queued unlock their jobs instead of
//! running them. An executor is started at most once.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tasker_job_executor::config::JobExecutorConfig;
//! use tasker_job_executor::engine::ProcessEngine;
//! use tasker_job_executor::executor::JobExecutor;
//! use tasker_job_executor::store::InMemoryJobStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let executor = JobExecutor::builder(JobExecutorConfig::default()).build()?;
//! let engine = ProcessEngine::builder("default")
//!     .store(Arc::new(InMemoryJobStore::new()))
//!     .build()?;
//! executor.register_engine(Arc::new(engine))?;
//!
//! executor.start()?;
//! // ...
//! executor.shutdown().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::acquisition::{
    AcquisitionSignal, AcquisitionState, BackoffJobAcquisitionStrategy, JobAcquisitionStrategy,
    SequentialJobAcquisitionRunnable, SharedAcquisitionState,
};
use crate::config::JobExecutorConfig;
use crate::engine::{EngineRegistry, ProcessEngine};
use crate::error::{ExecutorError, Result};
use crate::execution::{
    rejected_jobs_handler_for, BoundedWorkerPool, DispatchContext, JobDispatcher,
    JobExecutorMetrics, MetricsSnapshot, RejectedJobsHandler,
};
use crate::utils::{system_clock, SharedClock};

struct RunningExecutor {
    acquisition: JoinHandle<()>,
    dispatcher: Arc<JobDispatcher>,
    state: SharedAcquisitionState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Running,
    ShutDown,
}

pub struct JobExecutor {
    config: JobExecutorConfig,
    lock_owner: String,
    engines: Arc<EngineRegistry>,
    signal: Arc<AcquisitionSignal>,
    metrics: Arc<JobExecutorMetrics>,
    clock: SharedClock,
    rejected_jobs_handler: Arc<dyn RejectedJobsHandler>,
    strategy: parking_lot::Mutex<Option<Box<dyn JobAcquisitionStrategy>>>,
    running: parking_lot::Mutex<Option<RunningExecutor>>,
    lifecycle: parking_lot::Mutex<Lifecycle>,
}

impl std::fmt::Debug for JobExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobExecutor")
            .field("lock_owner", &self.lock_owner)
            .field("engines", &self.engines.len())
            .field("lifecycle", &*self.lifecycle.lock())
            .finish()
    }
}

impl JobExecutor {
    pub fn builder(config: JobExecutorConfig) -> JobExecutorBuilder {
        JobExecutorBuilder::new(config)
    }

    pub fn config(&self) -> &JobExecutorConfig {
        &self.config
    }

    /// Identifier stamped on every job this executor locks
    pub fn lock_owner(&self) -> &str {
        &self.lock_owner
    }

    pub fn engines(&self) -> &Arc<EngineRegistry> {
        &self.engines
    }

    pub fn register_engine(&self, engine: Arc<ProcessEngine>) -> Result<()> {
        self.engines.register(Arc::clone(&engine))?;
        engine.attach_job_executor(Arc::clone(&self.signal));
        info!(engine = %engine.name(), lock_owner = %self.lock_owner, "Process engine registered");
        self.signal.job_was_added();
        Ok(())
    }

    pub fn unregister_engine(&self, name: &str) -> Result<Arc<ProcessEngine>> {
        let engine = self.engines.unregister(name)?;
        engine.detach_job_executor();
        info!(engine = %name, "Process engine unregistered");
        Ok(engine)
    }

    /// Spawn the acquisition loop and the worker pool; needs a tokio runtime
    #[instrument(skip(self), fields(lock_owner = %self.lock_owner))]
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        match *lifecycle {
            Lifecycle::Running => {
                return Err(ExecutorError::InvalidState(
                    "job executor is already running".to_string(),
                ))
            }
            Lifecycle::ShutDown => {
                return Err(ExecutorError::InvalidState(
                    "job executor has been shut down".to_string(),
                ))
            }
            Lifecycle::Created => {}
        }

        let strategy = self.strategy.lock().take().unwrap_or_else(|| {
            Box::new(BackoffJobAcquisitionStrategy::from_config(
                &self.config.acquisition,
            ))
        });

        let dispatch = Arc::new(DispatchContext::new(
            self.lock_owner.clone(),
            self.config.acquisition.lock_duration(),
            Arc::clone(&self.signal),
            Arc::clone(&self.metrics),
        ));
        let dispatcher = Arc::new(JobDispatcher::new(
            BoundedWorkerPool::from_config(&self.config.worker_pool),
            Arc::clone(&self.rejected_jobs_handler),
            dispatch,
        ));

        let runnable = SequentialJobAcquisitionRunnable::new(
            Arc::clone(&self.engines),
            Arc::clone(&dispatcher),
            strategy,
            Arc::clone(&self.clock),
        );
        let state = runnable.state_handle();
        let acquisition = tokio::spawn(runnable.run());

        *self.running.lock() = Some(RunningExecutor {
            acquisition,
            dispatcher,
            state,
        });
        *lifecycle = Lifecycle::Running;

        info!(
            pool_size = self.config.worker_pool.core_pool_size,
            queue_size = self.config.worker_pool.queue_size,
            engines = self.engines.len(),
            "Job executor started"
        );
        Ok(())
    }

    /// Stop acquisition and drain the worker pool. Calling it again is a no-op.
    #[instrument(skip(self), fields(lock_owner = %self.lock_owner))]
    pub async fn shutdown(&self) -> Result<()> {
        let running = {
            let mut lifecycle = self.lifecycle.lock();
            let running = self.running.lock().take();
            *lifecycle = Lifecycle::ShutDown;
            running
        };
        self.signal.stop();

        let Some(running) = running else {
            return Ok(());
        };

        info!("Shutting down job executor");
        let timeout = self.config.worker_pool.shutdown_timeout();
        // one budget for stopping acquisition and draining the pool together
        let deadline = tokio::time::Instant::now() + timeout;

        let mut acquisition = running.acquisition;
        let acquisition_stopped = match tokio::time::timeout_at(deadline, &mut acquisition).await {
            Ok(Ok(())) => true,
            Ok(Err(join_error)) => {
                warn!(error = %join_error, "Acquisition task ended abnormally");
                true
            }
            Err(_) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Acquisition loop did not stop in time; aborting it"
                );
                acquisition.abort();
                false
            }
        };

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let pool_drained = running.dispatcher.shutdown(remaining).await;
        *running.state.write() = AcquisitionState::Stopped;

        for engine in self.engines.snapshot() {
            engine.detach_job_executor();
        }

        info!(
            acquisition_stopped = acquisition_stopped,
            pool_drained = pool_drained,
            "Job executor shut down"
        );

        if acquisition_stopped && pool_drained {
            Ok(())
        } else {
            Err(ExecutorError::Timeout(format!(
                "job executor did not shut down within {}s",
                timeout.as_secs()
            )))
        }
    }

    /// Wake the acquisition loop now
    pub fn job_was_added(&self) {
        self.signal.job_was_added();
    }

    pub fn is_active(&self) -> bool {
        *self.lifecycle.lock() == Lifecycle::Running
    }

    pub fn state(&self) -> AcquisitionState {
        let lifecycle = *self.lifecycle.lock();
        let running_state = self
            .running
            .lock()
            .as_ref()
            .map(|running| *running.state.read());
        match (lifecycle, running_state) {
            (_, Some(state)) => state,
            (Lifecycle::ShutDown, None) => AcquisitionState::Stopped,
            (_, None) => AcquisitionState::Idle,
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

pub struct JobExecutorBuilder {
    config: JobExecutorConfig,
    clock: SharedClock,
    rejected_jobs_handler: Option<Arc<dyn RejectedJobsHandler>>,
    strategy: Option<Box<dyn JobAcquisitionStrategy>>,
}

impl JobExecutorBuilder {
    fn new(config: JobExecutorConfig) -> Self {
        Self {
            config,
            clock: system_clock(),
            rejected_jobs_handler: None,
            strategy: None,
        }
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Overrides `worker_pool.rejected_jobs_policy`
    pub fn rejected_jobs_handler(mut self, handler: Arc<dyn RejectedJobsHandler>) -> Self {
        self.rejected_jobs_handler = Some(handler);
        self
    }

    pub fn strategy(mut self, strategy: Box<dyn JobAcquisitionStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn build(self) -> Result<JobExecutor> {
        self.config.validate()?;

        let lock_owner = self
            .config
            .acquisition
            .lock_owner
            .clone()
            .unwrap_or_else(|| format!("node-{}", Uuid::new_v4()));
        let rejected_jobs_handler = self.rejected_jobs_handler.unwrap_or_else(|| {
            rejected_jobs_handler_for(self.config.worker_pool.rejected_jobs_policy)
        });

        Ok(JobExecutor {
            lock_owner,
            engines: Arc::new(EngineRegistry::new()),
            signal: Arc::new(AcquisitionSignal::new()),
            metrics: Arc::new(JobExecutorMetrics::new()),
            clock: self.clock,
            rejected_jobs_handler,
            strategy: parking_lot::Mutex::new(self.strategy),
            running: parking_lot::Mutex::new(None),
            lifecycle: parking_lot::Mutex::new(Lifecycle::Created),
            config: self.config,
        })
    }
}
