//! # Acquisition Loop
//!
//! A single task per executor that repeatedly locks due jobs for every registered
//! engine and hands the resulting batches to the dispatcher.
//!
//! ## Cycle
//!
//! ```text
//! reset context ─► for each engine: num_jobs ─► lock ─► dispatch (deferred first, then new)
//!       ▲                                                              │
//!       │                                                              ▼
//!    sleep(wait) ◄── shorten to next timer ◄── wait_time ◄── strategy.reconfigure(context)
//! ```
//!
//! The sleep ends early when a job is added or the executor stops. Work already
//! handed to the pool is never cancelled by a stop.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::{AcquiredJobs, AcquisitionSignal, JobAcquisitionContext, JobAcquisitionStrategy};
use crate::constants::defaults::DUE_TIMER_LOOKAHEAD;
use crate::engine::{EngineRegistry, ProcessEngine};
use crate::execution::{JobDispatcher, JobExecutorMetrics};
use crate::logging::{log_acquisition_cycle, log_error};
use crate::utils::SharedClock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionState {
    Idle,
    Acquiring,
    Dispatching,
    Sleeping,
    Stopped,
}

impl fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AcquisitionState::Idle => "idle",
            AcquisitionState::Acquiring => "acquiring",
            AcquisitionState::Dispatching => "dispatching",
            AcquisitionState::Sleeping => "sleeping",
            AcquisitionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

pub type SharedAcquisitionState = Arc<parking_lot::RwLock<AcquisitionState>>;

pub struct SequentialJobAcquisitionRunnable {
    engines: Arc<EngineRegistry>,
    dispatcher: Arc<JobDispatcher>,
    signal: Arc<AcquisitionSignal>,
    metrics: Arc<JobExecutorMetrics>,
    strategy: Box<dyn JobAcquisitionStrategy>,
    context: JobAcquisitionContext,
    lock_owner: String,
    lock_duration: chrono::Duration,
    clock: SharedClock,
    state: SharedAcquisitionState,
}

impl fmt::Debug for SequentialJobAcquisitionRunnable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequentialJobAcquisitionRunnable")
            .field("lock_owner", &self.lock_owner)
            .field("strategy", &self.strategy)
            .field("state", &*self.state.read())
            .finish()
    }
}

impl SequentialJobAcquisitionRunnable {
    pub fn new(
        engines: Arc<EngineRegistry>,
        dispatcher: Arc<JobDispatcher>,
        strategy: Box<dyn JobAcquisitionStrategy>,
        clock: SharedClock,
    ) -> Self {
        let dispatch = dispatcher.dispatch_context();
        Self {
            signal: Arc::clone(dispatch.signal()),
            metrics: Arc::clone(dispatch.metrics()),
            lock_owner: dispatch.lock_owner().to_string(),
            lock_duration: dispatch.lock_duration(),
            engines,
            dispatcher,
            strategy,
            context: JobAcquisitionContext::new(),
            clock,
            state: Arc::new(parking_lot::RwLock::new(AcquisitionState::Idle)),
        }
    }

    pub fn state_handle(&self) -> SharedAcquisitionState {
        Arc::clone(&self.state)
    }

    pub fn context(&self) -> &JobAcquisitionContext {
        &self.context
    }

    pub fn strategy(&self) -> &dyn JobAcquisitionStrategy {
        self.strategy.as_ref()
    }

    fn set_state(&self, state: AcquisitionState) {
        *self.state.write() = state;
    }

    /// Loop until stopped
    pub async fn run(mut self) {
        info!(lock_owner = %self.lock_owner, "Job acquisition started");

        while !self.signal.is_interrupted() {
            let wait = self.run_cycle().await;
            if self.signal.is_interrupted() {
                break;
            }

            if wait.is_zero() || self.signal.is_job_added() {
                tokio::task::yield_now().await;
                continue;
            }

            self.set_state(AcquisitionState::Sleeping);
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.signal.notified() => {
                    debug!("Acquisition woken early");
                }
            }
            self.set_state(AcquisitionState::Idle);
        }

        self.set_state(AcquisitionState::Stopped);
        info!(lock_owner = %self.lock_owner, "Job acquisition stopped");
    }

    /// One acquisition cycle. Returns how long to sleep before the next one.
    pub async fn run_cycle(&mut self) -> Duration {
        let started = Instant::now();
        self.context.reset();
        self.context.set_acquisition_time(self.clock.now());
        self.metrics.record_cycle();

        let engines = self.engines.snapshot();
        for engine in &engines {
            self.acquire_and_dispatch(engine).await;
        }

        let job_added = self.signal.clear_job_added();
        self.context.set_job_added(job_added);
        self.strategy.reconfigure(&self.context);

        let mut wait = self.strategy.wait_time();
        if !wait.is_zero() {
            wait = self.shorten_to_next_timer(&engines, wait).await;
        }
        let wait = wait.saturating_sub(started.elapsed());

        log_acquisition_cycle(
            engines.len(),
            self.context.total_acquired(),
            self.context.total_failed_to_lock(),
            self.context.total_rejected_batches(),
            wait.as_millis() as u64,
        );
        self.set_state(AcquisitionState::Idle);
        wait
    }

    async fn acquire_and_dispatch(&mut self, engine: &Arc<ProcessEngine>) {
        self.set_state(AcquisitionState::Acquiring);
        let num_jobs = self.strategy.num_jobs_to_acquire(engine.name());

        let acquired = if num_jobs > 0 {
            match engine
                .store()
                .lock(
                    engine.name(),
                    num_jobs,
                    &self.lock_owner,
                    self.lock_duration,
                    self.clock.now(),
                )
                .await
            {
                Ok(acquired) => {
                    self.metrics
                        .record_acquisition(acquired.size(), acquired.failed_to_lock_count());
                    Some(acquired)
                }
                Err(error) => {
                    log_error(
                        "job_acquisition",
                        "lock",
                        &error.to_string(),
                        Some(engine.name()),
                    );
                    self.metrics.record_acquisition_failure();
                    self.context.set_acquisition_exception(error);
                    None
                }
            }
        } else {
            Some(AcquiredJobs::new(0))
        };

        self.set_state(AcquisitionState::Dispatching);
        let deferred = self.context.additional_batches_for(engine.name()).to_vec();
        for batch in deferred {
            self.dispatcher
                .execute_jobs(batch, engine, &mut self.context)
                .await;
        }

        if let Some(acquired) = acquired {
            for batch in acquired.batches().to_vec() {
                self.dispatcher
                    .execute_jobs(batch, engine, &mut self.context)
                    .await;
            }
            self.context.submit_acquired_jobs(engine.name(), acquired);
        }
    }

    /// Never sleep past the next due timer
    async fn shorten_to_next_timer(
        &self,
        engines: &[Arc<ProcessEngine>],
        wait: Duration,
    ) -> Duration {
        let now = self.clock.now();
        let Ok(horizon) = chrono::Duration::from_std(wait) else {
            return wait;
        };

        let mut shortened = wait;
        for engine in engines {
            match engine
                .store()
                .find_due_unlocked_timers(now + horizon, DUE_TIMER_LOOKAHEAD)
                .await
            {
                Ok(timers) => {
                    let next_due = timers.iter().filter_map(|timer| timer.due_date).min();
                    if let Some(due) = next_due {
                        let until_due = (due - now).to_std().unwrap_or(Duration::ZERO);
                        shortened = shortened.min(until_due);
                    }
                }
                Err(error) => debug!(
                    engine = %engine.name(),
                    error = %error,
                    "Could not look up next due timer"
                ),
            }
        }
        shortened
    }
}
