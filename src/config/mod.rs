//! # Job Executor Configuration
//!
//! Typed configuration for job acquisition, the bounded worker pool and job defaults.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tasker_job_executor::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load configuration (environment auto-detected)
//! let manager = ConfigManager::load()?;
//!
//! let lock_time = manager.config().acquisition.lock_time();
//! let workers = manager.config().worker_pool.core_pool_size;
//! # Ok(())
//! # }
//! ```
//!
//! Values are layered: built-in defaults, then `job-executor.yaml`, then
//! `job-executor.<environment>.yaml`, then `TASKER_JOBS__*` environment variables.

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

use crate::calendar::RetryTimeCycle;

/// Root configuration for a job executor instance
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobExecutorConfig {
    pub acquisition: AcquisitionConfig,
    pub worker_pool: WorkerPoolConfig,
    pub jobs: JobsConfig,
}

/// Acquisition cadence, backoff and locking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Base wait applied once every engine reports idle
    pub wait_time_ms: u64,
    pub wait_increase_factor: f64,
    pub max_wait_ms: u64,
    /// Base wait applied after lock contention; zero disables contention backoff
    pub backoff_time_ms: u64,
    pub backoff_increase_factor: f64,
    pub max_backoff_ms: u64,
    /// Contention-free cycles required before the backoff level is lowered
    pub backoff_decrease_threshold: u32,
    pub max_jobs_per_acquisition: usize,
    pub lock_time_ms: u64,
    /// Defaults to a random identifier per executor instance
    pub lock_owner: Option<String>,
    /// Give new jobs without a due date a due date of "now" so they sort predictably
    pub ensure_job_due_date_not_null: bool,
    /// Pause applied when every batch handed to the worker pool was rejected
    pub execution_saturation_wait_ms: u64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            wait_time_ms: 5_000,
            wait_increase_factor: 2.0,
            max_wait_ms: 60_000,
            backoff_time_ms: 0,
            backoff_increase_factor: 2.0,
            max_backoff_ms: 0,
            backoff_decrease_threshold: 100,
            max_jobs_per_acquisition: 3,
            lock_time_ms: 300_000,
            lock_owner: None,
            ensure_job_due_date_not_null: false,
            execution_saturation_wait_ms: 100,
        }
    }
}

impl AcquisitionConfig {
    pub fn wait_time(&self) -> Duration {
        Duration::from_millis(self.wait_time_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    pub fn backoff_time(&self) -> Duration {
        Duration::from_millis(self.backoff_time_ms)
    }

    pub fn lock_time(&self) -> Duration {
        Duration::from_millis(self.lock_time_ms)
    }

    /// Lock time as a chrono duration for due date and lock expiration arithmetic
    pub fn lock_duration(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(i64::try_from(self.lock_time_ms).unwrap_or(i64::MAX))
    }
}

/// What the dispatcher does with a batch the worker pool refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectedJobsPolicy {
    /// Hand the batch back to the acquisition loop for the next cycle
    #[default]
    NotifyAcquisition,
    /// Execute the batch on the acquisition task itself
    CallerRuns,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    pub core_pool_size: usize,
    pub queue_size: usize,
    pub shutdown_timeout_seconds: u64,
    pub rejected_jobs_policy: RejectedJobsPolicy,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            core_pool_size: 3,
            queue_size: 3,
            shutdown_timeout_seconds: 60,
            rejected_jobs_policy: RejectedJobsPolicy::NotifyAcquisition,
        }
    }
}

impl WorkerPoolConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub default_retries: i32,
    /// Engine-wide retry schedule such as `R5/PT5M` or `PT1M,PT5M,PT10M`
    pub failed_job_retry_time_cycle: Option<String>,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            default_retries: 3,
            failed_job_retry_time_cycle: None,
        }
    }
}

impl JobExecutorConfig {
    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let acquisition = &self.acquisition;

        if acquisition.max_jobs_per_acquisition == 0 {
            return Err(ConfigurationError::invalid_value(
                "acquisition.max_jobs_per_acquisition",
                acquisition.max_jobs_per_acquisition,
                "at least one job must be acquired per cycle",
            ));
        }

        if acquisition.lock_time_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "acquisition.lock_time_ms",
                acquisition.lock_time_ms,
                "lock time must be greater than 0",
            ));
        }

        for (field, factor) in [
            ("acquisition.wait_increase_factor", acquisition.wait_increase_factor),
            ("acquisition.backoff_increase_factor", acquisition.backoff_increase_factor),
        ] {
            if !factor.is_finite() || factor <= 1.0 {
                return Err(ConfigurationError::invalid_value(
                    field,
                    factor,
                    "increase factor must be a finite number above 1.0",
                ));
            }
        }

        if acquisition.max_wait_ms < acquisition.wait_time_ms {
            return Err(ConfigurationError::invalid_value(
                "acquisition.max_wait_ms",
                acquisition.max_wait_ms,
                "max wait must not be lower than wait_time_ms",
            ));
        }

        if acquisition.max_backoff_ms < acquisition.backoff_time_ms {
            return Err(ConfigurationError::invalid_value(
                "acquisition.max_backoff_ms",
                acquisition.max_backoff_ms,
                "max backoff must not be lower than backoff_time_ms",
            ));
        }

        if matches!(acquisition.lock_owner.as_deref(), Some(owner) if owner.trim().is_empty()) {
            return Err(ConfigurationError::invalid_value(
                "acquisition.lock_owner",
                "",
                "lock owner must not be blank",
            ));
        }

        if self.worker_pool.core_pool_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "worker_pool.core_pool_size",
                self.worker_pool.core_pool_size,
                "pool size must be greater than 0",
            ));
        }

        if self.worker_pool.queue_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "worker_pool.queue_size",
                self.worker_pool.queue_size,
                "queue size must be greater than 0",
            ));
        }

        if self.jobs.default_retries < 0 {
            return Err(ConfigurationError::invalid_value(
                "jobs.default_retries",
                self.jobs.default_retries,
                "retries must not be negative",
            ));
        }

        if let Some(cycle) = &self.jobs.failed_job_retry_time_cycle {
            RetryTimeCycle::parse(cycle).map_err(|e| {
                ConfigurationError::invalid_value(
                    "jobs.failed_job_retry_time_cycle",
                    cycle,
                    e.to_string(),
                )
            })?;
        }

        Ok(())
    }
}
