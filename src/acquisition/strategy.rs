//! # Job Acquisition Strategy
//!
//! Paces the acquisition loop. After every cycle the strategy looks at the cycle's
//! [`JobAcquisitionContext`] and adjusts two independent levels:
//!
//! - the **idle level** grows while engines keep coming back with fewer jobs than
//!   requested and drops to zero as soon as there is work (or a job was added);
//! - the **backoff level** grows whenever another node won a lock race and shrinks
//!   again after a run of contention-free cycles. Higher backoff also means larger
//!   acquisition batches, so competing nodes spread out instead of colliding.
//!
//! Wait time for level `l` of a series with base `b`, factor `f` and maximum `m`:
//! `0` for `l == 0`, `b * f^(l-1)` below the maximum level, `m` from there on.

use std::collections::HashMap;
use std::fmt::Debug;
use std::time::Duration;

use super::JobAcquisitionContext;
use crate::config::AcquisitionConfig;
use crate::constants::defaults::BACKOFF_JITTER_RATIO;

pub trait JobAcquisitionStrategy: Send + Sync + Debug {
    fn reconfigure(&mut self, context: &JobAcquisitionContext);

    fn wait_time(&self) -> Duration;

    fn num_jobs_to_acquire(&self, engine: &str) -> usize;
}

/// Number of levels in a wait series, or 0 when the series is disabled
pub fn max_level(base_ms: u64, max_ms: u64, factor: f64) -> u32 {
    if base_ms == 0 || max_ms == 0 || max_ms < base_ms || factor.is_nan() || factor <= 1.0 {
        return 0;
    }
    let ratio = max_ms as f64 / base_ms as f64;
    let steps = (ratio.ln() / factor.ln() + 1e-9).floor();
    steps as u32 + 2
}

pub fn level_wait_ms(level: u32, max_level: u32, base_ms: u64, factor: f64, max_ms: u64) -> u64 {
    if level == 0 {
        0
    } else if level >= max_level {
        max_ms
    } else {
        let exponent = i32::try_from(level - 1).unwrap_or(i32::MAX);
        (base_ms as f64 * factor.powi(exponent)) as u64
    }
}

#[derive(Debug, Clone)]
pub struct BackoffJobAcquisitionStrategy {
    base_idle_wait_ms: u64,
    idle_increase_factor: f64,
    max_idle_wait_ms: u64,
    max_idle_level: u32,

    base_backoff_wait_ms: u64,
    backoff_increase_factor: f64,
    max_backoff_wait_ms: u64,
    max_backoff_level: u32,
    backoff_decrease_threshold: u32,

    base_num_jobs_to_acquire: usize,
    execution_saturation_wait_ms: u64,

    idle_level: u32,
    backoff_level: u32,
    num_acquisitions_without_lock_failure: u32,
    apply_jitter: bool,
    execution_saturated: bool,
    jobs_to_acquire: HashMap<String, usize>,
}

impl BackoffJobAcquisitionStrategy {
    pub fn from_config(config: &AcquisitionConfig) -> Self {
        Self {
            base_idle_wait_ms: config.wait_time_ms,
            idle_increase_factor: config.wait_increase_factor,
            max_idle_wait_ms: config.max_wait_ms,
            max_idle_level: max_level(
                config.wait_time_ms,
                config.max_wait_ms,
                config.wait_increase_factor,
            ),
            base_backoff_wait_ms: config.backoff_time_ms,
            backoff_increase_factor: config.backoff_increase_factor,
            max_backoff_wait_ms: config.max_backoff_ms,
            max_backoff_level: max_level(
                config.backoff_time_ms,
                config.max_backoff_ms,
                config.backoff_increase_factor,
            ),
            backoff_decrease_threshold: config.backoff_decrease_threshold,
            base_num_jobs_to_acquire: config.max_jobs_per_acquisition,
            execution_saturation_wait_ms: config.execution_saturation_wait_ms,
            idle_level: 0,
            backoff_level: 0,
            num_acquisitions_without_lock_failure: 0,
            apply_jitter: false,
            execution_saturated: false,
            jobs_to_acquire: HashMap::new(),
        }
    }

    pub fn idle_level(&self) -> u32 {
        self.idle_level
    }

    pub fn max_idle_level(&self) -> u32 {
        self.max_idle_level
    }

    pub fn backoff_level(&self) -> u32 {
        self.backoff_level
    }

    pub fn max_backoff_level(&self) -> u32 {
        self.max_backoff_level
    }

    pub fn is_execution_saturated(&self) -> bool {
        self.execution_saturated
    }

    pub fn idle_wait_for_level(&self, level: u32) -> u64 {
        level_wait_ms(
            level,
            self.max_idle_level,
            self.base_idle_wait_ms,
            self.idle_increase_factor,
            self.max_idle_wait_ms,
        )
    }

    /// Backoff for a level, without jitter
    pub fn backoff_wait_for_level(&self, level: u32) -> u64 {
        level_wait_ms(
            level,
            self.max_backoff_level,
            self.base_backoff_wait_ms,
            self.backoff_increase_factor,
            self.max_backoff_wait_ms,
        )
    }

    fn reconfigure_idle_level(&mut self, context: &JobAcquisitionContext) {
        if context.is_job_added() {
            self.idle_level = 0;
        } else if context.are_all_engines_idle() || context.acquisition_exception().is_some() {
            if self.idle_level < self.max_idle_level {
                self.idle_level += 1;
            }
        } else {
            self.idle_level = 0;
        }
    }

    fn reconfigure_backoff_level(&mut self, context: &JobAcquisitionContext) {
        if context.has_job_acquisition_lock_failure_occurred() {
            self.num_acquisitions_without_lock_failure = 0;
            self.apply_jitter = true;
            if self.backoff_level < self.max_backoff_level {
                self.backoff_level += 1;
            }
        } else {
            self.apply_jitter = false;
            self.num_acquisitions_without_lock_failure =
                self.num_acquisitions_without_lock_failure.saturating_add(1);
            if self.num_acquisitions_without_lock_failure >= self.backoff_decrease_threshold
                && self.backoff_level > 0
            {
                self.backoff_level -= 1;
                self.num_acquisitions_without_lock_failure = 0;
            }
        }
    }

    fn reconfigure_num_jobs_to_acquire(&mut self, context: &JobAcquisitionContext) {
        self.jobs_to_acquire.clear();
        let exponent = i32::try_from(self.backoff_level).unwrap_or(i32::MAX);
        let scaled = (self.base_num_jobs_to_acquire as f64
            * self.backoff_increase_factor.powi(exponent)) as usize;

        for engine in context.acquired_jobs().keys() {
            let rejected: usize = context
                .rejected_batches_for(engine)
                .iter()
                .map(Vec::len)
                .sum();
            self.jobs_to_acquire
                .insert(engine.clone(), scaled.saturating_sub(rejected));
        }
    }

    /// Every engine had batches rejected and nothing it submitted got through
    fn all_submitted_jobs_rejected(context: &JobAcquisitionContext) -> bool {
        !context.acquired_jobs().is_empty()
            && context.acquired_jobs().iter().all(|(engine, acquired)| {
                let submitted =
                    acquired.batch_count() + context.additional_batches_for(engine).len();
                let rejected = context.rejected_batches_for(engine).len();
                rejected > 0 && submitted <= rejected
            })
    }

    fn backoff_wait_ms(&self) -> u64 {
        let backoff = self.backoff_wait_for_level(self.backoff_level);
        if self.apply_jitter {
            backoff + (fastrand::f64() * backoff as f64 * BACKOFF_JITTER_RATIO) as u64
        } else {
            backoff
        }
    }
}

impl JobAcquisitionStrategy for BackoffJobAcquisitionStrategy {
    fn reconfigure(&mut self, context: &JobAcquisitionContext) {
        self.reconfigure_idle_level(context);
        self.reconfigure_backoff_level(context);
        self.reconfigure_num_jobs_to_acquire(context);
        self.execution_saturated = Self::all_submitted_jobs_rejected(context);
    }

    fn wait_time(&self) -> Duration {
        let wait_ms = if self.idle_level > 0 {
            self.idle_wait_for_level(self.idle_level)
        } else if self.backoff_level > 0 {
            self.backoff_wait_ms()
        } else if self.execution_saturated {
            self.execution_saturation_wait_ms
        } else {
            0
        };
        Duration::from_millis(wait_ms)
    }

    fn num_jobs_to_acquire(&self, engine: &str) -> usize {
        self.jobs_to_acquire
            .get(engine)
            .copied()
            .unwrap_or(self.base_num_jobs_to_acquire)
    }
}
