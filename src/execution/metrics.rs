//! Executor counters. Updated lock-free from the acquisition task and the workers.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct JobExecutorMetrics {
    acquisition_cycles: AtomicU64,
    acquisition_attempts: AtomicU64,
    acquisition_failures: AtomicU64,
    jobs_acquired: AtomicU64,
    jobs_failed_to_lock: AtomicU64,
    rejected_batches: AtomicU64,
    jobs_succeeded: AtomicU64,
    jobs_failed: AtomicU64,
    exclusive_jobs_locked_in_worker: AtomicU64,
}

/// Point-in-time copy of [`JobExecutorMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub acquisition_cycles: u64,
    pub acquisition_attempts: u64,
    pub acquisition_failures: u64,
    pub jobs_acquired: u64,
    pub jobs_failed_to_lock: u64,
    pub rejected_batches: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub exclusive_jobs_locked_in_worker: u64,
}

impl JobExecutorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cycle(&self) {
        self.acquisition_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_acquisition(&self, acquired: usize, failed_to_lock: usize) {
        self.acquisition_attempts.fetch_add(1, Ordering::Relaxed);
        self.jobs_acquired
            .fetch_add(acquired as u64, Ordering::Relaxed);
        self.jobs_failed_to_lock
            .fetch_add(failed_to_lock as u64, Ordering::Relaxed);
    }

    pub fn record_acquisition_failure(&self) {
        self.acquisition_attempts.fetch_add(1, Ordering::Relaxed);
        self.acquisition_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected_batch(&self) {
        self.rejected_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.jobs_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_exclusive_job_locked(&self) {
        self.exclusive_jobs_locked_in_worker
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            acquisition_cycles: self.acquisition_cycles.load(Ordering::Relaxed),
            acquisition_attempts: self.acquisition_attempts.load(Ordering::Relaxed),
            acquisition_failures: self.acquisition_failures.load(Ordering::Relaxed),
            jobs_acquired: self.jobs_acquired.load(Ordering::Relaxed),
            jobs_failed_to_lock: self.jobs_failed_to_lock.load(Ordering::Relaxed),
            rejected_batches: self.rejected_batches.load(Ordering::Relaxed),
            jobs_succeeded: self.jobs_succeeded.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            exclusive_jobs_locked_in_worker: self
                .exclusive_jobs_locked_in_worker
                .load(Ordering::Relaxed),
        }
    }
}
