//! Per-cycle record of what acquisition and dispatch did, consumed by the strategy.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::AcquiredJobs;
use crate::error::ExecutorError;
use crate::models::JobId;

#[derive(Debug, Default)]
pub struct JobAcquisitionContext {
    acquired_jobs_by_engine: HashMap<String, AcquiredJobs>,
    rejected_batches_by_engine: HashMap<String, Vec<Vec<JobId>>>,
    additional_batches_by_engine: HashMap<String, Vec<Vec<JobId>>>,
    acquisition_exception: Option<ExecutorError>,
    acquisition_time: Option<DateTime<Utc>>,
    job_added: bool,
}

impl JobAcquisitionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new cycle. Batches rejected last cycle become this cycle's additional batches.
    pub fn reset(&mut self) {
        self.additional_batches_by_engine = std::mem::take(&mut self.rejected_batches_by_engine);
        self.acquired_jobs_by_engine.clear();
        self.acquisition_exception = None;
        self.acquisition_time = None;
        self.job_added = false;
    }

    pub fn submit_acquired_jobs(&mut self, engine: &str, acquired: AcquiredJobs) {
        self.acquired_jobs_by_engine
            .insert(engine.to_string(), acquired);
    }

    pub fn submit_rejected_batch(&mut self, engine: &str, batch: Vec<JobId>) {
        self.rejected_batches_by_engine
            .entry(engine.to_string())
            .or_default()
            .push(batch);
    }

    pub fn submit_additional_batch(&mut self, engine: &str, batch: Vec<JobId>) {
        self.additional_batches_by_engine
            .entry(engine.to_string())
            .or_default()
            .push(batch);
    }

    pub fn acquired_jobs(&self) -> &HashMap<String, AcquiredJobs> {
        &self.acquired_jobs_by_engine
    }

    pub fn acquired_jobs_for(&self, engine: &str) -> Option<&AcquiredJobs> {
        self.acquired_jobs_by_engine.get(engine)
    }

    pub fn rejected_batches(&self) -> &HashMap<String, Vec<Vec<JobId>>> {
        &self.rejected_batches_by_engine
    }

    pub fn rejected_batches_for(&self, engine: &str) -> &[Vec<JobId>] {
        self.rejected_batches_by_engine
            .get(engine)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn additional_batches(&self) -> &HashMap<String, Vec<Vec<JobId>>> {
        &self.additional_batches_by_engine
    }

    pub fn additional_batches_for(&self, engine: &str) -> &[Vec<JobId>] {
        self.additional_batches_by_engine
            .get(engine)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Every engine that reported found fewer jobs than it asked for
    pub fn are_all_engines_idle(&self) -> bool {
        self.acquired_jobs_by_engine
            .values()
            .all(AcquiredJobs::is_idle)
    }

    pub fn has_job_acquisition_lock_failure_occurred(&self) -> bool {
        self.acquired_jobs_by_engine
            .values()
            .any(|acquired| acquired.failed_to_lock_count() > 0)
    }

    pub fn set_acquisition_exception(&mut self, error: ExecutorError) {
        self.acquisition_exception = Some(error);
    }

    pub fn acquisition_exception(&self) -> Option<&ExecutorError> {
        self.acquisition_exception.as_ref()
    }

    pub fn set_acquisition_time(&mut self, time: DateTime<Utc>) {
        self.acquisition_time = Some(time);
    }

    pub fn acquisition_time(&self) -> Option<DateTime<Utc>> {
        self.acquisition_time
    }

    pub fn set_job_added(&mut self, job_added: bool) {
        self.job_added = job_added;
    }

    pub fn is_job_added(&self) -> bool {
        self.job_added
    }

    pub fn total_acquired(&self) -> usize {
        self.acquired_jobs_by_engine.values().map(AcquiredJobs::size).sum()
    }

    pub fn total_failed_to_lock(&self) -> usize {
        self.acquired_jobs_by_engine
            .values()
            .map(AcquiredJobs::failed_to_lock_count)
            .sum()
    }

    pub fn total_rejected_batches(&self) -> usize {
        self.rejected_batches_by_engine.values().map(Vec::len).sum()
    }
}
