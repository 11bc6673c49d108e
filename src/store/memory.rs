//! In-memory [`JobStore`] with the same optimistic revision semantics as the database store.
//!
//! Finding candidates and locking them are separate calls, so concurrent acquirers
//! sharing one store really do race for the same rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{JobFailure, JobQuery, JobStore};
use crate::error::{ExecutorError, Result};
use crate::models::{Job, JobId, JobType};

#[derive(Debug, Clone, Default)]
pub struct InMemoryJobStore {
    jobs: Arc<RwLock<HashMap<JobId, Job>>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    pub async fn all_jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| a.create_time.cmp(&b.create_time).then(a.id.cmp(&b.id)));
        jobs
    }

    fn revision_conflict(id: JobId, expected_revision: i32, found: &Job) -> ExecutorError {
        ExecutorError::optimistic_locking(
            id,
            format!(
                "expected revision {expected_revision}, found {}",
                found.revision
            ),
        )
    }

    /// Apply `change` if the stored revision matches, bumping the revision
    async fn update_with_revision<F>(&self, id: JobId, expected_revision: i32, change: F) -> Result<()>
    where
        F: FnOnce(&mut Job) + Send,
    {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(ExecutorError::JobNotFound(id))?;
        if job.revision != expected_revision {
            return Err(Self::revision_conflict(id, expected_revision, job));
        }
        change(job);
        job.revision += 1;
        Ok(())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: Job) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(ExecutorError::Store(format!("Job {} already exists", job.id)));
        }
        jobs.insert(job.id, job);
        Ok(())
    }

    async fn find_by_id(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn find_acquirable(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Job>> {
        let jobs = self.jobs.read().await;
        let busy_instances: HashSet<&str> = jobs
            .values()
            .filter(|job| job.exclusive && job.is_locked_at(now))
            .filter_map(|job| job.process_instance_id.as_deref())
            .collect();
        let mut candidates: Vec<Job> = jobs
            .values()
            .filter(|job| job.is_acquirable_at(now))
            .filter(|job| {
                !job.exclusive
                    || job
                        .process_instance_id
                        .as_deref()
                        .map_or(true, |instance| !busy_instances.contains(instance))
            })
            .cloned()
            .collect();
        // priority desc, then due date asc with undated jobs first
        candidates.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.due_date.cmp(&b.due_date))
                .then(a.create_time.cmp(&b.create_time))
        });
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn try_lock(
        &self,
        id: JobId,
        expected_revision: i32,
        lock_owner: &str,
        lock_expiration_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get(&id) else {
            return Ok(false);
        };
        if job.revision != expected_revision || !job.is_acquirable_at(now) {
            return Ok(false);
        }
        if let Some(instance) = job.process_instance_id.as_deref().filter(|_| job.exclusive) {
            let same_request = |other: &Job| {
                other.is_locked_by(lock_owner)
                    && other.lock_expiration_time == Some(lock_expiration_time)
            };
            let instance_busy = jobs.values().any(|other| {
                other.id != id && other.holds_exclusive_lock_in(instance, now) && !same_request(other)
            });
            if instance_busy {
                return Ok(false);
            }
        }

        if let Some(job) = jobs.get_mut(&id) {
            job.lock(lock_owner, lock_expiration_time);
            job.revision += 1;
        }
        Ok(true)
    }

    async fn release(&self, id: JobId) -> Result<()> {
        if let Some(job) = self.jobs.write().await.get_mut(&id) {
            job.unlock();
            job.revision += 1;
        }
        Ok(())
    }

    async fn record_failure(&self, failure: &JobFailure) -> Result<()> {
        self.update_with_revision(failure.job_id, failure.expected_revision, |job| {
            job.set_retries(failure.retries);
            job.set_exception(
                failure.exception_message.clone(),
                failure.exception_details.clone(),
            );
            job.due_date = failure.due_date;
            job.unlock();
        })
        .await
    }

    async fn lock_job(
        &self,
        id: JobId,
        expected_revision: i32,
        lock_owner: &str,
        lock_expiration_time: DateTime<Utc>,
    ) -> Result<()> {
        self.update_with_revision(id, expected_revision, |job| {
            job.lock(lock_owner, lock_expiration_time)
        })
        .await
    }

    async fn complete(
        &self,
        id: JobId,
        expected_revision: i32,
        lock_owner: &str,
        created: Vec<Job>,
    ) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get(&id).ok_or(ExecutorError::JobNotFound(id))?;
        if job.revision != expected_revision {
            return Err(Self::revision_conflict(id, expected_revision, job));
        }
        if !job.is_locked_by(lock_owner) {
            return Err(ExecutorError::optimistic_locking(
                id,
                format!("lock is no longer held by {lock_owner}"),
            ));
        }
        if let Some(duplicate) = created.iter().find(|new| jobs.contains_key(&new.id)) {
            return Err(ExecutorError::Store(format!(
                "Job {} already exists",
                duplicate.id
            )));
        }

        jobs.remove(&id);
        for new in created {
            jobs.insert(new.id, new);
        }
        Ok(())
    }

    async fn delete(&self, id: JobId) -> Result<bool> {
        Ok(self.jobs.write().await.remove(&id).is_some())
    }

    async fn find_due_unlocked_timers(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Job>> {
        let jobs = self.jobs.read().await;
        let mut timers: Vec<Job> = jobs
            .values()
            .filter(|job| {
                job.job_type == JobType::Timer
                    && job.lock_owner.is_none()
                    && !job.suspended
                    && job.retries > 0
                    && job.due_date.is_some_and(|due| due <= before)
            })
            .cloned()
            .collect();
        timers.sort_by(|a, b| a.due_date.cmp(&b.due_date));
        timers.truncate(limit);
        Ok(timers)
    }

    async fn update_due_date(
        &self,
        id: JobId,
        expected_revision: i32,
        due_date: Option<DateTime<Utc>>,
        repeat_offset_ms: i64,
    ) -> Result<()> {
        self.update_with_revision(id, expected_revision, |job| {
            job.due_date = due_date;
            job.repeat_offset_ms = repeat_offset_ms;
        })
        .await
    }

    async fn update_retries(&self, id: JobId, expected_revision: i32, retries: i32) -> Result<()> {
        self.update_with_revision(id, expected_revision, |job| job.set_retries(retries))
            .await
    }

    async fn update_priority(&self, id: JobId, expected_revision: i32, priority: i64) -> Result<()> {
        self.update_with_revision(id, expected_revision, |job| job.priority = priority)
            .await
    }

    async fn update_suspension(
        &self,
        id: JobId,
        expected_revision: i32,
        suspended: bool,
    ) -> Result<()> {
        self.update_with_revision(id, expected_revision, |job| job.suspended = suspended)
            .await
    }

    async fn find_jobs(&self, query: &JobQuery) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .all_jobs()
            .await
            .into_iter()
            .filter(|job| query.matches(job))
            .collect();
        if let Some(limit) = query.limit {
            jobs.truncate(limit);
        }
        Ok(jobs)
    }
}
