//! # Due Job Locking
//!
//! Turns one acquisition request into an [`AcquiredJobs`] result. Candidates come from
//! [`JobStore::find_acquirable`]; each is then locked with a revision-guarded
//! [`JobStore::try_lock`]. A candidate that another node locked first is counted as a
//! lock failure, which is what drives the contention backoff.
//!
//! ## Batching
//!
//! - Non-exclusive jobs, and jobs outside any process instance, get a batch of their own.
//! - Exclusive jobs of the same process instance share one batch so a single worker
//!   runs them one after another.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::{debug, instrument, warn};

use super::AcquiredJobs;
use crate::constants::events;
use crate::error::Result;
use crate::models::{Job, JobId};
use crate::store::JobStore;

#[instrument(skip(store), fields(engine = %engine))]
pub async fn lock_due_jobs<S: JobStore + ?Sized>(
    store: &S,
    engine: &str,
    max_jobs: usize,
    lock_owner: &str,
    lock_duration: Duration,
    now: DateTime<Utc>,
) -> Result<AcquiredJobs> {
    let mut acquired = AcquiredJobs::new(max_jobs);
    if max_jobs == 0 {
        return Ok(acquired);
    }

    let candidates = store.find_acquirable(now, max_jobs).await?;
    let lock_expiration_time = now + lock_duration;
    let mut locked = Vec::with_capacity(candidates.len());

    for job in candidates {
        let won = match store
            .try_lock(job.id, job.revision, lock_owner, lock_expiration_time, now)
            .await
        {
            Ok(won) => won,
            Err(error) => {
                release_locked(store, &locked).await;
                return Err(error);
            }
        };
        if won {
            locked.push(job);
        } else {
            debug!(
                event = events::JOB_LOCK_FAILED,
                job_id = %job.id,
                lock_owner = lock_owner,
                "Job was locked by another acquirer"
            );
            acquired.record_failed_to_lock();
        }
    }

    for batch in group_into_batches(&locked) {
        acquired.add_batch(batch);
    }

    debug!(
        event = events::JOB_ACQUIRED,
        acquired = acquired.size(),
        batches = acquired.batch_count(),
        failed_to_lock = acquired.failed_to_lock_count(),
        "Acquisition request complete"
    );

    Ok(acquired)
}

/// Hand back the locks of an acquisition that failed halfway
async fn release_locked<S: JobStore + ?Sized>(store: &S, locked: &[Job]) {
    for job in locked {
        if let Err(error) = store.release(job.id).await {
            warn!(
                job_id = %job.id,
                error = %error,
                "Failed to release job after an aborted acquisition; it stays locked until the lock expires"
            );
        }
    }
}

/// Non-exclusive jobs first, one per batch, then one batch per process instance
/// in the order instances were first seen
pub fn group_into_batches(jobs: &[Job]) -> Vec<Vec<JobId>> {
    let mut batches = Vec::new();
    let mut exclusive_batches: Vec<Vec<JobId>> = Vec::new();
    let mut instance_index: HashMap<&str, usize> = HashMap::new();

    for job in jobs {
        match job.process_instance_id.as_deref() {
            Some(instance) if job.exclusive => {
                let index = *instance_index.entry(instance).or_insert_with(|| {
                    exclusive_batches.push(Vec::new());
                    exclusive_batches.len() - 1
                });
                exclusive_batches[index].push(job.id);
            }
            _ => batches.push(vec![job.id]),
        }
    }

    batches.extend(exclusive_batches);
    batches
}
