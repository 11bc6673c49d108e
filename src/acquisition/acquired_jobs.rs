use serde::Serialize;

use crate::models::JobId;

/// Result of one lock request against one engine.
///
/// Jobs are grouped into batches; each batch is handed to a worker as one unit.
/// `size() + failed_to_lock_count() <= attempted_count()` always holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AcquiredJobs {
    attempted_count: usize,
    batches: Vec<Vec<JobId>>,
    failed_to_lock_count: usize,
}

impl AcquiredJobs {
    pub fn new(attempted_count: usize) -> Self {
        Self {
            attempted_count,
            batches: Vec::new(),
            failed_to_lock_count: 0,
        }
    }

    /// Empty batches are ignored
    pub fn add_batch(&mut self, batch: Vec<JobId>) {
        if !batch.is_empty() {
            self.batches.push(batch);
        }
    }

    pub fn contains(&self, job_id: &JobId) -> bool {
        self.batches.iter().any(|batch| batch.contains(job_id))
    }

    /// Drop a job that lost its lock after all and count it as a lock failure.
    /// Batches left empty are removed.
    pub fn remove_job_id(&mut self, job_id: &JobId) -> bool {
        let mut removed = false;
        for batch in &mut self.batches {
            if let Some(position) = batch.iter().position(|id| id == job_id) {
                batch.remove(position);
                removed = true;
                break;
            }
        }
        if removed {
            self.batches.retain(|batch| !batch.is_empty());
            self.failed_to_lock_count += 1;
        }
        removed
    }

    pub fn record_failed_to_lock(&mut self) {
        self.failed_to_lock_count += 1;
    }

    pub fn batches(&self) -> &[Vec<JobId>] {
        &self.batches
    }

    pub fn into_batches(self) -> Vec<Vec<JobId>> {
        self.batches
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    /// Number of acquired jobs across all batches
    pub fn size(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }

    pub fn attempted_count(&self) -> usize {
        self.attempted_count
    }

    pub fn failed_to_lock_count(&self) -> usize {
        self.failed_to_lock_count
    }

    /// Fewer jobs were found than requested: the engine has run out of work
    pub fn is_idle(&self) -> bool {
        self.size() + self.failed_to_lock_count < self.attempted_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_remove_job_id_drops_empty_batches() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut acquired = AcquiredJobs::new(3);
        acquired.add_batch(vec![a]);
        acquired.add_batch(vec![b, c]);
        acquired.add_batch(vec![]);
        assert_eq!(acquired.batch_count(), 2);
        assert_eq!(acquired.size(), 3);
        assert!(!acquired.is_idle());

        assert!(acquired.remove_job_id(&a));
        assert_eq!(acquired.batch_count(), 1);
        assert_eq!(acquired.failed_to_lock_count(), 1);
        assert!(!acquired.contains(&a));

        assert!(acquired.remove_job_id(&b));
        assert_eq!(acquired.batches(), &[vec![c]]);
        assert!(!acquired.remove_job_id(&b));
        assert_eq!(acquired.failed_to_lock_count(), 2);
        assert!(!acquired.is_idle());
    }

    #[test]
    fn test_idle_when_fewer_jobs_than_attempted() {
        let mut acquired = AcquiredJobs::new(3);
        acquired.add_batch(vec![Uuid::new_v4()]);
        assert!(acquired.is_idle());

        let empty = AcquiredJobs::new(0);
        assert!(!empty.is_idle());
    }
}
