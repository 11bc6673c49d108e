//! Acquisition against a shared store: competing nodes, lock expiry and the
//! jobs that must never be handed out.

mod common;

use chrono::Duration;
use std::collections::HashSet;
use std::sync::Arc;

use common::fixed_now;
use tasker_job_executor::models::{Job, JobId};
use tasker_job_executor::store::{InMemoryJobStore, JobStore};

fn acquired_ids(acquired: &tasker_job_executor::AcquiredJobs) -> HashSet<JobId> {
    acquired.batches().iter().flatten().copied().collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_acquirers_lock_disjoint_sets() {
    let now = fixed_now();
    let store = Arc::new(InMemoryJobStore::new());
    for _ in 0..20 {
        store
            .insert(Job::message("async-continuation", 3, now).with_exclusive(false))
            .await
            .unwrap();
    }

    let node_a = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            store
                .lock("default", 20, "node-a", Duration::minutes(5), now)
                .await
                .unwrap()
        })
    };
    let node_b = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            store
                .lock("default", 20, "node-b", Duration::minutes(5), now)
                .await
                .unwrap()
        })
    };
    let (a, b) = (node_a.await.unwrap(), node_b.await.unwrap());

    let (ids_a, ids_b) = (acquired_ids(&a), acquired_ids(&b));
    assert!(ids_a.is_disjoint(&ids_b));
    assert_eq!(ids_a.len() + ids_b.len(), 20);

    for job in store.all_jobs().await {
        let owner = job.lock_owner.as_deref();
        if ids_a.contains(&job.id) {
            assert_eq!(owner, Some("node-a"));
        } else {
            assert!(ids_b.contains(&job.id));
            assert_eq!(owner, Some("node-b"));
        }
    }

    for acquired in [&a, &b] {
        assert!(acquired.size() + acquired.failed_to_lock_count() <= acquired.attempted_count());
    }
}

#[tokio::test]
async fn test_expired_lock_can_be_taken_over() {
    let now = fixed_now();
    let store = InMemoryJobStore::new();
    let job = Job::message("async-continuation", 3, now);
    let id = job.id;
    store.insert(job).await.unwrap();

    let first = store
        .lock("default", 5, "node-a", Duration::minutes(1), now)
        .await
        .unwrap();
    assert!(first.contains(&id));

    let while_locked = store
        .lock("default", 5, "node-b", Duration::minutes(1), now + Duration::seconds(30))
        .await
        .unwrap();
    assert_eq!(while_locked.size(), 0);
    assert!(while_locked.is_idle());

    let after_expiry = store
        .lock("default", 5, "node-b", Duration::minutes(1), now + Duration::minutes(2))
        .await
        .unwrap();
    assert!(after_expiry.contains(&id));
    let job = store.find_by_id(id).await.unwrap().unwrap();
    assert!(job.is_locked_by("node-b"));
}

#[tokio::test]
async fn test_unavailable_jobs_are_never_acquired() {
    let now = fixed_now();
    let store = InMemoryJobStore::new();

    let due = Job::message("async-continuation", 3, now);
    let future = Job::message("async-continuation", 3, now).with_due_date(now + Duration::hours(1));
    let suspended = Job::message("async-continuation", 3, now).with_suspended(true);
    let dead = Job::message("async-continuation", 0, now);
    let due_id = due.id;
    for job in [due, future, suspended, dead] {
        store.insert(job).await.unwrap();
    }

    let acquired = store
        .lock("default", 10, "node-a", Duration::minutes(5), now)
        .await
        .unwrap();

    assert_eq!(acquired_ids(&acquired), HashSet::from([due_id]));
    assert_eq!(acquired.attempted_count(), 10);
    assert!(acquired.is_idle());
}

#[tokio::test]
async fn test_priority_then_due_date_ordering_under_a_small_limit() {
    let now = fixed_now();
    let store = InMemoryJobStore::new();

    let low = Job::message("async-continuation", 3, now)
        .with_exclusive(false)
        .with_due_date(now - Duration::minutes(10));
    let high = Job::message("async-continuation", 3, now)
        .with_exclusive(false)
        .with_priority(10)
        .with_due_date(now - Duration::minutes(1));
    let high_id = high.id;
    store.insert(low).await.unwrap();
    store.insert(high).await.unwrap();

    let acquired = store
        .lock("default", 1, "node-a", Duration::minutes(5), now)
        .await
        .unwrap();

    assert_eq!(acquired.batches(), &[vec![high_id]]);
    assert!(!acquired.is_idle());
}
