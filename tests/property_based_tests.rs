//! Properties of acquisition pacing and lock results that must hold for any input.

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;
use std::time::Duration as StdDuration;

use tasker_job_executor::acquisition::strategy::{level_wait_ms, max_level};
use tasker_job_executor::acquisition::{
    AcquiredJobs, BackoffJobAcquisitionStrategy, JobAcquisitionContext, JobAcquisitionStrategy,
};
use tasker_job_executor::config::AcquisitionConfig;
use tasker_job_executor::models::Job;
use tasker_job_executor::store::{InMemoryJobStore, JobStore};

fn pacing_config() -> impl Strategy<Value = AcquisitionConfig> {
    (1u64..2_000, 1u64..50, 1.1f64..4.0, 1u64..1_000, 1u64..50, 1.1f64..4.0).prop_map(
        |(wait, wait_span, wait_factor, backoff, backoff_span, backoff_factor)| AcquisitionConfig {
            wait_time_ms: wait,
            max_wait_ms: wait * wait_span,
            wait_increase_factor: wait_factor,
            backoff_time_ms: backoff,
            max_backoff_ms: backoff * backoff_span,
            backoff_increase_factor: backoff_factor,
            backoff_decrease_threshold: 3,
            ..AcquisitionConfig::default()
        },
    )
}

#[derive(Debug, Clone, Copy)]
enum Cycle {
    Idle,
    Busy,
    Contended,
}

fn cycle() -> impl Strategy<Value = Cycle> {
    prop_oneof![Just(Cycle::Idle), Just(Cycle::Busy), Just(Cycle::Contended)]
}

fn context_for(cycle: Cycle) -> JobAcquisitionContext {
    let mut context = JobAcquisitionContext::new();
    let mut acquired = AcquiredJobs::new(3);
    match cycle {
        Cycle::Idle => {}
        Cycle::Busy => {
            for _ in 0..3 {
                acquired.add_batch(vec![uuid::Uuid::new_v4()]);
            }
        }
        Cycle::Contended => {
            acquired.add_batch(vec![uuid::Uuid::new_v4()]);
            acquired.record_failed_to_lock();
            acquired.record_failed_to_lock();
        }
    }
    context.submit_acquired_jobs("default", acquired);
    context
}

proptest! {
    /// The wait never exceeds the larger configured cap plus jitter on the backoff
    #[test]
    fn wait_time_stays_within_configured_bounds(
        config in pacing_config(),
        cycles in prop::collection::vec(cycle(), 1..40),
    ) {
        let mut strategy = BackoffJobAcquisitionStrategy::from_config(&config);
        let backoff_cap = config.max_backoff_ms as f64 * 1.5;
        let upper = (config.max_wait_ms as f64).max(backoff_cap).max(100.0).ceil() as u64;

        for cycle in cycles {
            strategy.reconfigure(&context_for(cycle));
            let wait = strategy.wait_time();
            prop_assert!(wait <= StdDuration::from_millis(upper), "{wait:?} > {upper}ms");
            prop_assert!(strategy.idle_level() <= strategy.max_idle_level());
            prop_assert!(strategy.backoff_level() <= strategy.max_backoff_level());
        }
    }

    /// Level waits are monotonic and capped
    #[test]
    fn level_waits_grow_monotonically(
        base in 1u64..5_000,
        span in 1u64..100,
        factor in 1.1f64..5.0,
    ) {
        let max = base * span;
        let levels = max_level(base, max, factor);
        let mut previous = 0;
        for level in 0..=levels + 2 {
            let wait = level_wait_ms(level.min(levels), levels, base, factor, max);
            prop_assert!(wait >= previous);
            prop_assert!(wait <= max);
            previous = wait;
        }
        prop_assert_eq!(level_wait_ms(levels, levels, base, factor, max), max);
    }

    /// Acquired plus failed never exceeds what was asked for
    #[test]
    fn acquired_jobs_never_exceed_the_request(
        available in 0usize..30,
        max_jobs in 0usize..15,
        instances in 1usize..4,
    ) {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();

        let acquired = tokio_test::block_on(async {
            let store = InMemoryJobStore::new();
            for n in 0..available {
                let job = Job::message("async-continuation", 3, now)
                    .with_process_instance(format!("pi-{}", n % instances));
                store.insert(job).await.unwrap();
            }
            store
                .lock("default", max_jobs, "node-a", Duration::minutes(5), now)
                .await
                .unwrap()
        });

        prop_assert_eq!(acquired.attempted_count(), max_jobs);
        prop_assert!(acquired.size() + acquired.failed_to_lock_count() <= acquired.attempted_count());
        prop_assert_eq!(acquired.size(), available.min(max_jobs));
        prop_assert_eq!(acquired.is_idle(), available < max_jobs);
        prop_assert!(acquired.batch_count() <= instances);
    }
}
