use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tasker_job_executor::acquisition::strategy::{level_wait_ms, max_level};
use tasker_job_executor::acquisition::{
    AcquiredJobs, BackoffJobAcquisitionStrategy, JobAcquisitionContext, JobAcquisitionStrategy,
};
use tasker_job_executor::config::AcquisitionConfig;
use uuid::Uuid;

fn contended_config() -> AcquisitionConfig {
    AcquisitionConfig {
        backoff_time_ms: 200,
        max_backoff_ms: 5_000,
        backoff_decrease_threshold: 10,
        ..AcquisitionConfig::default()
    }
}

fn busy_context(engines: usize) -> JobAcquisitionContext {
    let mut context = JobAcquisitionContext::new();
    for engine in 0..engines {
        let mut acquired = AcquiredJobs::new(3);
        acquired.add_batch(vec![Uuid::new_v4()]);
        acquired.add_batch(vec![Uuid::new_v4(), Uuid::new_v4()]);
        context.submit_acquired_jobs(&format!("engine-{engine}"), acquired);
    }
    context
}

fn contended_context() -> JobAcquisitionContext {
    let mut context = JobAcquisitionContext::new();
    let mut acquired = AcquiredJobs::new(3);
    acquired.add_batch(vec![Uuid::new_v4()]);
    acquired.record_failed_to_lock();
    acquired.record_failed_to_lock();
    context.submit_acquired_jobs("default", acquired);
    context
}

fn benchmark_reconfigure_busy(c: &mut Criterion) {
    let context = busy_context(8);
    let mut strategy = BackoffJobAcquisitionStrategy::from_config(&contended_config());

    c.bench_function("reconfigure_busy_8_engines", |b| {
        b.iter(|| {
            strategy.reconfigure(black_box(&context));
            black_box(strategy.wait_time())
        })
    });
}

fn benchmark_reconfigure_contended(c: &mut Criterion) {
    let context = contended_context();
    let mut strategy = BackoffJobAcquisitionStrategy::from_config(&contended_config());

    c.bench_function("reconfigure_contended", |b| {
        b.iter(|| {
            strategy.reconfigure(black_box(&context));
            black_box(strategy.num_jobs_to_acquire("default"))
        })
    });
}

fn benchmark_level_table(c: &mut Criterion) {
    c.bench_function("level_wait_table", |b| {
        b.iter(|| {
            let levels = max_level(black_box(500), 60_000, 2.0);
            (0..=levels)
                .map(|level| level_wait_ms(level, levels, 500, 2.0, 60_000))
                .sum::<u64>()
        })
    });
}

criterion_group!(
    benches,
    benchmark_reconfigure_busy,
    benchmark_reconfigure_contended,
    benchmark_level_table
);
criterion_main!(benches);
