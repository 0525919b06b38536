//! Benchmarks for the job queue
//!
//! Run with: cargo bench

use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use portal_core::jobs::{
    recommendations, DedupIndex, JobContext, JobError, JobHandler, JobId, JobQueue, QueueConfig,
    QueueLimits, QueueStats, ReleasePolicy,
};
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::time::Instant;

struct Echo;

#[async_trait]
impl JobHandler<u64, u64> for Echo {
    async fn handle(&self, _ctx: &JobContext, payload: &u64) -> Result<u64, JobError> {
        Ok(*payload)
    }
}

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

/// Submit a batch with distinct keys and wait until every job completes.
fn bench_submit_and_drain(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("submit_and_drain");

    for jobs in [100u64, 1_000, 5_000].iter() {
        group.throughput(Throughput::Elements(*jobs));
        group.bench_with_input(BenchmarkId::from_parameter(jobs), jobs, |b, &count| {
            b.to_async(&rt).iter(|| async move {
                let config = QueueConfig::default()
                    .with_max_concurrency(16)
                    .with_max_pending(count as usize)
                    .with_sweep_interval(None);
                let queue = JobQueue::new(config, Echo).unwrap();
                for n in 0..count {
                    queue.submit(n, format!("user_{}", n)).unwrap();
                }
                queue.wait_idle().await;
                black_box(queue.snapshot())
            });
        });
    }
    group.finish();
}

/// Duplicate rejection on a hot key.
fn bench_duplicate_rejection(c: &mut Criterion) {
    let rt = runtime();
    let queue = rt.block_on(async {
        let config = QueueConfig::default()
            .with_dedup(Duration::from_secs(3600), ReleasePolicy::Cooldown)
            .with_sweep_interval(None);
        let queue = JobQueue::new(config, Echo).unwrap();
        queue.submit(0, "user_hot").unwrap();
        queue
    });

    c.bench_function("duplicate_rejection", |b| {
        b.iter(|| black_box(queue.submit(1, "user_hot").is_err()))
    });
}

fn bench_dedup_index(c: &mut Criterion) {
    let mut group = c.benchmark_group("dedup_index");

    for keys in [100usize, 10_000].iter() {
        group.bench_with_input(BenchmarkId::new("reserve", keys), keys, |b, &count| {
            let names: Vec<String> = (0..count).map(|n| format!("user_{}", n)).collect();
            b.iter(|| {
                let now = Instant::now();
                let mut index = DedupIndex::new(Duration::from_secs(5), ReleasePolicy::Cooldown);
                for name in &names {
                    let _ = index.check_and_reserve(name, JobId::new(), now, |_| false);
                }
                black_box(index.len())
            });
        });
    }
    group.finish();
}

fn bench_recommendations(c: &mut Criterion) {
    let stats = QueueStats {
        pending: 950,
        processing: 5,
        completed: 400,
        failed: 200,
        cancelled: 3,
        total_processed: 600,
    };
    let limits = QueueLimits {
        max_concurrency: 5,
        max_pending: 1000,
        max_attempts: 3,
    };

    c.bench_function("recommendations", |b| {
        b.iter(|| black_box(recommendations(black_box(&stats), black_box(&limits))))
    });
}

criterion_group!(
    benches,
    bench_submit_and_drain,
    bench_duplicate_rejection,
    bench_dedup_index,
    bench_recommendations
);
criterion_main!(benches);
