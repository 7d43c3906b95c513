use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use criterion::BenchmarkId;
use criterion::Criterion;
use criterion::black_box;
use criterion::criterion_group;
use criterion::criterion_main;
use futures::future::join_all;

use window_quota::MemoryStore;
use window_quota::QuotaPolicy;
use window_quota::Tracker;

fn policy() -> QuotaPolicy {
    QuotaPolicy::new(
        NonZeroU32::new(u32::MAX).unwrap(),
        Duration::from_secs(3600),
    )
    .unbounded()
}

fn bench_single_tracker(c: &mut Criterion, rt: &tokio::runtime::Runtime) {
    let mut group = c.benchmark_group("MemoryStore");

    let store = Arc::new(MemoryStore::new());
    let tracker = Tracker::new("bench", policy(), store).unwrap();

    group.bench_function("decrement", |b| {
        b.to_async(rt).iter(|| async {
            let _ = black_box(tracker.query().await);
        })
    });

    // Exhausted windows skip the write entirely.
    let store = Arc::new(MemoryStore::new());
    let spent = Tracker::new(
        "spent",
        QuotaPolicy::new(NonZeroU32::MIN, Duration::from_secs(3600)),
        store,
    )
    .unwrap();

    group.bench_function("exhausted", |b| {
        b.to_async(rt).iter(|| async {
            let _ = black_box(spent.query().await);
        })
    });

    group.finish();
}

fn bench_contended(c: &mut Criterion, rt: &tokio::runtime::Runtime) {
    let mut group = c.benchmark_group("MemoryStore-contended");

    for tasks in [2, 4, 8].iter() {
        let n = *tasks;
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}-tasks", n)),
            &n,
            |b, &n| {
                b.to_async(rt).iter_custom(|iters| async move {
                    let store = Arc::new(MemoryStore::new());
                    let per_task = iters / n as u64;

                    let start = Instant::now();
                    let handles = (0..n).map(|_| {
                        let tracker = Tracker::new("shared", policy(), Arc::clone(&store)).unwrap();
                        tokio::spawn(async move {
                            for _ in 0..per_task {
                                let _ = black_box(tracker.query().await);
                            }
                        })
                    });
                    join_all(handles).await;
                    start.elapsed()
                })
            },
        );
    }

    group.finish();
}

fn run_all_benches(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();

    bench_single_tracker(c, &rt);
    bench_contended(c, &rt);
}

criterion_group!(benches, run_all_benches);
criterion_main!(benches);
