use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use request_gatekeeper::{ClientId, ExemptPaths, Gatekeeper, GatekeeperConfig, LimitPolicy};
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

fn build_gatekeeper(rt: &Runtime, threshold: u64) -> Arc<Gatekeeper> {
    let config = GatekeeperConfig::builder()
        .with_threshold(threshold)
        .with_window(Duration::from_secs(3600))
        .build()
        .unwrap();
    rt.block_on(async { Arc::new(Gatekeeper::builder(config).build().unwrap()) })
}

/// Benchmark the pure parts of a decision
fn bench_domain(c: &mut Criterion) {
    let mut group = c.benchmark_group("domain");

    let policy = LimitPolicy::new(100, Duration::from_secs(60)).unwrap();
    group.bench_function("evaluate", |b| b.iter(|| policy.evaluate(black_box(57))));

    let exemptions = ExemptPaths::new()
        .with_prefix("/dashboard")
        .with_prefix("/health")
        .with_exact("/reset-redis");
    group.bench_function("exempt_miss", |b| {
        b.iter(|| exemptions.is_exempt(black_box("/api/accounts/42/balance")))
    });
    group.bench_function("exempt_hit", |b| {
        b.iter(|| exemptions.is_exempt(black_box("/dashboard/stats")))
    });

    let client = ClientId::new("203.0.113.7");
    group.bench_function("rate_key", |b| b.iter(|| black_box(&client).rate_key()));

    group.finish();
}

/// Benchmark full checks against the in-memory store
fn bench_check(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("check");

    let gatekeeper = build_gatekeeper(&rt, u64::MAX);
    let client = ClientId::new("10.0.0.1");
    group.bench_function("admitted", |b| {
        b.iter(|| rt.block_on(gatekeeper.check(black_box(&client), "/api/balance")))
    });

    let banned = build_gatekeeper(&rt, 1);
    let offender = ClientId::new("10.0.0.2");
    rt.block_on(async {
        banned.check(&offender, "/api/balance").await;
        banned.check(&offender, "/api/balance").await;
    });
    group.bench_function("blocked", |b| {
        b.iter(|| rt.block_on(banned.check(black_box(&offender), "/api/balance")))
    });

    group.bench_function("exempt", |b| {
        b.iter(|| rt.block_on(gatekeeper.check(black_box(&client), "/dashboard/stats")))
    });

    group.finish();
}

/// Benchmark contention on one client versus spread across many
fn bench_concurrent(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("concurrent");

    for clients in [1usize, 64].iter() {
        let gatekeeper = build_gatekeeper(&rt, u64::MAX);
        let ids: Vec<ClientId> = (0..*clients)
            .map(|i| ClientId::new(format!("10.1.{}.{}", i / 256, i % 256)))
            .collect();
        let batch = 256;

        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::new("clients", clients), &ids, |b, ids| {
            b.iter(|| {
                rt.block_on(async {
                    let tasks = (0..batch).map(|i| {
                        let gatekeeper = gatekeeper.clone();
                        let client = ids[i % ids.len()].clone();
                        tokio::spawn(async move { gatekeeper.check(&client, "/api/transfer").await })
                    });
                    join_all(tasks).await
                })
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_domain, bench_check, bench_concurrent);
criterion_main!(benches);
