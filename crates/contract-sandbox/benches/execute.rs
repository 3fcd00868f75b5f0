//! Benchmarks for `Executor::execute`.
//!
//! Compares invocations served from the module cache against invocations that compile the
//! contract every time, and measures how the discovery loop scales with the number of keys.
#![allow(missing_docs)]

use std::time::Duration;

use contract_sandbox::{test_utils::*, *};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkGroup, Criterion};

fn executor(cache_enabled: bool) -> Executor {
    Executor::new(SandboxConfig::default().with_cache_enabled(cache_enabled))
        .expect("support module compiles")
}

/// Helper to benchmark a contract with and without the module cache.
fn bench_cached_and_uncached(
    group: &mut BenchmarkGroup<'_, criterion::measurement::WallTime>,
    params: &ExecutionParameters,
) {
    let snapshot = StateSnapshot::new();
    for (name, cache_enabled) in [("cached", true), ("uncached", false)] {
        let executor = executor(cache_enabled);
        group.bench_function(name, |b| {
            b.iter(|| {
                let outcome = executor
                    .execute(black_box(params), black_box(&snapshot))
                    .expect("execution should succeed");
                black_box(outcome)
            })
        });
    }
}

/// Benchmark a contract that echoes its payload.
fn bench_echo(c: &mut Criterion) {
    let mut group = c.benchmark_group("echo");
    let params = ExecutionParameters::new(contracts::bytecode(contracts::ECHO))
        .with_time_limit(Duration::from_secs(5))
        .with_payload(vec![0xabu8; 256]);
    bench_cached_and_uncached(&mut group, &params);
    group.finish();
}

/// Benchmark a compute-bound contract.
fn bench_burn(c: &mut Criterion) {
    let mut group = c.benchmark_group("burn_100k");
    let params = ExecutionParameters::new(contracts::bytecode(contracts::BURN))
        .with_time_limit(Duration::from_secs(5))
        .with_payload(100_000u32.to_le_bytes().to_vec());
    bench_cached_and_uncached(&mut group, &params);
    group.finish();
}

/// Benchmark the discovery loop of a contract reading four keys.
fn bench_state_discovery(c: &mut Criterion) {
    let executor = executor(true);
    let provider = MemoryStateProvider::default()
        .with_value(KeyPostfix::slot(1, 1), vec![1u8])
        .with_value(KeyPostfix::slot(2, 1), vec![2u8])
        .with_value(KeyPostfix::slot(3, 1), vec![3u8]);
    let driver = StateDiscoveryDriver::new(executor.clone(), provider);
    let params = executor
        .parameters(contracts::bytecode(contracts::KEYS_READER))
        .with_time_limit(Duration::from_secs(5));

    c.bench_function("state_discovery", |b| {
        b.iter(|| {
            let discovered = driver
                .run_with_state_discovery(black_box(&params), StateSnapshot::new())
                .expect("discovery should succeed");
            black_box(discovered)
        })
    });
}

criterion_group!(benches, bench_echo, bench_burn, bench_state_discovery);
criterion_main!(benches);
