//! Skalman dispatch benchmarks.
//!
//! Covers the per-call overhead of each aspect:
//! - Plain pass-through dispatch
//! - Cache hits and misses
//! - Transaction begin/commit and nested propagation
//! - Retry of transient failures

#![allow(missing_docs)]

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use skalman::{
    AccessMode, CacheConfig, Dispatcher, DispatcherConfig, Error, PolicyDescriptor, PolicyRegistry,
    Propagation, Value,
};
use skalman_resource::backends::MemoryResourceManager;

fn dispatcher(cache: CacheConfig) -> Dispatcher {
    let registry = PolicyRegistry::builder()
        .register("plain", PolicyDescriptor::new())
        .register(
            "find",
            PolicyDescriptor::new().cacheable().propagation(Propagation::Supports).depends_on("update"),
        )
        .register(
            "update",
            PolicyDescriptor::new().propagation(Propagation::Required).access_mode(AccessMode::Write),
        )
        .register("inner", PolicyDescriptor::new().propagation(Propagation::Mandatory))
        .register("isolated", PolicyDescriptor::new().propagation(Propagation::RequiresNew))
        .register("flaky", PolicyDescriptor::new().propagation(Propagation::Required).retry(3))
        .build()
        .expect("valid registry");

    Dispatcher::builder()
        .registry(registry)
        .resource_manager(Arc::new(MemoryResourceManager::new()))
        .config(DispatcherConfig::new().cache(cache))
        .build()
        .expect("valid configuration")
}

// ============================================================================
// Dispatch Overhead
// ============================================================================

fn dispatch_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");
    let d = dispatcher(CacheConfig::default());

    group.bench_function("plain", |b| {
        b.iter(|| d.invoke("plain", &[Value::Int(1)], |call| Ok(black_box(call.args()[0].clone()))));
    });

    group.bench_function("unregistered", |b| {
        b.iter(|| black_box(d.invoke("missing", &[], |_| Ok(Value::Null))));
    });

    group.finish();
}

// ============================================================================
// Cache Benchmarks
// ============================================================================

fn cache_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache");

    let d = dispatcher(CacheConfig::default());
    d.invoke("find", &[Value::Int(7)], |_| Ok(Value::Int(42))).expect("warm cache");
    group.bench_function("hit", |b| {
        b.iter(|| d.invoke("find", &[Value::Int(7)], |_| Ok(Value::Int(42))));
    });

    let d = dispatcher(CacheConfig::disabled());
    group.bench_function("disabled", |b| {
        b.iter(|| d.invoke("find", &[Value::Int(7)], |_| Ok(Value::Int(42))));
    });

    for size in [100u64, 1000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::new("miss_and_evict", size), &size, |b, &size| {
            let d = dispatcher(CacheConfig::new().max_entries(64));
            b.iter(|| {
                for n in 0..size {
                    let arg = i64::try_from(n).unwrap_or(i64::MAX);
                    d.invoke("find", &[Value::Int(arg)], |_| Ok(Value::Int(arg))).expect("find");
                }
            });
        });
    }

    group.bench_function("invalidate_and_refill", |b| {
        let d = dispatcher(CacheConfig::default());
        b.iter(|| {
            d.invoke("find", &[Value::Int(1)], |_| Ok(Value::Int(1))).expect("find");
            d.invoke("update", &[Value::Int(1)], |_| Ok(Value::Null)).expect("update");
        });
    });

    group.finish();
}

// ============================================================================
// Transaction Benchmarks
// ============================================================================

fn transaction_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("transaction");
    let d = dispatcher(CacheConfig::default());

    group.bench_function("begin_commit", |b| {
        b.iter(|| d.invoke("update", &[], |_| Ok(Value::Null)));
    });

    group.bench_function("join", |b| {
        b.iter(|| {
            d.invoke("update", &[], |call| call.invoke("inner", &[], |_| Ok(Value::Null)))
        });
    });

    group.bench_function("suspend_resume", |b| {
        b.iter(|| {
            d.invoke("update", &[], |call| call.invoke("isolated", &[], |_| Ok(Value::Null)))
        });
    });

    group.finish();
}

// ============================================================================
// Retry Benchmarks
// ============================================================================

fn retry_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("retry");
    let d = dispatcher(CacheConfig::default());

    group.bench_function("two_transient_failures", |b| {
        b.iter(|| {
            d.invoke("flaky", &[], |call| {
                if call.attempt() < 3 {
                    Err(Error::transient("busy"))
                } else {
                    Ok(Value::Null)
                }
            })
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    dispatch_benchmarks,
    cache_benchmarks,
    transaction_benchmarks,
    retry_benchmarks
);
criterion_main!(benches);
