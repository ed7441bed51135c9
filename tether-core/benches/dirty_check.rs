//! Benchmarks for dependency recording and dirty checking
//!
//! Run with: cargo bench -p tether-core

use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use tether_core::reactive::{DependencyMap, ObjectRef, TrackingContext};

fn make_state(n: usize) -> (ObjectRef, Vec<String>) {
    let keys: Vec<String> = (0..n).map(|i| format!("field{i}")).collect();
    let state = ObjectRef::from_pairs(keys.iter().map(|key| (key.as_str(), 0)));
    (state, keys)
}

fn record_all(state: &ObjectRef, keys: &[String]) -> Arc<DependencyMap> {
    let deps = Arc::new(DependencyMap::new());
    let _ctx = TrackingContext::enter(Arc::clone(&deps));
    let tracked = state.wrap();
    for key in keys {
        black_box(tracked.get(key));
    }
    deps
}

fn bench_record(c: &mut Criterion) {
    let mut group = c.benchmark_group("deps/record");
    for n in [4, 32, 256] {
        let (state, keys) = make_state(n);
        group.bench_with_input(BenchmarkId::new("reads", n), &keys, |b, keys| {
            b.iter(|| black_box(record_all(&state, keys)))
        });
    }
    group.finish();
}

fn bench_is_dirty(c: &mut Criterion) {
    let mut group = c.benchmark_group("deps/is_dirty");
    for n in [4, 32, 256] {
        let (state, keys) = make_state(n);
        let deps = record_all(&state, &keys);
        group.bench_with_input(BenchmarkId::new("clean", n), &deps, |b, deps| {
            b.iter(|| black_box(deps.is_dirty()))
        });

        let last = keys.last().cloned().unwrap_or_default();
        let mut value = 0_i64;
        group.bench_with_input(BenchmarkId::new("last_key_changed", n), &deps, |b, deps| {
            b.iter(|| {
                value += 1;
                state.set(&last, value);
                black_box(deps.is_dirty())
            })
        });
    }
    group.finish();
}

fn bench_nested(c: &mut Criterion) {
    let (state, keys) = make_state(16);
    c.bench_function("deps/nested_contexts", |b| {
        b.iter(|| {
            let outer = Arc::new(DependencyMap::new());
            let _outer = TrackingContext::enter(Arc::clone(&outer));
            black_box(record_all(&state, &keys));
            outer
        })
    });
}

criterion_group!(benches, bench_record, bench_is_dirty, bench_nested);
criterion_main!(benches);
