//! Benchmarks for the reactive core: dependency registration, write-path
//! notification, and the computed cache.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use filament_core::{computed, observe, watch, Record, Value, WatchOptions};

fn observed_record(fields: usize) -> Record {
    let record = Record::new();
    for i in 0..fields {
        record.define(format!("f{i}"), Value::Int(i as i64));
    }
    let _ = observe(&Value::Record(record.clone()));
    record
}

fn bench_tracked_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("tracked_reads");
    for n in [8usize, 64, 512] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let state = observed_record(n);
            let reader = state.clone();
            let _handle = watch(
                move || {
                    let mut sum = 0;
                    for i in 0..n {
                        sum += reader.get(&format!("f{i}")).as_int().unwrap_or(0);
                    }
                    Value::Int(sum)
                },
                |_new, _old| {},
                WatchOptions {
                    sync: true,
                    ..Default::default()
                },
            );
            // Each write re-runs the getter, re-registering n deps.
            let mut tick = 0i64;
            b.iter(|| {
                tick += 1;
                state.set("f0", Value::Int(black_box(tick)));
            });
        });
    }
    group.finish();
}

fn bench_notify_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("notify_fanout");
    for watchers in [1usize, 16, 128] {
        group.bench_with_input(
            BenchmarkId::from_parameter(watchers),
            &watchers,
            |b, &watchers| {
                let state = observed_record(1);
                let handles: Vec<_> = (0..watchers)
                    .map(|_| {
                        let reader = state.clone();
                        watch(
                            move || reader.get("f0"),
                            |_new, _old| {},
                            WatchOptions {
                                sync: true,
                                ..Default::default()
                            },
                        )
                    })
                    .collect();
                let mut tick = 0i64;
                b.iter(|| {
                    tick += 1;
                    state.set("f0", Value::Int(black_box(tick)));
                });
                drop(handles);
            },
        );
    }
    group.finish();
}

fn bench_computed_cache(c: &mut Criterion) {
    let state = observed_record(4);
    let reader = state.clone();
    let derived = computed(move || {
        let mut sum = 0;
        for i in 0..4 {
            sum += reader.get(&format!("f{i}")).as_int().unwrap_or(0);
        }
        Value::Int(sum)
    });
    derived.get();

    c.bench_function("computed_cached_read", |b| {
        b.iter(|| black_box(derived.get()));
    });

    let mut tick = 0i64;
    c.bench_function("computed_invalidate_and_read", |b| {
        b.iter(|| {
            tick += 1;
            state.set("f0", Value::Int(tick));
            black_box(derived.get())
        });
    });
}

criterion_group!(
    benches,
    bench_tracked_reads,
    bench_notify_fanout,
    bench_computed_cache
);
criterion_main!(benches);
