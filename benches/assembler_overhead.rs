//! Hot path benchmark: cost of one enter/exit pair
//!
//! Measures the per-call overhead instrumented code pays, outside of any
//! trace, inside a trace where the frame is merged away, and inside a trace
//! where every frame is kept.
//!
//! ```bash
//! cargo bench --bench assembler_overhead
//! ```

use calltrace::{FnSink, MarkerFlags, Tracer, TracerConfig};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::time::Duration;

fn tracer() -> Tracer {
    let tracer = Tracer::new(TracerConfig {
        min_trace_time: 0,
        ..TracerConfig::default()
    });
    tracer.add_sink(Arc::new(FnSink::new(|trace| {
        black_box(trace);
        true
    })));
    tracer
}

fn bench_enter_exit(c: &mut Criterion) {
    let mut group = c.benchmark_group("enter_exit");
    group.measurement_time(Duration::from_secs(5));
    group.throughput(Throughput::Elements(1));

    group.bench_function("outside_trace", |b| {
        let tracer = tracer();
        let mut a = tracer.assembler();
        a.enter(1, 1, 1, 0);
        let mut now = 0u64;
        b.iter(|| {
            now += 10;
            a.enter(black_box(2), 2, 2, now);
            a.exit(now + 5);
        });
    });

    group.bench_function("merged_in_trace", |b| {
        let tracer = tracer();
        let mut a = tracer.assembler();
        a.enter(1, 1, 1, 0);
        a.begin(1, 0, MarkerFlags::empty());
        let mut now = 0u64;
        b.iter(|| {
            now += 10;
            a.enter(black_box(2), 2, 2, now);
            a.exit(now + 5);
        });
    });

    group.bench_function("thread_local", |b| {
        let tracer = tracer();
        tracer.with_local(|a| a.enter(1, 1, 1, 0));
        let mut now = 0u64;
        b.iter(|| {
            now += 10;
            tracer.with_local(|a| {
                a.enter(black_box(2), 2, 2, now);
                a.exit(now + 5);
            })
        });
    });

    group.finish();
}

fn bench_full_trace(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_trace");
    group.measurement_time(Duration::from_secs(5));

    for calls in [16u64, 256, 4096] {
        group.throughput(Throughput::Elements(calls));
        group.bench_with_input(BenchmarkId::new("all_methods", calls), &calls, |b, &calls| {
            let tracer = tracer();
            let mut a = tracer.assembler();
            b.iter(|| {
                a.enter(1, 1, 1, 0);
                a.begin(1, 0, MarkerFlags::ALL_METHODS);
                for i in 0..calls {
                    a.enter(2, 2, 2, i * 10);
                    a.exit(i * 10 + 5);
                }
                a.exit(calls * 10);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_enter_exit, bench_full_trace);
criterion_main!(benches);
