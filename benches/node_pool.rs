//! Node pool benchmarks
//!
//! Compares recycling trace nodes through the free-list against plain heap
//! allocation, for single nodes and for whole discarded subtrees.
//!
//! ```bash
//! cargo bench --bench node_pool
//! ```

use calltrace::{AttrValue, NodePool, NodePoolConfig, TraceNode};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::time::Duration;

/// A node that looks like a closed frame with a little payload.
fn populate(node: &mut TraceNode, i: u64) {
    node.class_id = (i % 64) as u32;
    node.method_id = (i % 128) as u32;
    node.start_time = Some(i);
    node.duration = 1_000;
    node.calls = 1;
    node.set_attr(1, AttrValue::Int(i as i64));
}

fn subtree(pool: &mut NodePool, fanout: usize) -> TraceNode {
    let mut root = pool.acquire();
    populate(&mut root, 0);
    for i in 0..fanout {
        let mut child = pool.acquire();
        populate(&mut child, i as u64);
        root.add_child(Arc::new(child));
    }
    root
}

fn bench_acquire_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("node_cycle");
    group.measurement_time(Duration::from_secs(5));
    group.throughput(Throughput::Elements(1));

    group.bench_function("pooled", |b| {
        let mut pool = NodePool::new(NodePoolConfig::new(1024));
        let mut i = 0u64;
        b.iter(|| {
            let mut node = pool.acquire();
            populate(&mut node, i);
            black_box(&node);
            pool.release(node);
            i += 1;
        });
    });

    group.bench_function("unpooled", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let mut node = TraceNode::new();
            populate(&mut node, i);
            black_box(node);
            i += 1;
        });
    });

    group.finish();
}

fn bench_subtree_reclaim(c: &mut Criterion) {
    let mut group = c.benchmark_group("subtree_reclaim");
    group.measurement_time(Duration::from_secs(5));

    for fanout in [4usize, 32, 256] {
        group.throughput(Throughput::Elements(fanout as u64 + 1));

        group.bench_with_input(BenchmarkId::new("pooled", fanout), &fanout, |b, &fanout| {
            let mut pool = NodePool::new(NodePoolConfig::new(1024));
            b.iter(|| {
                let tree = subtree(&mut pool, fanout);
                pool.release(black_box(tree));
            });
        });

        group.bench_with_input(BenchmarkId::new("unpooled", fanout), &fanout, |b, &fanout| {
            let mut pool = NodePool::new(NodePoolConfig::disabled());
            b.iter(|| {
                let tree = subtree(&mut pool, fanout);
                pool.release(black_box(tree));
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_acquire_release, bench_subtree_reclaim);
criterion_main!(benches);
