// Criterion benchmarks for noderoute-metrics
//
// Run benchmarks with:
//   cargo bench -p noderoute-metrics

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use noderoute_metrics::{MetricsAggregator, Topology};
use std::time::Instant;

fn bench_record(c: &mut Criterion) {
    let mut group = c.benchmark_group("record");
    let metrics = MetricsAggregator::new();

    group.bench_function("request_and_success", |b| {
        b.iter(|| {
            let start = Instant::now();
            metrics.record_request(black_box("node-1"));
            metrics.record_success(black_box("node-1"), start);
        });
    });

    let nodes: Vec<String> = (0..5).map(|i| format!("node-{}", i)).collect();
    group.bench_function("five_nodes", |b| {
        b.iter(|| {
            for node in &nodes {
                let start = Instant::now();
                metrics.record_request(node);
                metrics.record_failure(node, start);
            }
        });
    });

    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot");

    for node_count in [1, 10, 50] {
        let metrics = MetricsAggregator::new();
        for i in 0..1_000 {
            let node = format!("node-{}", i % node_count);
            let start = Instant::now();
            metrics.record_request(&node);
            metrics.record_success(&node, start);
        }
        let topology = Topology {
            total_nodes: node_count,
            healthy_nodes: node_count,
        };

        group.bench_with_input(BenchmarkId::from_parameter(node_count), &topology, |b, t| {
            b.iter(|| metrics.snapshot(black_box(*t)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_record, bench_snapshot);
criterion_main!(benches);
