//! pipefold benchmark suite.
//!
//! These mostly measure the underlying channels: values pass through with
//! little or no work done on them.

use std::sync::Arc;
use std::thread;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use pipefold::{map, reduce_n, MapFn, Pipeline};

fn identity(x: u64) -> (u64, Option<String>) {
    (x, None)
}

fn sum(acc: &u64, x: u64) -> Result<u64, String> {
    Ok(acc + x)
}

fn passthrough_benchmarks(c: &mut Criterion) {
    let iterations = 10_000u64;
    let fns: Vec<MapFn<u64, String>> = vec![Arc::new(identity)];

    let mut group = c.benchmark_group("passthrough");
    group.throughput(Throughput::Elements(iterations));

    group.bench_function("chain", |b| {
        b.iter(|| {
            let (output, errors) = map((0..black_box(iterations)).into_stream(), &fns);
            let drain = thread::spawn(move || errors.count());
            assert_eq!(output.count() as u64, iterations);
            drain.join().unwrap();
        })
    });

    for workers in [1, 4, 16] {
        group.bench_with_input(BenchmarkId::new("fan_out", workers), &workers, |b, &workers| {
            b.iter(|| {
                let (output, errors) = (0..black_box(iterations))
                    .with_workers(workers)
                    .map(&fns)
                    .unwrap();
                let drain = thread::spawn(move || errors.count());
                assert_eq!(output.count() as u64, iterations);
                drain.join().unwrap();
            })
        });
    }
    group.finish();
}

fn reduce_benchmarks(c: &mut Criterion) {
    let iterations = 10_000u64;
    let mut group = c.benchmark_group("reduce_n");
    group.throughput(Throughput::Elements(iterations));

    for workers in [1, 4, 16] {
        group.bench_with_input(BenchmarkId::from_parameter(workers), &workers, |b, &workers| {
            b.iter(|| {
                let total = reduce_n(workers, (0..black_box(iterations)).into_stream(), sum, None).unwrap();
                assert_eq!(total, Some(iterations * (iterations - 1) / 2));
            })
        });
    }
    group.finish();
}

criterion_group!(benches, passthrough_benchmarks, reduce_benchmarks);
criterion_main!(benches);
