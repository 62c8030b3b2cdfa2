use criterion::{black_box, criterion_group, criterion_main, Criterion};

use edgeswarm_core::bandit::{features, matrix, CompositeModel, LatencyModel};

fn bench_scoring(c: &mut Criterion) {
    let x = features(42.0, 63.0, 180.0);

    let mut latency = LatencyModel::cold(1.0);
    for i in 0..64 {
        latency.train(&features(i as f64, 100.0 - i as f64, 50.0 + i as f64), 1.0 + i as f64 * 0.01);
    }
    c.bench_function("latency_score", |b| {
        b.iter(|| black_box(latency.score(black_box(&x))))
    });

    let composite = CompositeModel::warm_start(0.5);
    c.bench_function("composite_score", |b| {
        b.iter(|| black_box(composite.score(black_box(&x), 75.0)))
    });

    c.bench_function("matrix_invert", |b| {
        b.iter(|| black_box(matrix::invert(black_box(&latency.a))))
    });
}

fn bench_training(c: &mut Criterion) {
    let x = features(42.0, 63.0, 180.0);
    c.bench_function("latency_train", |b| {
        b.iter_batched(
            || LatencyModel::cold(1.0),
            |mut model| model.train(black_box(&x), 2.5),
            criterion::BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_scoring, bench_training);
criterion_main!(benches);
