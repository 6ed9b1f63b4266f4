//! Benchmark: write propagation through scopes and computed chains

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ripple_core::reactive::{Computed, Signal, TrackingScope};

fn benchmark_tracked_read(c: &mut Criterion) {
    let signal = Signal::new(1u64);

    c.bench_function("tracked_read", |b| {
        b.iter(|| {
            let scope = TrackingScope::new();
            black_box(scope.run(|| signal.get()));
        });
    });
}

fn benchmark_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");

    for subscribers in [1usize, 16, 256] {
        let signal = Signal::new(0u64);
        let subscriptions: Vec<_> = (0..subscribers)
            .map(|_| {
                let scope = TrackingScope::new();
                scope.run(|| signal.get());
                scope.subscribe(|| {})
            })
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(subscribers), &signal, |b, signal| {
            b.iter(|| signal.update(|value| value + 1));
        });

        drop(subscriptions);
    }

    group.finish();
}

fn benchmark_computed_chain(c: &mut Criterion) {
    let base = Signal::new(0u64);
    let mut tail = Computed::new({
        let base = base.clone();
        move || base.get() + 1
    });
    for _ in 0..32 {
        let previous = tail.clone();
        tail = Computed::new(move || previous.get() + 1);
    }

    c.bench_function("computed_chain_32", |b| {
        b.iter(|| {
            base.update(|value| value + 1);
            black_box(tail.get())
        });
    });
}

criterion_group!(
    benches,
    benchmark_tracked_read,
    benchmark_fan_out,
    benchmark_computed_chain
);
criterion_main!(benches);
