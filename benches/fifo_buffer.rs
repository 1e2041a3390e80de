//! Benchmarks for `FifoBuffer`'s hot paths: the pool calls
//! `remove_until_first_inclusive_or_null` and `add_last` on every selection
//! attempt (spec.md §4.3), so their cost sets a floor under `Pool::with_permit`.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use pushkit::buffer::FifoBuffer;

fn benchmark_add_last_remove_first(c: &mut Criterion) {
    let mut group = c.benchmark_group("fifo_buffer_round_trip");

    for size in [8usize, 64, 512] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut buf = FifoBuffer::new(size);
                for i in 0..size {
                    buf.add_last(i);
                }
                for _ in 0..size {
                    black_box(buf.remove_first());
                }
            });
        });
    }

    group.finish();
}

fn benchmark_round_robin_selection(c: &mut Criterion) {
    let mut group = c.benchmark_group("fifo_buffer_round_robin");

    group.bench_function("remove_until_first_inclusive_reinsert", |b| {
        let mut buf = FifoBuffer::new(16);
        for i in 0..16 {
            buf.add_last(i);
        }
        b.iter(|| {
            // Mirrors `Pool::try_attempt`'s step 2: pull the front element
            // off, immediately reinsert it at the back, keeping the buffer
            // at a constant size across iterations.
            let found = buf.remove_until_first_inclusive_or_null(|_| true);
            if let Some(item) = found {
                buf.add_last(item);
            }
            black_box(buf.size());
        });
    });

    group.finish();
}

fn benchmark_remove_all(c: &mut Criterion) {
    let mut group = c.benchmark_group("fifo_buffer_remove_all");

    group.bench_function("prune_half", |b| {
        b.iter(|| {
            let mut buf = FifoBuffer::new(256);
            for i in 0..256 {
                buf.add_last(i);
            }
            buf.remove_all(|&i| i % 2 == 0);
            black_box(buf.size());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_add_last_remove_first,
    benchmark_round_robin_selection,
    benchmark_remove_all
);
criterion_main!(benches);
