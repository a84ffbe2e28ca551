// benches/stream_benchmarks.rs

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use daq_core::timing::pacer::next_poll_delay;
use daq_core::utils::time::MockClock;
use daq_core::{IntervalRegistry, ScanBuffer};
use std::sync::Arc;

const CHANNEL_COUNTS: &[usize] = &[1, 4, 8, 16];
const BATCH_SIZES: &[usize] = &[32, 128, 512];

fn benchmark_scan_buffer(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan_buffer");

    for &channels in CHANNEL_COUNTS {
        group.throughput(Throughput::Elements(1_000));
        group.bench_with_input(
            BenchmarkId::new("enqueue", format!("{}ch", channels)),
            &channels,
            |b, &channels| {
                let scan = vec![0.5f64; channels];
                b.iter(|| {
                    let buffer = ScanBuffer::new(channels, 2_048);
                    for _ in 0..1_000 {
                        buffer.enqueue(black_box(&scan));
                    }
                });
            },
        );
    }

    for &batch in BATCH_SIZES {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(
            BenchmarkId::new("enqueue_dequeue_cycle", format!("{}scans", batch)),
            &batch,
            |b, &batch| {
                let buffer = ScanBuffer::new(8, batch * 4);
                let scan = vec![0.5f64; 8];
                b.iter(|| {
                    for _ in 0..batch {
                        buffer.enqueue(black_box(&scan));
                    }
                    let (data, _) = buffer.dequeue_batch(batch).unwrap();
                    black_box(data);
                });
            },
        );
    }

    group.finish();
}

fn benchmark_pacer(c: &mut Criterion) {
    c.bench_function("pacer_next_poll_delay", |b| {
        b.iter(|| {
            for backlog in 0..100u64 {
                black_box(next_poll_delay(
                    black_box(100),
                    black_box(2_000.0),
                    black_box(backlog),
                ));
            }
        });
    });
}

fn benchmark_interval_timer(c: &mut Criterion) {
    c.bench_function("interval_wait_mock_clock", |b| {
        let clock = Arc::new(MockClock::new(0));
        let registry = IntervalRegistry::new(clock);
        registry.start(1, 1_000).unwrap();
        b.iter(|| {
            black_box(registry.wait_for_next(1).unwrap());
        });
    });
}

criterion_group!(
    benches,
    benchmark_scan_buffer,
    benchmark_pacer,
    benchmark_interval_timer
);
criterion_main!(benches);
