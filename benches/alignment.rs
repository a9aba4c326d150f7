//! Throughput benchmarks for timestamp estimation and stream alignment.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::hint::black_box;
use std::time::Duration;
use streamalign::clock::ClockTime;
use streamalign::temporal::{EstimatorConfig, StreamAligner, StreamConfig, TimestampEstimator};

/// Jittery arrivals of a 100Hz source.
fn arrivals(count: usize) -> Vec<ClockTime> {
    let mut rng = StdRng::seed_from_u64(1);
    (0..count as u64)
        .map(|i| {
            let jitter = ClockTime::from_micros(rng.gen_range(0..2_000));
            ClockTime::from_millis(1_000 + 10 * i) + jitter
        })
        .collect()
}

fn bench_estimator_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("estimator_update");
    let samples = arrivals(10_000);

    for window_secs in [1u64, 10, 60].iter() {
        group.throughput(Throughput::Elements(samples.len() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}s", window_secs)),
            window_secs,
            |b, &window_secs| {
                b.iter(|| {
                    let config = EstimatorConfig::with_window(Duration::from_secs(window_secs))
                        .with_lost_threshold(2);
                    let mut estimator = TimestampEstimator::new(config).unwrap();
                    for time in &samples {
                        black_box(estimator.update(*time));
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_aligner_push_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("aligner_push_step");
    let per_stream = 1_000u64;

    for streams in [2usize, 8, 32].iter() {
        group.throughput(Throughput::Elements(per_stream * *streams as u64));
        group.bench_with_input(BenchmarkId::from_parameter(streams), streams, |b, &streams| {
            b.iter(|| {
                let mut aligner = StreamAligner::new(Duration::from_millis(100));
                let handles: Vec<_> = (0..streams)
                    .map(|_| {
                        aligner
                            .register_stream(
                                StreamConfig::new(Duration::from_millis(10)),
                                |ts, value: &u64| {
                                    black_box((ts, *value));
                                },
                            )
                            .unwrap()
                    })
                    .collect();

                for i in 0..per_stream {
                    let timestamp = ClockTime::from_millis(10 * i);
                    for handle in &handles {
                        aligner.push(*handle, timestamp, i).unwrap();
                    }
                    while aligner.step() {}
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_estimator_update, bench_aligner_push_step);
criterion_main!(benches);
