use chanflux_core::filter::round_half_up;
use chanflux_core::{ChannelBuffer, FilterSpec, Pipeline};
use chanflux_types::{Alarm, ChannelName, ChannelValue, ControlSystemName, Scalar, Timestamp};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::thread;

fn value(v: f64) -> ChannelValue {
    ChannelValue::scalar(Scalar::Real(v), Alarm::NONE, Timestamp(1))
}

/// Benchmark concurrent writers on one channel (high contention)
fn bench_concurrent_writes_same_channel(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent_writes_same_channel");

    for thread_count in [1, 2, 4, 8].iter() {
        group.throughput(Throughput::Elements(*thread_count as u64 * 1000));
        group.bench_with_input(
            BenchmarkId::new("threads", thread_count),
            thread_count,
            |b, &thread_count| {
                b.iter(|| {
                    let buffer = Arc::new(ChannelBuffer::new(16));
                    let name = ControlSystemName::new("hot");
                    buffer.open(&name, None);

                    let mut handles_vec = vec![];

                    for _ in 0..thread_count {
                        let buffer = Arc::clone(&buffer);
                        let name = name.clone();
                        let join_handle = thread::spawn(move || {
                            for i in 0..1000 {
                                buffer.record_value(&name, black_box(value(i as f64)));
                            }
                        });
                        handles_vec.push(join_handle);
                    }

                    for join_handle in handles_vec {
                        join_handle.join().unwrap();
                    }
                });
            },
        );
    }
    group.finish();
}

/// Benchmark concurrent writers on separate channels (low contention)
fn bench_concurrent_writes_different_channels(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent_writes_different_channels");

    for thread_count in [2, 4, 8].iter() {
        group.throughput(Throughput::Elements(*thread_count as u64 * 1000));
        group.bench_with_input(
            BenchmarkId::from_parameter(thread_count),
            thread_count,
            |b, &thread_count| {
                b.iter(|| {
                    let buffer = Arc::new(ChannelBuffer::new(16));
                    let mut handles_vec = vec![];

                    for thread_id in 0..thread_count {
                        let buffer = Arc::clone(&buffer);
                        let join_handle = thread::spawn(move || {
                            let name = ControlSystemName::new(format!("channel-{}", thread_id));
                            buffer.open(&name, None);
                            for i in 0..1000 {
                                buffer.record_value(&name, black_box(value(i as f64)));
                            }
                        });
                        handles_vec.push(join_handle);
                    }

                    for join_handle in handles_vec {
                        join_handle.join().unwrap();
                    }
                });
            },
        );
    }
    group.finish();
}

/// Benchmark a flush-style read racing writers
fn bench_reads_under_write_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("reads_under_write_load");

    for channel_count in [1, 8, 64].iter() {
        group.bench_with_input(
            BenchmarkId::new("channels", channel_count),
            channel_count,
            |b, &channel_count| {
                let buffer = Arc::new(ChannelBuffer::new(64));
                let names: Vec<ChannelName> = (0..channel_count)
                    .map(|i| ChannelName::new(format!("ch-{}", i)))
                    .collect();
                for name in &names {
                    buffer.open(name.control_system_name(), None);
                    for i in 0..64 {
                        buffer.record_value(name.control_system_name(), value(i as f64));
                    }
                }

                b.iter(|| {
                    let since = Timestamp::MIN;
                    black_box(buffer.values_newer_than(&names, since));
                });
            },
        );
    }
    group.finish();
}

/// Benchmark filter pipelines over a full window
fn bench_pipelines(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipelines");
    let values: Vec<ChannelValue> = (0..256).map(|i| value(i as f64 * 0.137)).collect();

    for (label, spec) in [
        ("none", FilterSpec::None),
        ("lastn", FilterSpec::LastN(16)),
        ("ratelimit", FilterSpec::RateLimiter { cycle: 4 }),
        ("deadband", FilterSpec::Deadband { delta: 0.5 }),
        ("precision", FilterSpec::Precision { digits: 2 }),
    ] {
        let pipeline = Pipeline::new(spec, None).unwrap();
        group.bench_function(label, |b| {
            b.iter(|| black_box(pipeline.apply(values.clone())));
        });
    }

    group.bench_function("round_half_up", |b| {
        b.iter(|| black_box(round_half_up(black_box(12345.5678), 2)));
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_concurrent_writes_same_channel,
    bench_concurrent_writes_different_channels,
    bench_reads_under_write_load,
    bench_pipelines
);
criterion_main!(benches);
