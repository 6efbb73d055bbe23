//! Channel benchmarks using criterion.
//!
//! Run with: cargo bench --bench channel_bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use effectio::async_rt::Channel;
use effectio::Value;

fn bench_channel_creation(c: &mut Criterion) {
    let mut group = c.benchmark_group("channel_creation");

    for capacity in [1, 10, 100, 1000] {
        group.bench_with_input(
            BenchmarkId::new("bounded", capacity),
            &capacity,
            |b, &capacity| {
                b.iter(|| black_box(Channel::bounded(capacity)));
            },
        );
    }

    group.finish();
}

fn bench_send_recv(c: &mut Criterion) {
    let mut group = c.benchmark_group("send_recv");

    group.bench_function("single_round_trip", |b| {
        let ch = Channel::bounded(1024);
        b.iter(|| {
            ch.send(black_box(Value::from_i64(42)));
            black_box(ch.recv())
        });
    });

    for batch_size in [10, 100, 1000] {
        group.throughput(Throughput::Elements(batch_size as u64));
        group.bench_with_input(
            BenchmarkId::new("batch", batch_size),
            &batch_size,
            |b, &batch_size| {
                let ch = Channel::bounded(batch_size * 2);
                b.iter(|| {
                    for i in 0..batch_size {
                        ch.send(black_box(Value::from_i64(i as i64)));
                    }
                    for _ in 0..batch_size {
                        black_box(ch.recv());
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_channel_state_checks(c: &mut Criterion) {
    let mut group = c.benchmark_group("channel_state_checks");

    group.bench_function("len_is_empty_is_full", |b| {
        let ch = Channel::bounded(100);
        for i in 0..50 {
            ch.send(Value::from_i64(i));
        }
        b.iter(|| {
            black_box(ch.len());
            black_box(ch.is_empty());
            black_box(ch.is_full());
        });
    });

    group.bench_function("clone", |b| {
        let ch = Channel::bounded(100);
        b.iter(|| black_box(ch.clone()));
    });

    group.finish();
}

fn bench_cross_thread(c: &mut Criterion) {
    let mut group = c.benchmark_group("cross_thread");

    // Mirrors how `async_rt::combinators::interleave` hands completions
    // back from worker threads to the strand driving the reactor.
    group.bench_function("producer_consumer_100", |b| {
        b.iter(|| {
            let ch = Channel::bounded(8);
            let producer = ch.clone();
            let handle = std::thread::spawn(move || {
                for i in 0..100 {
                    producer.send(Value::from_i64(i));
                }
                producer.close();
            });
            let mut received = 0;
            while ch.recv().is_some() {
                received += 1;
            }
            handle.join().unwrap();
            black_box(received)
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_channel_creation,
    bench_send_recv,
    bench_channel_state_checks,
    bench_cross_thread,
);
criterion_main!(benches);
