//! Async core benchmarks using criterion.
//!
//! Run with: cargo bench --bench async_bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use effectio::async_rt::{req_await, with_async_handler, IoDriver, ThreadDriver};
use effectio::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn bench_driver_submit_cancel(c: &mut Criterion) {
    let mut group = c.benchmark_group("driver_submit_cancel");

    group.bench_function("submit_then_cancel", |b| {
        let driver = ThreadDriver::new();
        b.iter(|| {
            let id = effectio::async_rt::RequestId::next();
            driver.submit_timer(id, Instant::now() + Duration::from_secs(5), Value::null());
            driver.cancel(black_box(id));
        });
    });

    group.bench_function("poll_empty", |b| {
        let driver = ThreadDriver::new();
        b.iter(|| black_box(driver.poll()));
    });

    group.finish();
}

fn bench_req_await_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("req_await_round_trip");

    // A timer that has already elapsed by the time `req_await` first
    // polls, the cheapest completion path through the loop.
    group.bench_function("already_elapsed", |b| {
        let driver: Arc<dyn IoDriver> = Arc::new(ThreadDriver::new());
        b.iter(|| {
            let deadline = Instant::now();
            black_box(with_async_handler(driver.clone(), || {
                let r = req_await(deadline, Duration::from_millis(1), Value::from_i64(1));
                Value::from_boxed(r)
            }))
        });
    });

    group.finish();
}

criterion_group!(benches, bench_driver_submit_cancel, bench_req_await_round_trip);
criterion_main!(benches);
