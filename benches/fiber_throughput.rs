//! Fiber runtime benchmarks.
//!
//! Fork/join throughput on both runtime flavors, latch fan-out, and the
//! cost of interrupting a parked population.
//!
//! Run:
//!   cargo bench --bench fiber_throughput

#![allow(missing_docs)]

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use effectus::{Effect, Latch, Runtime, RuntimeBuilder};
use std::hint::black_box;
use std::time::Duration;

fn current_thread() -> Runtime {
    RuntimeBuilder::current_thread()
        .virtual_time(true)
        .build()
        .expect("runtime builds")
}

fn multi_thread(workers: usize) -> Runtime {
    RuntimeBuilder::multi_thread()
        .worker_threads(workers)
        .build()
        .expect("runtime builds")
}

fn fan_out(n: u64) -> Effect<u64, ()> {
    let children = (0..n).map(|i| Effect::<(), ()>::yield_now().zip_right(Effect::succeed(i)));
    Effect::all_par(children).map(|values| values.into_iter().sum())
}

fn bench_fork_join(c: &mut Criterion) {
    let mut group = c.benchmark_group("fiber/fork_join");
    let single = current_thread();
    let pool = multi_thread(4);
    for &n in &[16_u64, 256, 4_096] {
        group.throughput(Throughput::Elements(n));
        group.bench_with_input(BenchmarkId::new("current_thread", n), &n, |b, &n| {
            b.iter(|| black_box(single.run(fan_out(n))));
        });
        group.bench_with_input(BenchmarkId::new("multi_thread_4", n), &n, |b, &n| {
            b.iter(|| black_box(pool.run(fan_out(n))));
        });
    }
    group.finish();
    pool.shutdown();
}

fn bench_flat_map_chain(c: &mut Criterion) {
    let rt = current_thread();
    let mut group = c.benchmark_group("fiber/flat_map_chain");
    for &depth in &[100_u64, 1_000] {
        let chain = (0..depth).fold(Effect::<u64, ()>::succeed(0), |acc, _| {
            acc.flat_map(|n| Effect::succeed(n + 1))
        });
        group.throughput(Throughput::Elements(depth));
        group.bench_with_input(BenchmarkId::from_parameter(depth), &chain, |b, chain| {
            b.iter(|| black_box(rt.run(chain.clone())));
        });
    }
    group.finish();
}

fn bench_latch_release(c: &mut Criterion) {
    let rt = current_thread();
    let mut group = c.benchmark_group("fiber/latch_release");
    for &waiters in &[64_usize, 1_024] {
        group.throughput(Throughput::Elements(waiters as u64));
        group.bench_with_input(BenchmarkId::from_parameter(waiters), &waiters, |b, &waiters| {
            b.iter(|| {
                let latch = Latch::new(false);
                let fibers: Vec<_> = (0..waiters)
                    .map(|_| rt.fork(latch.await_open::<()>()))
                    .collect();
                let _ = rt.run(Effect::<(), ()>::yield_now());
                latch.open();
                for fiber in &fibers {
                    black_box(rt.await_fiber(fiber));
                }
            });
        });
    }
    group.finish();
}

fn bench_interrupt_sleepers(c: &mut Criterion) {
    let rt = current_thread();
    c.bench_function("fiber/interrupt_sleepers_256", |b| {
        b.iter(|| {
            let sleepers: Vec<_> = (0..256)
                .map(|_| rt.fork(Effect::<(), ()>::sleep(Duration::from_secs(3_600))))
                .collect();
            let _ = rt.run(Effect::<(), ()>::yield_now());
            for fiber in &sleepers {
                black_box(rt.interrupt(fiber));
            }
        });
    });
}

criterion_group!(
    benches,
    bench_fork_join,
    bench_flat_map_chain,
    bench_latch_release,
    bench_interrupt_sleepers,
);
criterion_main!(benches);
