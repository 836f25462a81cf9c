//! Latch wake-ups under many waiters.

use effectus::test_utils::{DEFAULT_TEST_SEED, init_test_logging, test_runtime};
use effectus::{
    Effect, Exit, FiberId, FiberStatus, Latch, RuntimeBuilder, SuspendReason,
    assert_exit_success, assert_with_log, test_complete, test_phase,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

fn counting_waiter(latch: &Latch, hits: &Arc<AtomicU32>) -> Effect<(), ()> {
    let hits = Arc::clone(hits);
    latch.when_open(Effect::sync(move || {
        hits.fetch_add(1, Ordering::SeqCst);
    }))
}

#[test]
fn every_waiter_resumes_exactly_once() {
    init_test_logging();
    test_phase!("every_waiter_resumes_exactly_once");

    let rt = test_runtime();
    let mut rng = fastrand::Rng::with_seed(DEFAULT_TEST_SEED);
    let latch = Latch::new(false);
    let counters: Vec<Arc<AtomicU32>> = (0..64).map(|_| Arc::new(AtomicU32::new(0))).collect();
    let fibers: Vec<_> = counters
        .iter()
        .map(|hits| rt.fork(counting_waiter(&latch, hits)))
        .collect();

    assert_exit_success!(rt.run(Effect::<(), ()>::yield_now()), ());
    let queued = latch.waiter_count();
    assert_with_log!(queued == 64, "all fibers queued", 64, queued);
    assert_eq!(
        fibers[0].status(),
        FiberStatus::Suspended(SuspendReason::Latch)
    );

    let interrupted: Vec<usize> = (0..fibers.len()).filter(|_| rng.u8(..4) == 0).collect();
    for &index in &interrupted {
        assert_eq!(rt.interrupt(&fibers[index]), Exit::interrupt(FiberId::NONE));
    }
    assert_eq!(latch.waiter_count(), 64 - interrupted.len());

    latch.open();
    latch.open();
    for (index, fiber) in fibers.iter().enumerate() {
        let exit = rt.await_fiber(fiber);
        let expected = u32::from(!interrupted.contains(&index));
        assert_eq!(exit.is_success(), expected == 1, "fiber {index}");
        assert_eq!(counters[index].load(Ordering::SeqCst), expected, "fiber {index}");
    }
    assert_eq!(latch.waiter_count(), 0);
    test_complete!("every_waiter_resumes_exactly_once");
}

#[test]
fn closing_again_blocks_new_arrivals_only() {
    init_test_logging();
    let rt = test_runtime();
    let latch = Latch::new(true);
    let hits = Arc::new(AtomicU32::new(0));

    assert_exit_success!(rt.run(counting_waiter(&latch, &hits)), ());
    latch.close();
    let late = rt.fork(counting_waiter(&latch, &hits));
    assert_exit_success!(rt.run(Effect::<(), ()>::yield_now()), ());
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(!late.is_done());

    latch.release();
    assert_exit_success!(rt.await_fiber(&late), ());
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert!(!latch.is_open(), "release leaves the latch closed");
}

#[test]
fn opening_from_another_fiber_on_worker_threads() {
    init_test_logging();
    test_phase!("opening_from_another_fiber_on_worker_threads");

    let rt = RuntimeBuilder::multi_thread()
        .worker_threads(4)
        .build()
        .expect("runtime builds");
    let mut rng = fastrand::Rng::with_seed(DEFAULT_TEST_SEED ^ 0x5A5A);
    let latch = Latch::new(false);
    let hits = Arc::new(AtomicU32::new(0));

    for _ in 0..5 {
        let waiters: Vec<_> = (0..100)
            .map(|_| {
                let yields = rng.usize(..3);
                let wait = (0..yields).fold(counting_waiter(&latch, &hits), |effect, _| {
                    Effect::<(), ()>::yield_now().zip_right(effect)
                });
                rt.fork(wait)
            })
            .collect();
        let opener = {
            let latch = latch.clone();
            Effect::<(), ()>::yield_now().zip_right(Effect::sync(move || latch.open()))
        };
        assert_exit_success!(rt.run(opener), ());
        for fiber in &waiters {
            assert_exit_success!(rt.await_fiber(fiber), ());
        }
        latch.close();
    }

    let total = hits.load(Ordering::SeqCst);
    assert_with_log!(total == 500, "each waiter ran once", 500, total);
    rt.shutdown();
    test_complete!("opening_from_another_fiber_on_worker_threads");
}
