//! Parking for idle driver threads.

use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// Counts wake permits so an unpark that races ahead of a park is not lost.
///
/// Permits saturate at the number of driver threads.
#[derive(Debug)]
pub(crate) struct Parker {
    permits: Mutex<usize>,
    max_permits: usize,
    condvar: Condvar,
}

impl Parker {
    pub(crate) fn new(threads: usize) -> Self {
        Self {
            permits: Mutex::new(0),
            max_permits: threads.max(1),
            condvar: Condvar::new(),
        }
    }

    /// Blocks until a permit is available or `timeout` elapses.
    pub(crate) fn park(&self, timeout: Option<Duration>) {
        let mut permits = self.permits.lock();
        if *permits == 0 {
            match timeout {
                Some(timeout) => {
                    let _ = self.condvar.wait_for(&mut permits, timeout);
                }
                None => {
                    while *permits == 0 {
                        self.condvar.wait(&mut permits);
                    }
                }
            }
        }
        *permits = permits.saturating_sub(1);
    }

    /// Makes one permit available and wakes one parked thread.
    pub(crate) fn unpark_one(&self) {
        {
            let mut permits = self.permits.lock();
            *permits = (*permits + 1).min(self.max_permits);
        }
        self.condvar.notify_one();
    }

    /// Wakes every parked thread.
    pub(crate) fn unpark_all(&self) {
        *self.permits.lock() = self.max_permits;
        self.condvar.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn unpark_before_park_is_not_lost() {
        let parker = Parker::new(1);
        parker.unpark_one();
        parker.unpark_one();
        assert_eq!(*parker.permits.lock(), 1, "permits saturate");
        let start = Instant::now();
        parker.park(None);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn park_times_out() {
        let parker = Parker::new(1);
        let start = Instant::now();
        parker.park(Some(Duration::from_millis(10)));
        assert!(start.elapsed() >= Duration::from_millis(5));
    }

    #[test]
    fn unpark_from_another_thread() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("unpark_from_another_thread");

        let parker = Arc::new(Parker::new(1));
        let remote = Arc::clone(&parker);
        let thread = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(5));
            remote.unpark_one();
        });
        parker.park(None);
        thread.join().expect("unparking thread panicked");
        crate::test_complete!("unpark_from_another_thread");
    }
}
