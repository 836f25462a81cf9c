//! Timer heap for deadline management.
//!
//! A min-heap of `(deadline, generation)` pairs plus a table of the wakers
//! still interested in each generation. Cancelling a timer only removes its
//! waker; the stale heap entry is discarded lazily when it reaches the top.

use crate::types::Time;
use hashbrown::HashMap;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::task::Waker;

/// Identifies one registration in a [`TimerHeap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerKey(u64);

#[derive(Debug, Clone, Eq, PartialEq)]
struct TimerEntry {
    deadline: Time,
    generation: u64,
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest deadline first).
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.generation.cmp(&self.generation))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A min-heap of timers ordered by deadline.
#[derive(Debug, Default)]
pub struct TimerHeap {
    heap: BinaryHeap<TimerEntry>,
    wakers: HashMap<u64, Waker>,
    next_generation: u64,
}

impl TimerHeap {
    /// Creates a new empty timer heap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of live (not cancelled, not fired) timers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.wakers.len()
    }

    /// Returns true if no live timers remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.wakers.is_empty()
    }

    /// Registers `waker` to be woken at `deadline`.
    pub fn insert(&mut self, deadline: Time, waker: Waker) -> TimerKey {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.heap.push(TimerEntry {
            deadline,
            generation,
        });
        self.wakers.insert(generation, waker);
        TimerKey(generation)
    }

    /// Replaces the waker of a live timer. Returns false if it already fired
    /// or was cancelled.
    pub fn update_waker(&mut self, key: TimerKey, waker: &Waker) -> bool {
        match self.wakers.get_mut(&key.0) {
            Some(slot) => {
                if !slot.will_wake(waker) {
                    slot.clone_from(waker);
                }
                true
            }
            None => false,
        }
    }

    /// Cancels a timer. Returns true if it was still live.
    pub fn cancel(&mut self, key: TimerKey) -> bool {
        self.wakers.remove(&key.0).is_some()
    }

    /// Returns the earliest live deadline, if any.
    pub fn peek_deadline(&mut self) -> Option<Time> {
        self.discard_cancelled();
        self.heap.peek().map(|e| e.deadline)
    }

    /// Pops the wakers of all live timers whose deadline is `<= now`.
    pub fn pop_expired(&mut self, now: Time) -> Vec<Waker> {
        let mut expired = Vec::new();
        while let Some(entry) = self.heap.peek() {
            if entry.deadline > now {
                break;
            }
            let generation = entry.generation;
            self.heap.pop();
            if let Some(waker) = self.wakers.remove(&generation) {
                expired.push(waker);
            }
        }
        expired
    }

    /// Clears all timers.
    pub fn clear(&mut self) {
        self.heap.clear();
        self.wakers.clear();
    }

    fn discard_cancelled(&mut self) {
        while let Some(entry) = self.heap.peek() {
            if self.wakers.contains_key(&entry.generation) {
                break;
            }
            self.heap.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::task::Wake;

    #[derive(Default)]
    struct WakeCounter {
        wakes: AtomicUsize,
    }

    impl Wake for WakeCounter {
        fn wake(self: Arc<Self>) {
            self.wakes.fetch_add(1, AtomicOrdering::Relaxed);
        }
    }

    fn waker() -> (Arc<WakeCounter>, Waker) {
        let counter = Arc::new(WakeCounter::default());
        let waker = Waker::from(Arc::clone(&counter));
        (counter, waker)
    }

    #[test]
    fn empty_heap_has_no_deadline() {
        let mut heap = TimerHeap::new();
        assert!(heap.is_empty());
        assert_eq!(heap.peek_deadline(), None);
    }

    #[test]
    fn insert_orders_by_deadline() {
        let mut heap = TimerHeap::new();
        let (_, w) = waker();
        heap.insert(Time::from_millis(200), w.clone());
        heap.insert(Time::from_millis(100), w.clone());
        heap.insert(Time::from_millis(150), w);

        assert_eq!(heap.peek_deadline(), Some(Time::from_millis(100)));
        assert_eq!(heap.len(), 3);
    }

    #[test]
    fn pop_expired_returns_all_due_wakers() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("pop_expired_returns_all_due_wakers");

        let mut heap = TimerHeap::new();
        let (counter, w) = waker();
        heap.insert(Time::from_millis(100), w.clone());
        heap.insert(Time::from_millis(200), w.clone());
        heap.insert(Time::from_millis(50), w);

        let expired = heap.pop_expired(Time::from_millis(125));
        crate::assert_with_log!(expired.len() == 2, "two due", 2, expired.len());
        for w in expired {
            w.wake();
        }
        assert_eq!(counter.wakes.load(AtomicOrdering::Relaxed), 2);
        assert_eq!(heap.peek_deadline(), Some(Time::from_millis(200)));
        crate::test_complete!("pop_expired_returns_all_due_wakers");
    }

    #[test]
    fn cancelled_timers_never_fire() {
        let mut heap = TimerHeap::new();
        let (_, w) = waker();
        let early = heap.insert(Time::from_millis(10), w.clone());
        heap.insert(Time::from_millis(20), w.clone());

        assert!(heap.cancel(early));
        assert!(!heap.cancel(early));
        assert!(!heap.update_waker(early, &w));
        assert_eq!(heap.peek_deadline(), Some(Time::from_millis(20)));
        assert_eq!(heap.pop_expired(Time::from_millis(15)).len(), 0);
        assert_eq!(heap.len(), 1);
        heap.clear();
        assert!(heap.is_empty());
    }
}
