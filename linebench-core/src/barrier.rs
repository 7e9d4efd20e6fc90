//! Spin Latch
//!
//! Start barrier for the two workers. Waiting never enters the kernel, so the
//! release of one worker does not depend on the scheduler waking it.

use std::sync::atomic::{AtomicIsize, Ordering};

/// One-shot rendezvous for a fixed number of arrivals.
///
/// Behaves like `std::sync::Barrier` used once, except that waiters busy-poll
/// the counter. Reusing a latch after it reached zero is not supported.
#[derive(Debug)]
pub struct SpinLatch {
    counter: AtomicIsize,
}

impl SpinLatch {
    /// Create a latch expecting `expected` arrivals
    pub fn new(expected: usize) -> Self {
        Self {
            counter: AtomicIsize::new(expected as isize),
        }
    }

    /// Arrive once and spin until every party has arrived
    #[inline]
    pub fn arrive_and_wait(&self) {
        self.arrive_and_wait_n(1);
    }

    /// Count `n` arrivals and spin until the counter reaches zero.
    ///
    /// Ordering is Relaxed on both the decrement and the poll: the latch only
    /// releases control flow. Callers that publish data across it pair it with
    /// their own fences.
    pub fn arrive_and_wait_n(&self, n: usize) {
        let n = n as isize;
        if self.counter.fetch_sub(n, Ordering::Relaxed) == n {
            return;
        }
        while self.counter.load(Ordering::Relaxed) != 0 {
            std::hint::spin_loop();
        }
    }

    /// Arrivals still outstanding
    pub fn pending(&self) -> isize {
        self.counter.load(Ordering::Relaxed)
    }
}
