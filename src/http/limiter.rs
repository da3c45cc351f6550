use std::sync::atomic::{AtomicU64, Ordering};

use crate::shutdown::ShutdownSignal;

/// Atomic gate for the total request cap. A cap of 0 means unlimited.
#[derive(Debug)]
pub struct RequestLimiter {
    limit: u64,
    counter: AtomicU64,
}

impl RequestLimiter {
    #[must_use]
    pub const fn new(limit: u64) -> Self {
        Self {
            limit,
            counter: AtomicU64::new(0),
        }
    }

    /// Reserve one request slot and return its zero-based sequence number.
    ///
    /// Taking the last slot, or finding none left, fires `stop` so sibling
    /// workers do not start new requests.
    pub fn try_reserve(&self, stop: &ShutdownSignal) -> Option<u64> {
        if self.limit == 0 {
            return Some(self.counter.fetch_add(1, Ordering::Relaxed));
        }
        loop {
            let current = self.counter.load(Ordering::Relaxed);
            if current >= self.limit {
                stop.trigger();
                return None;
            }
            let Some(next) = current.checked_add(1) else {
                stop.trigger();
                return None;
            };
            if self
                .counter
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                if next == self.limit {
                    stop.trigger();
                }
                return Some(current);
            }
        }
    }

    /// Requests reserved so far.
    #[must_use]
    pub fn issued(&self) -> u64 {
        self.counter.load(Ordering::Acquire)
    }

    #[must_use]
    pub const fn limit(&self) -> u64 {
        self.limit
    }
}
