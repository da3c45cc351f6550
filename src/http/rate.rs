use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::task::JoinHandle;
use tokio::time::interval;

use crate::shutdown::ShutdownSignal;

/// Refill period for the token bucket.
const RATE_TICK: Duration = Duration::from_millis(100);
const TICKS_PER_SEC: u64 = 10;

/// Caps dispatch at a fixed number of requests per second.
///
/// Workers take one permit per request; a controller task tops the bucket up
/// every [`RATE_TICK`] until the run stops.
#[derive(Debug)]
pub struct RateGate {
    permits: Arc<Semaphore>,
}

impl RateGate {
    /// Start the refill controller for `rate` requests per second.
    #[must_use]
    pub fn spawn(rate: u64, stop: &ShutdownSignal) -> (Self, JoinHandle<()>) {
        let permits = Arc::new(Semaphore::new(0));
        let controller = spawn_controller(Arc::clone(&permits), RateTokens::new(rate), stop.clone());
        (Self { permits }, controller)
    }

    /// Wait for the next permit. Returns `false` when `stop` fires first.
    pub async fn acquire(&self, stop: &ShutdownSignal) -> bool {
        if stop.is_triggered() {
            return false;
        }
        tokio::select! {
            permit = self.permits.acquire() => permit.map(SemaphorePermit::forget).is_ok(),
            () = stop.triggered() => false,
        }
    }
}

/// Splits a per-second rate across ticks, carrying the remainder so the
/// tokens handed out over one second add up to the rate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RateTokens {
    per_sec: u64,
    remainder: u64,
}

impl RateTokens {
    pub(crate) const fn new(per_sec: u64) -> Self {
        Self {
            per_sec,
            remainder: 0,
        }
    }

    pub(crate) fn next_tokens(&mut self) -> usize {
        let (base, rem) = div_mod_u64(self.per_sec, TICKS_PER_SEC);
        let (carry, new_rem) = div_mod_u64(self.remainder.saturating_add(rem), TICKS_PER_SEC);
        self.remainder = new_rem;
        let tokens = base.saturating_add(carry);
        usize::try_from(tokens).unwrap_or(usize::MAX)
    }
}

fn spawn_controller(
    permits: Arc<Semaphore>,
    mut tokens: RateTokens,
    stop: ShutdownSignal,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut rate_tick = interval(RATE_TICK);
        loop {
            tokio::select! {
                _ = rate_tick.tick() => {
                    let available = permits.available_permits();
                    let target = tokens.next_tokens();
                    if available < target {
                        permits.add_permits(target.saturating_sub(available));
                    }
                }
                () = stop.triggered() => break,
            }
        }
    })
}

fn div_mod_u64(value: u64, divisor: u64) -> (u64, u64) {
    if divisor == 0 {
        return (0, 0);
    }
    let div = value.checked_div(divisor).unwrap_or(0);
    let rem = value.checked_rem(divisor).unwrap_or(0);
    (div, rem)
}
