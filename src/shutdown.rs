//! Cooperative cancellation shared by workers, the sampler, and run drivers.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;

/// Broadcast channel size for shutdown notifications (single signal fan-out).
const SHUTDOWN_CHANNEL_CAPACITY: usize = 1;

/// A one-shot stop signal.
///
/// Workers poll [`ShutdownSignal::is_triggered`] between dispatches; tasks that
/// sleep (timers, the sampler) await [`ShutdownSignal::triggered`]. Once
/// triggered the signal stays triggered.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    inner: Arc<SignalInner>,
}

#[derive(Debug)]
struct SignalInner {
    fired: AtomicBool,
    tx: broadcast::Sender<()>,
}

impl ShutdownSignal {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel::<()>(SHUTDOWN_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(SignalInner {
                fired: AtomicBool::new(false),
                tx,
            }),
        }
    }

    /// Fire the signal. Returns `true` for the call that actually fired it.
    pub fn trigger(&self) -> bool {
        let first = !self.inner.fired.swap(true, Ordering::AcqRel);
        if first {
            // No receivers is fine: late subscribers see the flag.
            drop(self.inner.tx.send(()));
        }
        first
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.inner.fired.load(Ordering::Acquire)
    }

    /// Resolves once the signal has fired.
    pub async fn triggered(&self) {
        let mut rx = self.inner.tx.subscribe();
        if self.is_triggered() {
            return;
        }
        // Closed or lagged both mean the sender fired or went away.
        drop(rx.recv().await);
    }

    /// Forward this signal into `child` until either one fires.
    pub fn forward_to(&self, child: &ShutdownSignal) -> tokio::task::JoinHandle<()> {
        let parent = self.clone();
        let child = child.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = parent.triggered() => {
                    child.trigger();
                }
                () = child.triggered() => {}
            }
        })
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::time::Duration;

    const WAIT_TIMEOUT: Duration = Duration::from_secs(1);

    fn run_async_test<F>(future: F) -> Result<(), String>
    where
        F: Future<Output = Result<(), String>>,
    {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| format!("Failed to build runtime: {}", err))?;
        runtime.block_on(future)
    }

    #[test]
    fn trigger_fires_once() -> Result<(), String> {
        let signal = ShutdownSignal::new();
        if signal.is_triggered() {
            return Err("Signal should start untriggered".to_owned());
        }
        if !signal.trigger() {
            return Err("First trigger should report firing".to_owned());
        }
        if signal.trigger() {
            return Err("Second trigger should be a no-op".to_owned());
        }
        if !signal.clone().is_triggered() {
            return Err("Clones share state".to_owned());
        }
        Ok(())
    }

    #[test]
    fn late_waiter_resolves_immediately() -> Result<(), String> {
        run_async_test(async {
            let signal = ShutdownSignal::new();
            signal.trigger();
            tokio::time::timeout(WAIT_TIMEOUT, signal.triggered())
                .await
                .map_err(|err| format!("Waiter did not resolve: {}", err))
        })
    }

    #[test]
    fn forward_propagates_parent_to_child() -> Result<(), String> {
        run_async_test(async {
            let parent = ShutdownSignal::new();
            let child = ShutdownSignal::new();
            let handle = parent.forward_to(&child);
            parent.trigger();
            tokio::time::timeout(WAIT_TIMEOUT, child.triggered())
                .await
                .map_err(|err| format!("Child was not triggered: {}", err))?;
            handle
                .await
                .map_err(|err| format!("Forward task join error: {}", err))?;
            Ok(())
        })
    }

    #[test]
    fn forward_does_not_propagate_child_to_parent() -> Result<(), String> {
        run_async_test(async {
            let parent = ShutdownSignal::new();
            let child = ShutdownSignal::new();
            let handle = parent.forward_to(&child);
            child.trigger();
            handle
                .await
                .map_err(|err| format!("Forward task join error: {}", err))?;
            if parent.is_triggered() {
                return Err("Parent must stay untriggered".to_owned());
            }
            Ok(())
        })
    }
}
