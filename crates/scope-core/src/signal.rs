//! Cooperative stop signal shared between a long-running task and its owner.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Cloneable stop flag with an async wake-up.
///
/// Tasks check [`StopSignal::is_stopped`] at their safe points and use
/// [`StopSignal::sleep`] for waits that should end early on a stop request.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    stopped: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    /// New, not-yet-stopped signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop. Idempotent.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Whether a stop was requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` unless a stop arrives first.
    ///
    /// Returns `true` if the full duration elapsed, `false` if interrupted.
    pub async fn sleep(&self, duration: Duration) -> bool {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register interest before checking the flag so a concurrent stop is not missed.
        notified.as_mut().enable();
        if self.is_stopped() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = notified => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn sleep_runs_to_completion_without_stop() {
        let signal = StopSignal::new();
        assert!(signal.sleep(Duration::from_secs(5)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_interrupts_sleep() {
        let signal = StopSignal::new();
        let waiter = signal.clone();
        let handle = tokio::spawn(async move { waiter.sleep(Duration::from_secs(3600)).await });
        tokio::task::yield_now().await;
        signal.stop();
        assert!(!handle.await.unwrap());
        assert!(signal.is_stopped());
    }

    #[tokio::test]
    async fn sleep_after_stop_returns_immediately() {
        let signal = StopSignal::new();
        signal.stop();
        assert!(!signal.sleep(Duration::from_secs(3600)).await);
    }
}
