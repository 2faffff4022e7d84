use core::{future::poll_fn, task::Poll};

use atomic_waker::AtomicWaker;
use portable_atomic::{AtomicUsize, Ordering};

/// Wakes the RX consumer task, whenever the firmware reports ring activity.
///
/// Notifications are counted, but a single wait consumes all of them, since the consumer drains
/// every ready slot before blocking again.
pub struct RxReadySignal {
    waker: AtomicWaker,
    pending: AtomicUsize,
}
impl RxReadySignal {
    pub const fn new() -> Self {
        Self {
            waker: AtomicWaker::new(),
            pending: AtomicUsize::new(0),
        }
    }
    /// Record one notification and wake the consumer.
    ///
    /// This is safe to call from interrupt context.
    pub fn notify(&self) {
        self.pending.fetch_add(1, Ordering::Release);
        self.waker.wake();
    }
    /// Drop all pending notifications.
    pub fn reset(&self) {
        self.pending.store(0, Ordering::Relaxed);
    }
    /// The amount of notifications, that haven't been consumed yet.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }
    /// Asynchronously wait for at least one notification.
    ///
    /// Returns the number of notifications, that were coalesced into this wake up.
    pub async fn wait(&self) -> usize {
        poll_fn(|cx| {
            let pending = self.pending.swap(0, Ordering::Acquire);
            if pending != 0 {
                return Poll::Ready(pending);
            }
            self.waker.register(cx.waker());
            // A notification may have raced the registration.
            match self.pending.swap(0, Ordering::Acquire) {
                0 => Poll::Pending,
                pending => Poll::Ready(pending),
            }
        })
        .await
    }
}
impl Default for RxReadySignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::RxReadySignal;
    use embassy_futures::block_on;

    #[test]
    fn notifications_are_coalesced() {
        let signal = RxReadySignal::new();
        signal.notify();
        signal.notify();
        signal.notify();
        assert_eq!(signal.pending(), 3);
        assert_eq!(block_on(signal.wait()), 3);
        assert_eq!(signal.pending(), 0);
    }

    #[test]
    fn reset_discards_pending() {
        let signal = RxReadySignal::new();
        signal.notify();
        signal.reset();
        assert_eq!(signal.pending(), 0);
        signal.notify();
        assert_eq!(block_on(signal.wait()), 1);
    }
}
