//! Logical change-counter with a cancellable wait-for-change primitive.
//!
//! One `Epoch` exists per observable domain (jobs, machines). The
//! allocator bumps it whenever the domain changes; notifier subtasks
//! long-poll it to know when to re-query and push a `*_changed` message.

use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Opaque token returned by [`Epoch::current`]. Comparable only against
/// tokens from the same `Epoch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochToken(u64);

/// A monotonic, many-reader/one-writer-per-bump change counter.
///
/// Built on `tokio::sync::watch`, which always holds the latest value: a
/// bump that lands between `current()` and the start of the wait is still
/// observed because the subscription created inside `wait_for_change`
/// immediately sees the post-bump value, satisfying the edge-triggered
/// guarantee in spec §4.1.
#[derive(Debug, Clone)]
pub struct Epoch {
    tx: watch::Sender<u64>,
}

impl Default for Epoch {
    fn default() -> Self {
        Self::new()
    }
}

impl Epoch {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Epoch { tx }
    }

    /// Sample the counter. The returned token is stable until the next
    /// `bump()`.
    pub fn current(&self) -> EpochToken {
        EpochToken(*self.tx.borrow())
    }

    /// Advance the counter and wake every current waiter.
    pub fn bump(&self) {
        self.tx.send_modify(|v| *v = v.wrapping_add(1));
    }

    /// Wait until the counter advances past `token`, `timeout` elapses, or
    /// `cancel` fires. Returns `true` only in the first case.
    ///
    /// Spurious wakeups from the underlying channel are retried internally
    /// and never observed by the caller.
    pub async fn wait_for_change(
        &self,
        token: EpochToken,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> bool {
        let mut rx = self.tx.subscribe();
        if *rx.borrow() != token.0 {
            return true;
        }
        let wait = async {
            loop {
                if rx.changed().await.is_err() {
                    return false;
                }
                if *rx.borrow() != token.0 {
                    return true;
                }
            }
        };
        tokio::select! {
            biased;
            () = cancel.cancelled() => false,
            changed = tokio::time::timeout(timeout, wait) => changed.unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_for_change_returns_true_immediately_on_bump_race() {
        let epoch = Arc::new(Epoch::new());
        let token = epoch.current();
        // Bump before the wait starts: this must still be observed.
        epoch.bump();
        let cancel = CancellationToken::new();
        let changed = epoch
            .wait_for_change(token, Duration::from_secs(5), &cancel)
            .await;
        assert!(changed);
    }

    #[tokio::test]
    async fn wait_for_change_times_out_without_bump() {
        let epoch = Epoch::new();
        let token = epoch.current();
        let cancel = CancellationToken::new();
        let changed = epoch
            .wait_for_change(token, Duration::from_millis(20), &cancel)
            .await;
        assert!(!changed);
    }

    #[tokio::test]
    async fn wait_for_change_honours_cancellation() {
        let epoch = Epoch::new();
        let token = epoch.current();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let changed = epoch
            .wait_for_change(token, Duration::from_secs(5), &cancel)
            .await;
        assert!(!changed);
    }

    #[tokio::test]
    async fn bump_wakes_concurrent_waiter() {
        let epoch = Arc::new(Epoch::new());
        let token = epoch.current();
        let cancel = CancellationToken::new();
        let epoch2 = epoch.clone();
        let waiter = tokio::spawn(async move {
            epoch2
                .wait_for_change(token, Duration::from_secs(5), &CancellationToken::new())
                .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        epoch.bump();
        let changed = waiter.await.unwrap();
        assert!(changed);
        let _ = cancel;
    }
}
