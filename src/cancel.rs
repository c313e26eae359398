//! In-memory cancellation token, one per account.
//!
//! `stop_account` flips the token synchronously; every loop tick and
//! every sleep observes it. The persistence layer is only for
//! durability across restarts, never a polling oracle for liveness.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;

use crate::consts::CHECK_INTERVAL;

#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// Create a linked handle/token pair. The handle cancels, the token
/// (cheaply cloneable) observes.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

impl CancelHandle {
    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Sleep for `dur`, waking early on cancellation. Returns `true`
    /// if the full duration elapsed, `false` if cancelled.
    ///
    /// Checks cancellation at chunk boundaries no further than
    /// [`CHECK_INTERVAL`] apart, so a stop is observed within 10s even
    /// if the watch channel is somehow missed.
    pub async fn sleep(&self, dur: Duration) -> bool {
        let mut rx = self.rx.clone();
        let mut remaining = dur;
        loop {
            if *rx.borrow() {
                return false;
            }
            if remaining.is_zero() {
                return true;
            }
            let chunk = remaining.min(CHECK_INTERVAL);
            tokio::select! {
                _ = sleep(chunk) => {
                    remaining = remaining.saturating_sub(chunk);
                }
                changed = rx.changed() => {
                    if changed.is_err() || *rx.borrow() {
                        return false;
                    }
                }
            }
        }
    }

    /// A token that can never be cancelled. Handy for tests.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        // Leak the sender so the channel stays open.
        std::mem::forget(tx);
        Self { rx }
    }
}
