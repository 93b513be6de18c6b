//! Per-epoch cancellation.
//!
//! Every evaluation receives a fresh [`CancelToken`]. The evaluation (or the
//! producer it starts) can attach cleanup through [`CancelToken::on_cancel`].
//! The token closes exactly once, in one of two ways:
//!
//! - **cancelled**: the epoch was superseded or the cell disposed before it
//!   settled. Every registered callback runs once, in registration order.
//! - **settled**: the epoch produced its result. Callbacks are dropped unrun.
//!
//! Registering on a closed token is a no-op.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;
use tokio::sync::Notify;
use tracing::{trace, warn};

use super::error::panic_message;

/// Identity of one evaluation of a computed cell.
///
/// Epochs of a cell are numbered from 1 and strictly increase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Epoch(u64);

impl Epoch {
    pub(crate) fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Get the raw epoch number.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    Cancelled,
    Settled,
}

type CancelCallback = Box<dyn FnOnce() + Send + 'static>;

struct TokenState {
    phase: Phase,
    callbacks: SmallVec<[CancelCallback; 1]>,
}

struct TokenInner {
    epoch: Epoch,
    state: Mutex<TokenState>,
    notify: Notify,
}

/// Cancellation handle for a single evaluation epoch.
///
/// Cheap to clone; clones observe the same epoch.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

impl CancelToken {
    pub(crate) fn new(epoch: Epoch) -> Self {
        Self {
            inner: Arc::new(TokenInner {
                epoch,
                state: Mutex::new(TokenState {
                    phase: Phase::Open,
                    callbacks: SmallVec::new(),
                }),
                notify: Notify::new(),
            }),
        }
    }

    /// The epoch this token belongs to.
    pub fn epoch(&self) -> Epoch {
        self.inner.epoch
    }

    /// Run `callback` if this epoch is torn down before it settles.
    ///
    /// Callbacks chain: each registered callback runs once, in the order
    /// registered. After the epoch has settled or been cancelled the callback
    /// is dropped without running.
    pub fn on_cancel<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        if state.phase == Phase::Open {
            state.callbacks.push(Box::new(callback));
        } else {
            trace!(epoch = %self.inner.epoch, "cancel callback registered on a closed epoch");
        }
    }

    /// Whether this epoch was torn down before it settled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.state.lock().phase == Phase::Cancelled
    }

    /// Whether this epoch has settled or been cancelled.
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().phase != Phase::Open
    }

    /// Wait until this epoch is cancelled.
    ///
    /// Never completes for an epoch that settles.
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.is_cancelled() {
            return;
        }
        notified.await;
    }

    /// Tear the epoch down. Returns `true` if this call cancelled it.
    pub(crate) fn cancel(&self) -> bool {
        let callbacks = {
            let mut state = self.inner.state.lock();
            if state.phase != Phase::Open {
                return false;
            }
            state.phase = Phase::Cancelled;
            std::mem::take(&mut state.callbacks)
        };

        self.inner.notify.notify_waiters();

        for callback in callbacks {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
                warn!(
                    epoch = %self.inner.epoch,
                    panic = %panic_message(payload.as_ref()),
                    "cancel callback panicked"
                );
            }
        }
        true
    }

    /// Mark the epoch settled. Returns `true` if this call settled it.
    pub(crate) fn settle(&self) -> bool {
        let callbacks = {
            let mut state = self.inner.state.lock();
            if state.phase != Phase::Open {
                return false;
            }
            state.phase = Phase::Settled;
            std::mem::take(&mut state.callbacks)
        };
        // Dropped outside the lock; a callback's captures may be anything.
        drop(callbacks);
        true
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("CancelToken")
            .field("epoch", &self.inner.epoch)
            .field("phase", &state.phase)
            .field("callbacks", &state.callbacks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let clone = count.clone();
        (count, move || {
            clone.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn cancel_runs_callbacks_once() {
        let token = CancelToken::new(Epoch(1));
        let (count, callback) = counter();
        token.on_cancel(callback);

        assert!(token.cancel());
        assert!(!token.cancel());
        assert!(!token.settle());

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(token.is_cancelled());
    }

    #[test]
    fn settle_drops_callbacks_unrun() {
        let token = CancelToken::new(Epoch(1));
        let (count, callback) = counter();
        token.on_cancel(callback);

        assert!(token.settle());
        assert!(!token.cancel());

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(token.is_closed());
        assert!(!token.is_cancelled());
    }

    #[test]
    fn callbacks_chain_in_registration_order() {
        let token = CancelToken::new(Epoch(4));
        let order = Arc::new(Mutex::new(Vec::new()));

        for step in 0..3 {
            let order = order.clone();
            token.on_cancel(move || order.lock().push(step));
        }

        token.cancel();
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn registration_after_close_is_ignored() {
        let token = CancelToken::new(Epoch(1));
        token.settle();

        let (count, callback) = counter();
        token.on_cancel(callback);
        token.cancel();

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_callback_does_not_stop_the_chain() {
        let token = CancelToken::new(Epoch(2));
        let (count, callback) = counter();

        token.on_cancel(|| panic!("cleanup failed"));
        token.on_cancel(callback);

        assert!(token.cancel());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_future_completes_on_cancel() {
        let token = CancelToken::new(Epoch(1));
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };

        tokio::task::yield_now().await;
        token.cancel();
        waiter.await.unwrap();

        // Already cancelled: returns at once
        token.cancelled().await;
    }

    #[test]
    fn epochs_increase() {
        let first = Epoch::default().next();
        let second = first.next();
        assert!(second > first);
        assert_eq!(first.raw(), 1);
        assert_eq!(second.to_string(), "2");
    }
}
