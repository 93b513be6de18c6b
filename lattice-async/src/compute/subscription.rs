//! Subscription handles.
//!
//! A [`Subscription`] owns an epoch's in-flight future or stream. The driver
//! task polls it through the handle; the coordinator can [`release`] it from
//! any thread, which drops the source synchronously and wakes the driver so
//! it exits.
//!
//! The slot is never locked while the source is polled. A source that writes
//! a signal from inside its own poll may start the next epoch on the driver
//! thread, and that epoch releases this very subscription. In that case the
//! source is dropped as soon as its poll returns and the result is discarded.
//!
//! [`release`]: Subscription::release

use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::task::AtomicWaker;
use parking_lot::Mutex;

struct Slot<S> {
    source: Option<S>,
    released: bool,
}

struct Shared<S> {
    slot: Mutex<Slot<S>>,
    waker: AtomicWaker,
}

pub(crate) struct Subscription<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Subscription<S> {
    pub(crate) fn new(source: S) -> Self {
        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot {
                    source: Some(source),
                    released: false,
                }),
                waker: AtomicWaker::new(),
            }),
        }
    }

    /// Poll the source. `Ready(None)` once released, including when the
    /// release happened during this poll.
    pub(crate) fn poll_with<R>(
        &self,
        cx: &mut Context<'_>,
        poll: impl FnOnce(&mut S, &mut Context<'_>) -> Poll<R>,
    ) -> Poll<Option<R>> {
        self.shared.waker.register(cx.waker());

        let Some(mut source) = self.shared.slot.lock().source.take() else {
            return Poll::Ready(None);
        };

        let outcome = poll(&mut source, cx);

        let mut slot = self.shared.slot.lock();
        if slot.released {
            drop(slot);
            drop(source);
            return Poll::Ready(None);
        }
        slot.source = Some(source);
        outcome.map(Some)
    }

    /// Drop the source. Returns `true` if it was still live.
    ///
    /// Called from inside the source's own poll, the drop is deferred until
    /// that poll returns.
    pub(crate) fn release(&self) -> bool {
        let (was_live, source) = {
            let mut slot = self.shared.slot.lock();
            let was_live = !slot.released;
            slot.released = true;
            (was_live, slot.source.take())
        };
        drop(source);

        self.shared.waker.wake();
        was_live
    }

    pub(crate) fn is_live(&self) -> bool {
        !self.shared.slot.lock().released
    }
}

impl<S> Clone for Subscription<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::poll_fn;
    use futures_util::{stream, StreamExt};

    #[tokio::test]
    async fn polls_until_released() {
        let subscription = Subscription::new(stream::iter([1, 2, 3]));

        let first = poll_fn(|cx| subscription.poll_with(cx, |s, cx| s.poll_next_unpin(cx))).await;
        assert_eq!(first, Some(Some(1)));

        assert!(subscription.release());
        assert!(!subscription.is_live());
        assert!(!subscription.release());

        let after = poll_fn(|cx| subscription.poll_with(cx, |s, cx| s.poll_next_unpin(cx))).await;
        assert_eq!(after, None);
    }

    #[tokio::test]
    async fn release_wakes_a_pending_driver() {
        let subscription = Subscription::new(stream::pending::<i32>());

        let driver = {
            let subscription = subscription.clone();
            tokio::spawn(async move {
                poll_fn(|cx| subscription.poll_with(cx, |s, cx| s.poll_next_unpin(cx))).await
            })
        };

        tokio::task::yield_now().await;
        subscription.release();

        assert_eq!(driver.await.unwrap(), None);
    }

    #[test]
    fn release_from_inside_the_poll_discards_the_result() {
        let subscription = Subscription::new(stream::iter([1, 2]));
        let inner = subscription.clone();

        let waker = futures_util::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        let polled = subscription.poll_with(&mut cx, |source, cx| {
            assert!(inner.release());
            source.poll_next_unpin(cx)
        });

        assert_eq!(polled, Poll::Ready(None));
        assert!(!subscription.is_live());
        assert!(!subscription.release());
    }

    #[test]
    fn source_is_dropped_once_released() {
        let marker = Arc::new(());
        let subscription = Subscription::new((Arc::clone(&marker), stream::iter([1])));

        assert_eq!(Arc::strong_count(&marker), 2);
        subscription.release();
        assert_eq!(Arc::strong_count(&marker), 1);
    }
}
