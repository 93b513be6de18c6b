//! Evaluating indicator.
//!
//! An async computed cell announces whether its current epoch has settled by
//! writing a boolean to an optional external sink: `false` when an epoch
//! starts, `true` once it settles. [`EvaluatingSink`] abstracts over where
//! that boolean goes so the coordinator never cares whether the consumer
//! watches a signal or a channel.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::trace;

use crate::reactive::Signal;

/// A destination for the settled/pending flag.
pub trait EvaluatingSink: Send + Sync {
    /// Publish the flag. `false` means an evaluation is pending.
    fn set_evaluating(&self, settled: bool);
}

impl EvaluatingSink for Signal<bool> {
    fn set_evaluating(&self, settled: bool) {
        self.set(settled);
    }
}

impl EvaluatingSink for broadcast::Sender<bool> {
    fn set_evaluating(&self, settled: bool) {
        if self.send(settled).is_err() {
            trace!(settled, "evaluating flag dropped, no receivers");
        }
    }
}

impl EvaluatingSink for watch::Sender<bool> {
    fn set_evaluating(&self, settled: bool) {
        // Keeps the latest value even with no receivers attached yet.
        self.send_replace(settled);
    }
}

impl<S> EvaluatingSink for Arc<S>
where
    S: EvaluatingSink + ?Sized,
{
    fn set_evaluating(&self, settled: bool) {
        (**self).set_evaluating(settled);
    }
}

/// The coordinator's handle on an optional [`EvaluatingSink`].
#[derive(Clone, Default)]
pub struct Evaluating {
    sink: Option<Arc<dyn EvaluatingSink>>,
}

impl Evaluating {
    /// No sink; every write is skipped.
    pub fn none() -> Self {
        Self::default()
    }

    /// Write to `sink`.
    pub fn new<S>(sink: S) -> Self
    where
        S: EvaluatingSink + 'static,
    {
        Self {
            sink: Some(Arc::new(sink)),
        }
    }

    /// Whether a sink is attached.
    pub fn is_attached(&self) -> bool {
        self.sink.is_some()
    }

    /// Write the flag to the sink, if any.
    pub fn set(&self, settled: bool) {
        if let Some(sink) = &self.sink {
            sink.set_evaluating(settled);
        }
    }
}

impl fmt::Debug for Evaluating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Evaluating")
            .field("attached", &self.is_attached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_sink_is_assigned() {
        let flag = Signal::new(true);
        let evaluating = Evaluating::new(flag.clone());

        evaluating.set(false);
        assert!(!flag.get());

        evaluating.set(true);
        assert!(flag.get());
    }

    #[test]
    fn broadcast_sink_pushes_every_value() {
        let (tx, mut rx) = broadcast::channel(8);
        let evaluating = Evaluating::new(tx);

        evaluating.set(false);
        evaluating.set(true);

        assert_eq!(rx.try_recv().unwrap(), false);
        assert_eq!(rx.try_recv().unwrap(), true);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn broadcast_without_receivers_is_ignored() {
        let (tx, rx) = broadcast::channel::<bool>(1);
        drop(rx);
        Evaluating::new(tx).set(true);
    }

    #[test]
    fn watch_sink_keeps_latest() {
        let (tx, rx) = watch::channel(true);
        let evaluating = Evaluating::new(tx);

        evaluating.set(false);
        assert!(!*rx.borrow());
    }

    #[test]
    fn shared_sink_through_arc() {
        let flag = Arc::new(Signal::new(false));
        Evaluating::new(flag.clone()).set(true);
        assert!(flag.get());
    }

    #[test]
    fn missing_sink_is_a_no_op() {
        let evaluating = Evaluating::none();
        assert!(!evaluating.is_attached());
        evaluating.set(true);
    }
}
