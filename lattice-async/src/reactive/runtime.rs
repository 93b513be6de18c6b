//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects signals to the
//! computations that read them. It owns the dependency graph and re-schedules
//! computations when a signal changes.
//!
//! # How It Works
//!
//! 1. A computation registers with the runtime and receives a
//!    [`ReactiveHandle`]; dropping the handle unregisters it.
//!
//! 2. When the computation reads a signal inside its [`ReactiveContext`],
//!    the signal records the dependency here.
//!
//! 3. When a signal's value changes, the runtime looks up every registered
//!    dependent and calls [`Reactive::schedule`] on it, in the order the
//!    dependencies were first recorded.
//!
//! # Thread Safety
//!
//! The registry lives in process-wide concurrent maps. No map guard is held
//! while a computation is scheduled, so a scheduled computation is free to
//! read and write signals (and re-enter the runtime) from inside its run.

use std::sync::{Arc, OnceLock, Weak};

use dashmap::DashMap;
use indexmap::IndexSet;
use smallvec::SmallVec;

use super::context::ReactiveContext;
use super::subscriber::SubscriberId;

/// A computation the runtime can re-run when its dependencies change.
pub trait Reactive: Send + Sync {
    /// Get the subscriber ID for this computation.
    fn subscriber_id(&self) -> SubscriberId;

    /// A dependency changed; run again.
    fn schedule(&self);
}

/// Handle to a registered reactive computation.
///
/// Dropping this handle unregisters the computation from the runtime.
#[derive(Debug)]
pub struct ReactiveHandle {
    subscriber_id: SubscriberId,
}

impl ReactiveHandle {
    /// The subscriber this handle keeps registered.
    pub fn subscriber_id(&self) -> SubscriberId {
        self.subscriber_id
    }
}

impl Drop for ReactiveHandle {
    fn drop(&mut self) {
        Runtime::unregister(self.subscriber_id);
    }
}

/// The global reactive runtime.
pub struct Runtime;

// Weak references so the registry never keeps a computation alive.
static REGISTRY: OnceLock<DashMap<SubscriberId, Weak<dyn Reactive>>> = OnceLock::new();
static SIGNAL_SUBSCRIBERS: OnceLock<DashMap<u64, IndexSet<SubscriberId>>> = OnceLock::new();
static SUBSCRIBER_SIGNALS: OnceLock<DashMap<SubscriberId, SmallVec<[u64; 4]>>> = OnceLock::new();

fn registry() -> &'static DashMap<SubscriberId, Weak<dyn Reactive>> {
    REGISTRY.get_or_init(DashMap::new)
}

fn signal_subscribers() -> &'static DashMap<u64, IndexSet<SubscriberId>> {
    SIGNAL_SUBSCRIBERS.get_or_init(DashMap::new)
}

fn subscriber_signals() -> &'static DashMap<SubscriberId, SmallVec<[u64; 4]>> {
    SUBSCRIBER_SIGNALS.get_or_init(DashMap::new)
}

impl Runtime {
    /// Register a reactive computation with the runtime.
    ///
    /// Returns a handle that unregisters the computation when dropped.
    pub fn register(reactive: Arc<dyn Reactive>) -> ReactiveHandle {
        let id = reactive.subscriber_id();
        registry().insert(id, Arc::downgrade(&reactive));
        ReactiveHandle { subscriber_id: id }
    }

    fn unregister(id: SubscriberId) {
        registry().remove(&id);
        Self::clear_dependencies(id);
    }

    /// Check whether a computation is currently registered.
    pub fn is_registered(id: SubscriberId) -> bool {
        registry().contains_key(&id)
    }

    /// Record that a subscriber depends on a signal.
    ///
    /// Called automatically when a signal is read within a reactive context.
    pub fn add_dependency(signal_id: u64, subscriber_id: SubscriberId) {
        let inserted = signal_subscribers()
            .entry(signal_id)
            .or_default()
            .insert(subscriber_id);

        if inserted {
            subscriber_signals()
                .entry(subscriber_id)
                .or_default()
                .push(signal_id);
        }
    }

    /// Remove all dependencies for a subscriber.
    ///
    /// Called before re-running a computation to clear stale dependencies.
    pub fn clear_dependencies(subscriber_id: SubscriberId) {
        let Some((_, signals)) = subscriber_signals().remove(&subscriber_id) else {
            return;
        };

        for signal_id in signals {
            if let Some(mut subscribers) = signal_subscribers().get_mut(&signal_id) {
                subscribers.shift_remove(&subscriber_id);
            }
        }
    }

    /// Subscribers currently depending on a signal, in registration order.
    pub fn dependents(signal_id: u64) -> Vec<SubscriberId> {
        signal_subscribers()
            .get(&signal_id)
            .map(|subscribers| subscribers.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Signals a subscriber currently depends on.
    pub fn dependencies(subscriber_id: SubscriberId) -> SmallVec<[u64; 4]> {
        subscriber_signals()
            .get(&subscriber_id)
            .map(|signals| signals.value().clone())
            .unwrap_or_default()
    }

    /// Notify all subscribers that a signal changed.
    ///
    /// This is the core update propagation mechanism.
    pub fn notify_signal_change(signal_id: u64) {
        let subscriber_ids = Self::dependents(signal_id);
        if subscriber_ids.is_empty() {
            return;
        }

        // Upgrade everything first so no map guard is held while running.
        let scheduled: Vec<Arc<dyn Reactive>> = subscriber_ids
            .into_iter()
            .filter_map(|id| registry().get(&id).and_then(|weak| weak.upgrade()))
            .collect();

        for reactive in scheduled {
            reactive.schedule();
        }
    }

    /// Get the current subscriber being tracked, if any.
    pub fn current_subscriber() -> Option<SubscriberId> {
        ReactiveContext::current_subscriber()
    }

    /// Check if we're inside a reactive context.
    pub fn is_tracking() -> bool {
        ReactiveContext::is_active()
    }
}
