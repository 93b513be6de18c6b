//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a reactive context (an effect or an async
//!    computed cell's evaluation), the signal registers that context as a
//!    dependent with the [`Runtime`].
//!
//! 2. When a signal's value changes, local listeners are called and the
//!    runtime re-schedules every dependent computation.
//!
//! A [`ReadSignal`] is a read-only view over the same cell. It is what an
//! async computed value hands to its consumers: they may read and listen, but
//! only the owner writes.
//!
//! # Thread Safety
//!
//! The value sits behind a `parking_lot::RwLock`. Listeners are invoked after
//! the value lock is released, so a listener may read the signal it is
//! attached to.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::context::ReactiveContext;
use super::runtime::Runtime;
use super::SubscriberId;

/// Counter for generating unique signal IDs.
static SIGNAL_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_signal_id() -> u64 {
    SIGNAL_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

type Listener = Arc<dyn Fn() + Send + Sync>;

/// A reactive signal holding a value of type T.
///
/// # Example
///
/// ```rust
/// use lattice_async::reactive::Signal;
///
/// let count = Signal::new(0);
/// count.set(5);
/// assert_eq!(count.get(), 5);
/// ```
pub struct Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    id: u64,
    value: Arc<RwLock<T>>,
    /// Local change listeners, in subscription order.
    listeners: Arc<RwLock<Vec<(SubscriberId, Listener)>>>,
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new signal with the given initial value.
    pub fn new(value: T) -> Self {
        Self {
            id: next_signal_id(),
            value: Arc::new(RwLock::new(value)),
            listeners: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Get the current value.
    ///
    /// If called within a reactive context, this also registers the
    /// current computation as a dependent.
    pub fn get(&self) -> T {
        if let Some(subscriber_id) = ReactiveContext::current_subscriber() {
            ReactiveContext::track_dependency(self.id);
            Runtime::add_dependency(self.id, subscriber_id);
        }

        self.get_untracked()
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.value.read().clone()
    }

    /// Read the current value through a closure without cloning it.
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.value.read())
    }

    /// Set a new value and notify dependents.
    pub fn set(&self, value: T) {
        *self.value.write() = value;
        self.notify();
    }

    /// Update the value using a function of the current one.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let new_value = {
            let guard = self.value.read();
            f(&guard)
        };
        self.set(new_value);
    }

    /// Register a listener called after every write.
    pub fn subscribe<F>(&self, subscriber_id: SubscriberId, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.listeners
            .write()
            .push((subscriber_id, Arc::new(listener)));
    }

    /// Remove a listener.
    pub fn unsubscribe(&self, subscriber_id: SubscriberId) {
        self.listeners.write().retain(|(id, _)| *id != subscriber_id);
    }

    /// Number of local listeners plus runtime dependents.
    pub fn subscriber_count(&self) -> usize {
        self.listeners.read().len() + Runtime::dependents(self.id).len()
    }

    /// A read-only view of this signal.
    pub fn read_only(&self) -> ReadSignal<T> {
        ReadSignal {
            inner: self.clone(),
        }
    }

    fn notify(&self) {
        // Snapshot so listeners can subscribe or unsubscribe while running.
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            listener();
        }

        Runtime::notify_signal_change(self.id);
    }
}

impl<T> Clone for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            value: Arc::clone(&self.value),
            listeners: Arc::clone(&self.listeners),
        }
    }
}

impl<T> Debug for Signal<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id)
            .field("value", &self.get_untracked())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

/// Read-only handle to a [`Signal`].
pub struct ReadSignal<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Signal<T>,
}

impl<T> ReadSignal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Get the underlying signal's ID.
    pub fn id(&self) -> u64 {
        self.inner.id()
    }

    /// Get the current value, tracking the read.
    pub fn get(&self) -> T {
        self.inner.get()
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.inner.get_untracked()
    }

    /// Read the current value through a closure without cloning it.
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.with_untracked(f)
    }

    /// Register a listener called after every write.
    pub fn subscribe<F>(&self, subscriber_id: SubscriberId, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.subscribe(subscriber_id, listener);
    }

    /// Remove a listener.
    pub fn unsubscribe(&self, subscriber_id: SubscriberId) {
        self.inner.unsubscribe(subscriber_id);
    }
}

impl<T> Clone for ReadSignal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> From<Signal<T>> for ReadSignal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn from(inner: Signal<T>) -> Self {
        Self { inner }
    }
}

impl<T> Debug for ReadSignal<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ReadSignal").field(&self.inner).finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
