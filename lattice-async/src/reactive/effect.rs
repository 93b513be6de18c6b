//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created with [`Effect::new`], the effect runs its function
//!    immediately to establish initial dependencies.
//!
//! 2. The effect is registered with the [`Runtime`]; when any dependency
//!    changes, the runtime schedules it and it re-runs synchronously.
//!
//! 3. Before re-running, the effect clears its old dependencies and tracks
//!    new ones during execution.
//!
//! # Re-entrancy
//!
//! A run can itself cause a dependency to change, and another thread can
//! trigger the effect while it is running. Such triggers are never nested and
//! never lost: they are folded into a single follow-up run that starts as soon
//! as the current one returns.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::trace;

use super::context::ReactiveContext;
use super::runtime::{Reactive, ReactiveHandle, Runtime};
use super::subscriber::SubscriberId;

struct EffectInner {
    subscriber_id: SubscriberId,
    run: Box<dyn Fn() + Send + Sync>,
    dependencies: Mutex<SmallVec<[u64; 8]>>,
    disposed: AtomicBool,
    running: AtomicBool,
    pending: AtomicBool,
    run_count: AtomicUsize,
}

impl EffectInner {
    fn execute(&self) {
        loop {
            if self.is_disposed() {
                return;
            }

            if self
                .running
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                trace!(subscriber = %self.subscriber_id, "effect busy, deferring re-run");
                self.pending.store(true, Ordering::Release);
                return;
            }

            loop {
                self.pending.store(false, Ordering::Release);
                self.run_once();
                if !self.pending.load(Ordering::Acquire) || self.is_disposed() {
                    break;
                }
            }

            self.running.store(false, Ordering::Release);

            // A trigger may have landed between the last check and the release.
            if !self.pending.swap(false, Ordering::AcqRel) {
                return;
            }
        }
    }

    fn run_once(&self) {
        Runtime::clear_dependencies(self.subscriber_id);

        let _ctx = ReactiveContext::enter(self.subscriber_id);
        (self.run)();

        *self.dependencies.lock() = ReactiveContext::get_dependencies();
        self.run_count.fetch_add(1, Ordering::Relaxed);
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl Reactive for EffectInner {
    fn subscriber_id(&self) -> SubscriberId {
        self.subscriber_id
    }

    fn schedule(&self) {
        self.execute();
    }
}

/// A side-effecting computation that runs when dependencies change.
///
/// # Example
///
/// ```rust
/// use lattice_async::reactive::{Effect, Signal};
///
/// let count = Signal::new(0);
/// let reader = count.clone();
/// let effect = Effect::new(move || {
///     let _ = reader.get();
/// });
///
/// count.set(5); // the effect re-runs
/// assert_eq!(effect.run_count(), 2);
/// ```
#[derive(Clone)]
pub struct Effect {
    inner: Arc<EffectInner>,
    _handle: Arc<ReactiveHandle>,
}

impl Effect {
    /// Create a new effect and run it immediately.
    pub fn new<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let effect = Self::new_lazy(run);
        effect.execute();
        effect
    }

    /// Create a new effect without running it.
    ///
    /// It has no dependencies until the first [`execute`](Self::execute).
    pub fn new_lazy<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let inner = Arc::new(EffectInner {
            subscriber_id: SubscriberId::new(),
            run: Box::new(run),
            dependencies: Mutex::new(SmallVec::new()),
            disposed: AtomicBool::new(false),
            running: AtomicBool::new(false),
            pending: AtomicBool::new(false),
            run_count: AtomicUsize::new(0),
        });
        let handle = Runtime::register(inner.clone());

        Self {
            inner,
            _handle: Arc::new(handle),
        }
    }

    /// Get the subscriber ID for this effect.
    pub fn subscriber_id(&self) -> SubscriberId {
        self.inner.subscriber_id
    }

    /// Run the effect function, tracking its dependencies.
    pub fn execute(&self) {
        self.inner.execute();
    }

    /// Schedule the effect to re-run.
    pub fn schedule(&self) {
        self.inner.schedule();
    }

    /// Dispose of the effect.
    ///
    /// After disposal, the effect will not run again and holds no dependencies.
    pub fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::Release);
        Runtime::clear_dependencies(self.inner.subscriber_id);
        self.inner.dependencies.lock().clear();
    }

    /// Check if the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.load(Ordering::Relaxed)
    }

    /// Signal IDs read during the last run.
    pub fn dependencies(&self) -> SmallVec<[u64; 8]> {
        self.inner.dependencies.lock().clone()
    }

    /// Get the number of dependencies.
    pub fn dependency_count(&self) -> usize {
        self.inner.dependencies.lock().len()
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("subscriber_id", &self.subscriber_id())
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Signal;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn effect_runs_on_creation() {
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();

        let _effect = Effect::new(move || {
            run_count_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(run_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn effect_lazy_does_not_run_on_creation() {
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();

        let effect = Effect::new_lazy(move || {
            run_count_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(run_count.load(Ordering::SeqCst), 0);
        assert_eq!(effect.run_count(), 0);

        effect.execute();
        assert_eq!(run_count.load(Ordering::SeqCst), 1);
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn effect_reruns_when_dependency_changes() {
        let signal = Signal::new(0);
        let observed = Arc::new(AtomicI32::new(-1));

        let (reader, observed_clone) = (signal.clone(), observed.clone());
        let effect = Effect::new(move || {
            observed_clone.store(reader.get(), Ordering::SeqCst);
        });

        assert_eq!(observed.load(Ordering::SeqCst), 0);
        assert_eq!(effect.dependencies().as_slice(), &[signal.id()]);

        signal.set(42);
        assert_eq!(observed.load(Ordering::SeqCst), 42);
        assert_eq!(effect.run_count(), 2);
    }

    #[test]
    fn effect_drops_stale_dependencies() {
        let use_first = Signal::new(true);
        let first = Signal::new(1);
        let second = Signal::new(2);

        let (switch, a, b) = (use_first.clone(), first.clone(), second.clone());
        let effect = Effect::new(move || {
            if switch.get() {
                a.get();
            } else {
                b.get();
            }
        });

        use_first.set(false);
        assert_eq!(effect.run_count(), 2);

        // No longer read, so no re-run
        first.set(10);
        assert_eq!(effect.run_count(), 2);

        second.set(20);
        assert_eq!(effect.run_count(), 3);
    }

    #[test]
    fn reentrant_trigger_runs_once_after_current_run() {
        let signal = Signal::new(0);
        let max_depth = Arc::new(AtomicI32::new(0));
        let depth = Arc::new(AtomicI32::new(0));

        let (writer, depth_clone, max_clone) = (signal.clone(), depth.clone(), max_depth.clone());
        let effect = Effect::new(move || {
            let now = depth_clone.fetch_add(1, Ordering::SeqCst) + 1;
            max_clone.fetch_max(now, Ordering::SeqCst);

            // Bump the value the effect depends on, up to 3
            let value = writer.get();
            if value < 3 {
                writer.set(value + 1);
            }

            depth_clone.fetch_sub(1, Ordering::SeqCst);
        });

        assert_eq!(signal.get_untracked(), 3);
        assert_eq!(max_depth.load(Ordering::SeqCst), 1);
        assert_eq!(effect.run_count(), 4);
    }

    #[test]
    fn effect_does_not_run_after_disposal() {
        let signal = Signal::new(0);
        let run_count = Arc::new(AtomicI32::new(0));

        let (reader, run_count_clone) = (signal.clone(), run_count.clone());
        let effect = Effect::new(move || {
            reader.get();
            run_count_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(run_count.load(Ordering::SeqCst), 1);

        effect.dispose();
        assert!(effect.is_disposed());
        assert_eq!(effect.dependency_count(), 0);

        signal.set(1);
        effect.schedule();
        effect.execute();
        assert_eq!(run_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_effect_unregisters_it() {
        let effect = Effect::new(|| {});
        let id = effect.subscriber_id();
        let clone = effect.clone();

        drop(effect);
        assert!(Runtime::is_registered(id));

        drop(clone);
        assert!(!Runtime::is_registered(id));
    }

    #[test]
    fn effect_clone_shares_state() {
        let effect1 = Effect::new(|| {});
        let effect2 = effect1.clone();

        assert_eq!(effect1.subscriber_id(), effect2.subscriber_id());

        effect1.execute();
        assert_eq!(effect1.run_count(), 2);
        assert_eq!(effect2.run_count(), 2);

        effect1.dispose();
        assert!(effect2.is_disposed());
    }
}
