//! Async computed values.
//!
//! A [`ComputedAsync`] is a reactive cell whose evaluation function may answer
//! with a plain value, a future, or a stream. Consumers read it like any other
//! signal; it never blocks and always has a value (the initial one until
//! something settles).
//!
//! # Epochs
//!
//! The cell is driven by an [`Effect`]. Every time a signal read by the
//! evaluation function changes (and once at creation) a new *epoch* starts:
//!
//! 1. The previous epoch's subscription is released. A live stream or an
//!    unresolved future is dropped right here, synchronously, so at most one
//!    source per cell is ever live.
//! 2. If the previous epoch had not settled, its [`CancelToken`] is
//!    cancelled and its callbacks run.
//! 3. The evaluating flag is set to `false`.
//! 4. The evaluation function runs with the new token. Errors and panics are
//!    caught here.
//! 5. The result is classified once. An immediate value is written and the
//!    epoch settles before `run_epoch` returns. A future or stream is handed
//!    to a driver task on the tokio runtime.
//! 6. On settlement the flag is set to `true` and the token closes, so a
//!    later teardown runs no callbacks.
//!
//! Every write checks the epoch that produced it against the current one
//! while holding the cell's publish lock, and epoch transitions take the same
//! lock. A superseded epoch therefore never writes after its successor
//! started. [`OverlapPolicy::CompletionOrder`] relaxes this for deferred
//! values only.
//!
//! # Errors
//!
//! Failures never propagate into the reactive runtime. The epoch settles,
//! the value is left as it was, the error is logged and kept for
//! [`ComputedAsync::last_error`].

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use futures_util::future::{poll_fn, BoxFuture};
use futures_util::stream::BoxStream;
use futures_util::{FutureExt, StreamExt};
use parking_lot::{Mutex, ReentrantMutex};
use smallvec::SmallVec;
use tokio::runtime::Handle;
use tracing::{debug, error, trace};

use super::cancel::{CancelToken, Epoch};
use super::error::{panic_message, BoxError, ComputeError};
use super::evaluating::Evaluating;
use super::evaluation::{Evaluation, EvaluationKind};
use super::options::{ComputeConfig, ComputedAsyncOptions, OverlapPolicy, StreamSettlement};
use super::subscription::Subscription;
use crate::reactive::{untracked, Effect, ReadSignal, Signal};

type EvaluateFn<T> = dyn Fn(&CancelToken) -> Result<Evaluation<T>, BoxError> + Send + Sync;
type DeferredSource<T> = Subscription<BoxFuture<'static, Result<T, BoxError>>>;
type StreamSource<T> = Subscription<BoxStream<'static, Result<T, BoxError>>>;

/// The in-flight source of the current epoch.
enum Source<T> {
    Deferred(DeferredSource<T>),
    Stream(StreamSource<T>),
}

impl<T> Source<T> {
    fn release(&self) -> bool {
        match self {
            Self::Deferred(subscription) => subscription.release(),
            Self::Stream(subscription) => subscription.release(),
        }
    }
}

struct EpochState<T> {
    epoch: Epoch,
    token: Option<CancelToken>,
    settled: bool,
    source: Option<Source<T>>,
    /// Superseded futures kept running under `CompletionOrder`.
    detached: SmallVec<[DeferredSource<T>; 2]>,
    last_error: Option<Arc<ComputeError>>,
}

struct Coordinator<T>
where
    T: Clone + Send + Sync + 'static,
{
    evaluate: Box<EvaluateFn<T>>,
    value: Signal<Option<T>>,
    evaluating: Evaluating,
    config: ComputeConfig,
    runtime: Option<Handle>,
    /// Held for epoch transitions and for every write to `value`/`evaluating`.
    /// Re-entrant: a write may synchronously trigger the next epoch.
    publish: ReentrantMutex<()>,
    state: Mutex<EpochState<T>>,
    disposed: AtomicBool,
    effect: Effect,
}

impl<T> Coordinator<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn run_epoch(self: &Arc<Self>) {
        let Some((epoch, token)) = self.begin_epoch() else {
            return;
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (self.evaluate)(&token)));
        let evaluation = match outcome {
            Ok(Ok(evaluation)) => evaluation,
            Ok(Err(err)) => return self.fail(epoch, ComputeError::Evaluation(err)),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                return self.fail(epoch, ComputeError::Panicked(message));
            }
        };

        let kind = evaluation.kind();
        trace!(%epoch, %kind, "evaluation returned");

        match evaluation {
            Evaluation::Immediate(value) => {
                self.publish(epoch, kind, value);
            }
            Evaluation::Deferred(future) => self.drive_deferred(epoch, future),
            Evaluation::Stream(stream) => self.drive_stream(epoch, stream),
        }
    }

    /// Tear down the current epoch and open the next one.
    fn begin_epoch(&self) -> Option<(Epoch, CancelToken)> {
        let _publish = self.publish.lock();
        if self.is_disposed() {
            return None;
        }

        let (epoch, token, previous_token, previous_source) = {
            let mut state = self.state.lock();
            let epoch = state.epoch.next();
            let token = CancelToken::new(epoch);

            state.epoch = epoch;
            state.settled = false;
            state.last_error = None;
            state.detached.retain(|subscription| subscription.is_live());

            let previous_token = state.token.replace(token.clone());
            let previous_source = match state.source.take() {
                Some(Source::Deferred(subscription))
                    if self.config.overlap == OverlapPolicy::CompletionOrder =>
                {
                    state.detached.push(subscription);
                    None
                }
                other => other,
            };

            (epoch, token, previous_token, previous_source)
        };

        // Teardown runs user code (drops, cancel callbacks) whose reads must
        // not join this epoch's dependencies.
        untracked(|| {
            if let Some(source) = previous_source {
                if source.release() {
                    trace!(%epoch, "released previous subscription");
                }
            }

            if let Some(previous) = previous_token {
                if previous.cancel() {
                    debug!(epoch = %previous.epoch(), "epoch cancelled before settling");
                }
            }

            self.evaluating.set(false);
        });
        debug!(%epoch, "epoch started");

        Some((epoch, token))
    }

    fn drive_deferred(self: &Arc<Self>, epoch: Epoch, future: BoxFuture<'static, Result<T, BoxError>>) {
        let Some(runtime) = self.spawner() else {
            return self.fail(epoch, ComputeError::NoRuntime { kind: EvaluationKind::Deferred });
        };

        let subscription = Subscription::new(future);
        if !self.attach(epoch, Source::Deferred(subscription.clone())) {
            subscription.release();
            return;
        }

        let coordinator = Arc::downgrade(self);
        runtime.spawn(async move {
            let outcome = poll_fn(|cx| subscription.poll_with(cx, |future, cx| future.poll_unpin(cx))).await;
            // A resolved future must not be polled again.
            subscription.release();

            let Some(outcome) = outcome else {
                trace!(%epoch, "deferred result dropped with its epoch");
                return;
            };
            let Some(coordinator) = coordinator.upgrade() else {
                return;
            };

            match outcome {
                Ok(value) => {
                    coordinator.publish(epoch, EvaluationKind::Deferred, value);
                }
                Err(err) => coordinator.fail(epoch, ComputeError::Rejected(err)),
            }
        });
    }

    fn drive_stream(self: &Arc<Self>, epoch: Epoch, stream: BoxStream<'static, Result<T, BoxError>>) {
        let Some(runtime) = self.spawner() else {
            return self.fail(epoch, ComputeError::NoRuntime { kind: EvaluationKind::Stream });
        };

        let subscription = Subscription::new(stream);
        if !self.attach(epoch, Source::Stream(subscription.clone())) {
            subscription.release();
            return;
        }

        let coordinator = Arc::downgrade(self);
        let settlement = self.config.stream_settlement;
        runtime.spawn(async move {
            let mut latest = None;

            loop {
                let next = poll_fn(|cx| subscription.poll_with(cx, |stream, cx| stream.poll_next_unpin(cx))).await;
                let Some(next) = next else {
                    trace!(%epoch, "stream released");
                    return;
                };
                let Some(coordinator) = coordinator.upgrade() else {
                    subscription.release();
                    return;
                };

                match next {
                    Some(Ok(value)) => match settlement {
                        StreamSettlement::FirstEmission => {
                            if !coordinator.publish(epoch, EvaluationKind::Stream, value) {
                                subscription.release();
                                return;
                            }
                        }
                        StreamSettlement::Completion => latest = Some(value),
                    },
                    Some(Err(err)) => {
                        subscription.release();
                        return coordinator.fail(epoch, ComputeError::Stream(err));
                    }
                    None => {
                        subscription.release();
                        trace!(%epoch, "stream completed");
                        return coordinator.complete_stream(epoch, latest.take());
                    }
                }
            }
        });
    }

    fn spawner(&self) -> Option<Handle> {
        self.runtime.clone().or_else(|| Handle::try_current().ok())
    }

    /// Install the epoch's source unless the epoch is already gone.
    fn attach(&self, epoch: Epoch, source: Source<T>) -> bool {
        let mut state = self.state.lock();
        if self.is_disposed() || state.epoch != epoch {
            return false;
        }
        state.source = Some(source);
        true
    }

    /// Write a result produced by `epoch` and settle it if it is current.
    ///
    /// Returns `false` if the result was discarded.
    fn publish(&self, epoch: Epoch, kind: EvaluationKind, value: T) -> bool {
        let _publish = self.publish.lock();
        if self.is_disposed() {
            return false;
        }

        let current = self.state.lock().epoch == epoch;
        if !current {
            let late_write = kind == EvaluationKind::Deferred
                && self.config.overlap == OverlapPolicy::CompletionOrder;
            if !late_write {
                trace!(%epoch, %kind, "discarding result of superseded epoch");
                return false;
            }
            debug!(%epoch, "superseded epoch resolved late, overwriting value");
        }

        untracked(|| self.value.set(Some(value)));
        if current {
            self.settle_locked(epoch);
        }
        true
    }

    fn complete_stream(&self, epoch: Epoch, latest: Option<T>) {
        match latest {
            Some(value) => {
                self.publish(epoch, EvaluationKind::Stream, value);
            }
            None => {
                let _publish = self.publish.lock();
                if !self.is_disposed() {
                    self.settle_locked(epoch);
                }
            }
        }
    }

    /// Settle `epoch` with an error, leaving the value untouched.
    fn fail(&self, epoch: Epoch, err: ComputeError) {
        let _publish = self.publish.lock();
        let err = Arc::new(err);

        {
            let mut state = self.state.lock();
            if self.is_disposed() || state.epoch != epoch {
                debug!(%epoch, error = %err, "superseded epoch failed");
                return;
            }
            state.last_error = Some(Arc::clone(&err));
        }

        error!(%epoch, error = %err, "async computation failed");
        self.settle_locked(epoch);
    }

    /// Caller holds the publish lock.
    fn settle_locked(&self, epoch: Epoch) -> bool {
        let token = {
            let mut state = self.state.lock();
            if state.epoch != epoch || state.settled {
                return false;
            }
            state.settled = true;
            state.token.clone()
        };

        if let Some(token) = token {
            token.settle();
        }
        untracked(|| self.evaluating.set(true));
        debug!(%epoch, "epoch settled");
        true
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.effect.dispose();

        let _publish = self.publish.lock();
        let (token, source, detached, was_pending) = {
            let mut state = self.state.lock();
            let was_pending = state.token.is_some() && !state.settled;
            state.settled = true;
            (
                state.token.take(),
                state.source.take(),
                std::mem::take(&mut state.detached),
                was_pending,
            )
        };

        untracked(|| {
            if let Some(source) = source {
                source.release();
            }
            for subscription in detached {
                subscription.release();
            }
            if let Some(token) = token {
                token.cancel();
            }
            if was_pending {
                self.evaluating.set(true);
            }
        });
        debug!("async computed value disposed");
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl<T> Drop for Coordinator<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.dispose();
    }
}

/// A reactive value computed by a possibly asynchronous function.
///
/// # Example
///
/// ```rust
/// use lattice_async::compute::{ComputedAsync, ComputedAsyncOptions, Evaluation};
/// use lattice_async::reactive::Signal;
///
/// let count = Signal::new(2);
/// let reader = count.clone();
/// let doubled = ComputedAsync::new(
///     move |_| Ok(Evaluation::ready(reader.get() * 2)),
///     ComputedAsyncOptions::new().initial_value(0),
/// );
///
/// assert_eq!(doubled.get(), Some(4));
/// count.set(5);
/// assert_eq!(doubled.get(), Some(10));
/// ```
pub struct ComputedAsync<T>
where
    T: Clone + Send + Sync + 'static,
{
    coordinator: Arc<Coordinator<T>>,
}

impl<T> ComputedAsync<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create the cell and run its first epoch.
    ///
    /// `evaluate` receives the epoch's [`CancelToken`]. Signals it reads are
    /// tracked; a change to any of them starts the next epoch.
    pub fn new<F>(evaluate: F, options: ComputedAsyncOptions<T>) -> Self
    where
        F: Fn(&CancelToken) -> Result<Evaluation<T>, BoxError> + Send + Sync + 'static,
    {
        let ComputedAsyncOptions {
            initial_value,
            evaluating,
            config,
            runtime,
        } = options;

        untracked(|| evaluating.set(false));

        let coordinator = Arc::new_cyclic(|weak: &Weak<Coordinator<T>>| {
            let weak = weak.clone();
            let effect = Effect::new_lazy(move || {
                if let Some(coordinator) = weak.upgrade() {
                    coordinator.run_epoch();
                }
            });

            Coordinator {
                evaluate: Box::new(evaluate),
                value: Signal::new(initial_value),
                evaluating,
                config,
                runtime: runtime.or_else(|| Handle::try_current().ok()),
                publish: ReentrantMutex::new(()),
                state: Mutex::new(EpochState {
                    epoch: Epoch::default(),
                    token: None,
                    settled: false,
                    source: None,
                    detached: SmallVec::new(),
                    last_error: None,
                }),
                disposed: AtomicBool::new(false),
                effect,
            }
        });

        coordinator.effect.execute();
        Self { coordinator }
    }

    /// The latest settled value, or the initial value. Tracked.
    pub fn get(&self) -> Option<T> {
        self.coordinator.value.get()
    }

    /// Like [`get`](Self::get) without tracking the read.
    pub fn get_untracked(&self) -> Option<T> {
        self.coordinator.value.get_untracked()
    }

    /// Read-only view of the result cell.
    pub fn signal(&self) -> ReadSignal<Option<T>> {
        self.coordinator.value.read_only()
    }

    /// The current epoch. Zero only if no epoch ever started.
    pub fn epoch(&self) -> Epoch {
        self.coordinator.state.lock().epoch
    }

    /// Whether the current epoch has settled.
    pub fn is_settled(&self) -> bool {
        self.coordinator.state.lock().settled
    }

    /// The failure that settled the current epoch, if it failed.
    pub fn last_error(&self) -> Option<Arc<ComputeError>> {
        self.coordinator.state.lock().last_error.clone()
    }

    /// Policies this cell runs with.
    pub fn config(&self) -> ComputeConfig {
        self.coordinator.config
    }

    /// Signals the evaluation function read during the last epoch.
    pub fn dependencies(&self) -> SmallVec<[u64; 8]> {
        self.coordinator.effect.dependencies()
    }

    /// Stop re-evaluating and release the in-flight epoch.
    ///
    /// An unsettled epoch is cancelled and the evaluating flag is set to
    /// `true`. The value stays readable. Also happens when the last handle is
    /// dropped.
    pub fn dispose(&self) {
        self.coordinator.dispose();
    }

    /// Whether [`dispose`](Self::dispose) has run.
    pub fn is_disposed(&self) -> bool {
        self.coordinator.is_disposed()
    }
}

impl<T> Clone for ComputedAsync<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            coordinator: Arc::clone(&self.coordinator),
        }
    }
}

impl<T> fmt::Debug for ComputedAsync<T>
where
    T: Clone + Send + Sync + fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.coordinator.state.lock();
        f.debug_struct("ComputedAsync")
            .field("value", &self.coordinator.value.get_untracked())
            .field("epoch", &state.epoch)
            .field("settled", &state.settled)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Shorthand for [`ComputedAsync::new`].
pub fn computed_async<T, F>(evaluate: F, options: ComputedAsyncOptions<T>) -> ComputedAsync<T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(&CancelToken) -> Result<Evaluation<T>, BoxError> + Send + Sync + 'static,
{
    ComputedAsync::new(evaluate, options)
}
