//! Reactive Primitives
//!
//! This module implements the host reactive system the async computed cell
//! runs inside: signals, effects, and the runtime that connects them.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! within a tracking context (such as an effect), the signal automatically
//! registers that context as a dependent. When the signal's value changes, all
//! dependents are re-scheduled.
//!
//! ## Effects
//!
//! An Effect is a computation that runs whenever its dependencies change. The
//! async computed cell is driven by one: every dependency change starts a new
//! evaluation epoch.
//!
//! # Implementation Notes
//!
//! The reactive system uses a thread-local tracking context to automatically
//! detect dependencies. When a signal is read, we check if there is an active
//! tracking context and, if so, register the dependency. Writes never count as
//! reads, and [`untracked`] suspends tracking entirely.

mod context;
mod effect;
mod runtime;
mod signal;
mod subscriber;

pub use context::{untracked, ReactiveContext};
pub use effect::Effect;
pub use runtime::{Reactive, ReactiveHandle, Runtime};
pub use signal::{ReadSignal, Signal};
pub use subscriber::SubscriberId;
