//! Async Computed Values
//!
//! This module builds a reactive cell on top of the primitives in
//! [`reactive`](crate::reactive) whose evaluation function may answer
//! synchronously, with a future, or with a stream.
//!
//! # Pieces
//!
//! - [`Evaluation`] is what an evaluation returns, classified by
//!   [`EvaluationKind`].
//! - [`CancelToken`] is handed to each evaluation so it can attach cleanup
//!   for when its epoch is superseded.
//! - [`EvaluatingSink`] receives the settled/pending flag.
//! - [`ComputedAsync`] coordinates all of it. See its module docs for the
//!   epoch protocol.

mod cancel;
mod coordinator;
mod error;
mod evaluating;
mod evaluation;
mod options;
mod subscription;

pub use cancel::{CancelToken, Epoch};
pub use coordinator::{computed_async, ComputedAsync};
pub use error::{BoxError, ComputeError};
pub use evaluating::{Evaluating, EvaluatingSink};
pub use evaluation::{Evaluation, EvaluationKind};
pub use options::{ComputeConfig, ComputedAsyncOptions, OverlapPolicy, StreamSettlement};
