//! Lattice Async
//!
//! Async computed values for the Lattice reactive runtime.
//!
//! A computed value normally derives synchronously from the signals it reads.
//! Here the derivation may instead return a future or a stream, and the cell
//! still behaves like an ordinary reactive value: always readable, never
//! blocking, updated when the async work delivers.
//!
//! # Architecture
//!
//! - `reactive`: signals, effects, and the dependency-tracking runtime
//! - `compute`: the async computed cell and its epoch protocol
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use lattice_async::compute::{ComputedAsync, ComputedAsyncOptions, Evaluation};
//! use lattice_async::reactive::Signal;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let product_id = Signal::new(1);
//! let loading_done = Signal::new(false);
//!
//! let reader = product_id.clone();
//! let product = ComputedAsync::new(
//!     move |_| {
//!         let id = reader.get();
//!         Ok(Evaluation::deferred(async move {
//!             tokio::time::sleep(Duration::from_millis(500)).await;
//!             format!("product #{id}")
//!         }))
//!     },
//!     ComputedAsyncOptions::new()
//!         .initial_value(String::from("loading"))
//!         .evaluating(loading_done.clone()),
//! );
//!
//! // Changing the id supersedes the pending request
//! product_id.set(2);
//! # let _ = product.get();
//! # }
//! ```

pub mod compute;
pub mod reactive;

pub use compute::{computed_async, ComputedAsync, ComputedAsyncOptions, Evaluation};
pub use reactive::{Effect, ReadSignal, Signal};
