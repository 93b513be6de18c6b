//! Evaluation results.
//!
//! An evaluation function returns one of three shapes. The coordinator
//! classifies it once per epoch with [`Evaluation::kind`] and never inspects
//! it again.

use std::fmt;
use std::future::Future;

use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::{FutureExt, Stream, StreamExt, TryFutureExt, TryStreamExt};
use serde::{Deserialize, Serialize};

use super::error::BoxError;

/// What an evaluation produced.
pub enum Evaluation<T> {
    /// A value available right away.
    Immediate(T),
    /// A single value (or failure) that arrives later.
    Deferred(BoxFuture<'static, Result<T, BoxError>>),
    /// Zero or more values over time, until released.
    Stream(BoxStream<'static, Result<T, BoxError>>),
}

/// The shape of an [`Evaluation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationKind {
    Immediate,
    Deferred,
    Stream,
}

impl<T: 'static> Evaluation<T> {
    /// An immediate value.
    pub fn ready(value: T) -> Self {
        Self::Immediate(value)
    }

    /// A future that cannot fail.
    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self::Deferred(future.map(Ok).boxed())
    }

    /// A fallible future. An `Err` rejects the epoch.
    pub fn try_deferred<F, E>(future: F) -> Self
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        Self::Deferred(future.map_err(Into::into).boxed())
    }

    /// A stream that cannot fail.
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = T> + Send + 'static,
    {
        Self::Stream(stream.map(Ok).boxed())
    }

    /// A fallible stream. The first `Err` ends the epoch's subscription.
    pub fn try_stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<T, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        Self::Stream(stream.map_err(Into::into).boxed())
    }

    /// Classify this result.
    pub fn kind(&self) -> EvaluationKind {
        match self {
            Self::Immediate(_) => EvaluationKind::Immediate,
            Self::Deferred(_) => EvaluationKind::Deferred,
            Self::Stream(_) => EvaluationKind::Stream,
        }
    }
}

impl<T> From<T> for Evaluation<T> {
    fn from(value: T) -> Self {
        Self::Immediate(value)
    }
}

impl<T: fmt::Debug> fmt::Debug for Evaluation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate(value) => f.debug_tuple("Immediate").field(value).finish(),
            Self::Deferred(_) => f.write_str("Deferred(..)"),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl fmt::Display for EvaluationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Immediate => "immediate",
            Self::Deferred => "deferred",
            Self::Stream => "stream",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    #[test]
    fn classification_is_total() {
        assert_eq!(Evaluation::ready(1).kind(), EvaluationKind::Immediate);
        assert_eq!(Evaluation::from(1).kind(), EvaluationKind::Immediate);
        assert_eq!(
            Evaluation::deferred(async { 1 }).kind(),
            EvaluationKind::Deferred
        );
        assert_eq!(
            Evaluation::<i32>::try_deferred(async { Err::<i32, _>("nope") }).kind(),
            EvaluationKind::Deferred
        );
        assert_eq!(
            Evaluation::stream(stream::iter([1, 2])).kind(),
            EvaluationKind::Stream
        );
    }

    #[test]
    fn owned_values_box_into_deferred_and_stream() {
        fn boxed(name: &str) -> (Evaluation<String>, Evaluation<String>) {
            let owned = name.to_string();
            (
                Evaluation::deferred(async move { owned }),
                Evaluation::stream(stream::iter(vec![name.to_string()])),
            )
        }

        let (Evaluation::Deferred(future), Evaluation::Stream(mut items)) = boxed("widget") else {
            panic!("expected a future and a stream");
        };

        let resolved = futures_util::FutureExt::now_or_never(future).unwrap();
        assert_eq!(resolved.unwrap(), "widget");

        let first = futures_util::FutureExt::now_or_never(items.next()).flatten();
        assert_eq!(first.unwrap().unwrap(), "widget");
    }

    #[test]
    fn fallible_stream_maps_errors() {
        let Evaluation::Stream(mut items) =
            Evaluation::try_stream(stream::iter([Ok(1), Err("broken")]))
        else {
            panic!("expected a stream");
        };

        let first = futures_util::FutureExt::now_or_never(items.next()).flatten();
        assert!(matches!(first, Some(Ok(1))));

        let second = futures_util::FutureExt::now_or_never(items.next()).flatten();
        match second {
            Some(Err(err)) => assert_eq!(err.to_string(), "broken"),
            other => panic!("expected an error, got {:?}", other.map(|r| r.is_ok())),
        }
    }

    #[test]
    fn kinds_render_lowercase() {
        assert_eq!(EvaluationKind::Deferred.to_string(), "deferred");
        assert_eq!(
            serde_json::to_string(&EvaluationKind::Stream).unwrap(),
            "\"stream\""
        );
    }

    #[test]
    fn debug_hides_async_payloads() {
        assert_eq!(format!("{:?}", Evaluation::ready(3)), "Immediate(3)");
        assert_eq!(
            format!("{:?}", Evaluation::deferred(async { 3 })),
            "Deferred(..)"
        );
    }
}
