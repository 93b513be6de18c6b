//! Error types for async computed values.
//!
//! None of these ever leave the coordinator as a panic or a `Result` into the
//! reactive runtime. Each one ends its epoch, is logged, and stays readable
//! through [`ComputedAsync::last_error`](super::ComputedAsync::last_error).

use thiserror::Error;

use super::evaluation::EvaluationKind;

/// Error type produced by evaluation functions and their async producers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A contained failure of one evaluation epoch.
#[derive(Debug, Error)]
pub enum ComputeError {
    /// The evaluation function returned an error before producing a result.
    #[error("evaluation failed: {0}")]
    Evaluation(#[source] BoxError),

    /// The evaluation function panicked.
    #[error("evaluation panicked: {0}")]
    Panicked(String),

    /// The deferred result resolved to an error.
    #[error("deferred result rejected: {0}")]
    Rejected(#[source] BoxError),

    /// The stream emitted an error.
    #[error("stream failed: {0}")]
    Stream(#[source] BoxError),

    /// No tokio runtime was available to drive an async result.
    #[error("no tokio runtime available to drive a {kind} result")]
    NoRuntime { kind: EvaluationKind },
}

impl ComputeError {
    /// Whether the failure happened before the evaluation returned.
    pub fn is_synchronous(&self) -> bool {
        matches!(self, Self::Evaluation(_) | Self::Panicked(_))
    }
}

/// Best-effort message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_render_their_cause() {
        let err = ComputeError::Rejected("backend unavailable".into());
        assert_eq!(err.to_string(), "deferred result rejected: backend unavailable");
        assert!(!err.is_synchronous());

        let err = ComputeError::NoRuntime {
            kind: EvaluationKind::Stream,
        };
        assert_eq!(err.to_string(), "no tokio runtime available to drive a stream result");
    }

    #[test]
    fn panic_payloads_become_messages() {
        let payload = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload = std::panic::catch_unwind(|| panic!("code {}", 7)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "code 7");
    }
}
