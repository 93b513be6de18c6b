//! Options for async computed values.
//!
//! [`ComputedAsyncOptions`] is the per-cell builder: initial value, evaluating
//! sink, policies, and the runtime that drives async results. The policy part
//! is plain data in [`ComputeConfig`] so it can be loaded from JSON.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;

use super::evaluating::{Evaluating, EvaluatingSink};

/// When a stream epoch counts as settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamSettlement {
    /// Write every emission; settle on the first one.
    #[default]
    FirstEmission,
    /// Write only the last emission, once the stream ends; settle then.
    ///
    /// Never settles for a stream that never ends.
    Completion,
}

/// What happens to a deferred result that resolves after its epoch was
/// superseded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Drop the superseded future and ignore anything it would have written.
    #[default]
    DiscardStale,
    /// Keep superseded futures running; whichever resolves last wins the
    /// value. Only the current epoch drives the evaluating flag.
    CompletionOrder,
}

/// Serializable policy settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeConfig {
    pub stream_settlement: StreamSettlement,
    pub overlap: OverlapPolicy,
}

impl ComputeConfig {
    /// Load from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Options for [`ComputedAsync::new`](super::ComputedAsync::new).
pub struct ComputedAsyncOptions<T> {
    pub(crate) initial_value: Option<T>,
    pub(crate) evaluating: Evaluating,
    pub(crate) config: ComputeConfig,
    pub(crate) runtime: Option<Handle>,
}

impl<T> ComputedAsyncOptions<T> {
    /// No initial value, no sink, default policies.
    pub fn new() -> Self {
        Self {
            initial_value: None,
            evaluating: Evaluating::none(),
            config: ComputeConfig::default(),
            runtime: None,
        }
    }

    /// Value the cell reads before any epoch settles.
    pub fn initial_value(mut self, value: T) -> Self {
        self.initial_value = Some(value);
        self
    }

    /// Sink for the settled/pending flag. The cell becomes its only writer.
    pub fn evaluating<S>(mut self, sink: S) -> Self
    where
        S: EvaluatingSink + 'static,
    {
        self.evaluating = Evaluating::new(sink);
        self
    }

    /// Replace every policy at once.
    pub fn config(mut self, config: ComputeConfig) -> Self {
        self.config = config;
        self
    }

    /// When a stream epoch counts as settled.
    pub fn stream_settlement(mut self, settlement: StreamSettlement) -> Self {
        self.config.stream_settlement = settlement;
        self
    }

    /// How superseded deferred results are treated.
    pub fn overlap(mut self, overlap: OverlapPolicy) -> Self {
        self.config.overlap = overlap;
        self
    }

    /// Runtime that drives deferred and stream results.
    ///
    /// Defaults to the runtime current when the cell is created, or when the
    /// epoch starts if there was none at creation.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }
}

impl<T> Default for ComputedAsyncOptions<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for ComputedAsyncOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedAsyncOptions")
            .field("initial_value", &self.initial_value)
            .field("evaluating", &self.evaluating)
            .field("config", &self.config)
            .field("runtime", &self.runtime.is_some())
            .finish()
    }
}
