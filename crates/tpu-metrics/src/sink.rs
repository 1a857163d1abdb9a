//! Observation sinks.

use parking_lot::Mutex;

use crate::error::Result;
use crate::types::{LabelSet, Observation};

/// Destination for decoded observations.
///
/// Every observation is a last-write-wins gauge update. Label combinations
/// that are not written on a tick keep their previous value.
pub trait ObservationSink: Send + Sync {
    /// Sets the gauge for the observation's metric and label set.
    ///
    /// # Errors
    ///
    /// Returns an error if the metric is not known to the sink or the label
    /// set does not match its dimensions.
    fn apply(&self, observation: &Observation) -> Result<()>;
}

/// Sink that records every applied observation. Useful in tests and for
/// one-shot dumps.
#[derive(Debug, Default)]
pub struct RecordingSink {
    observations: Mutex<Vec<Observation>>,
}

impl RecordingSink {
    /// Creates an empty recording sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all observations applied so far, in order.
    #[must_use]
    pub fn observations(&self) -> Vec<Observation> {
        self.observations.lock().clone()
    }

    /// Number of observations applied so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.observations.lock().len()
    }

    /// Returns true if nothing was applied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observations.lock().is_empty()
    }

    /// The most recent value written for `metric` and `labels`.
    #[must_use]
    pub fn last_value(&self, metric: &str, labels: &LabelSet) -> Option<f64> {
        self.observations
            .lock()
            .iter()
            .rev()
            .find(|o| o.metric == metric && &o.labels == labels)
            .map(|o| o.value)
    }
}

impl ObservationSink for RecordingSink {
    fn apply(&self, observation: &Observation) -> Result<()> {
        self.observations.lock().push(observation.clone());
        Ok(())
    }
}
