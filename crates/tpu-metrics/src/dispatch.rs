//! Metric dispatch.
//!
//! The [`Dispatcher`] is the failure boundary for a single metric: it looks
//! up the schema, decodes the raw data, applies the observations to the sink
//! and reports what happened. Nothing it encounters is propagated to the
//! caller, so one bad metric can never stop a poll tick.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::decode::{Decoded, decode};
use crate::schema::SchemaRegistry;
use crate::sink::ObservationSink;
use crate::types::RawMetricData;

/// What the dispatcher did with one metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStatus {
    /// The source reported no data; nothing was done.
    Empty,
    /// The metric has no schema; nothing was done.
    Unknown,
    /// The data was decoded and applied.
    Decoded,
}

/// Outcome of processing one metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    /// Source metric name.
    pub metric: String,
    /// What happened.
    pub status: DispatchStatus,
    /// Observations accepted by the sink.
    pub applied: usize,
    /// Entries or values rejected by the decoder.
    pub rejected: usize,
    /// Observations the sink refused.
    pub sink_errors: usize,
}

impl DispatchReport {
    fn skipped(metric: &str, status: DispatchStatus) -> Self {
        Self {
            metric: metric.to_string(),
            status,
            applied: 0,
            rejected: 0,
            sink_errors: 0,
        }
    }

    /// Returns true if every entry decoded and every observation applied.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.rejected == 0 && self.sink_errors == 0
    }
}

/// Routes raw metric data to its decoder and the resulting observations to
/// a sink.
#[derive(Debug)]
pub struct Dispatcher<S> {
    schemas: Arc<SchemaRegistry>,
    sink: S,
}

impl<S: ObservationSink> Dispatcher<S> {
    /// Creates a dispatcher over a schema table and a sink.
    pub fn new(schemas: Arc<SchemaRegistry>, sink: S) -> Self {
        Self { schemas, sink }
    }

    /// The schema table.
    #[must_use]
    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    /// The sink observations are applied to.
    #[must_use]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Decodes without applying. Returns `None` for unknown metrics.
    #[must_use]
    pub fn decode(&self, metric: &str, raw: &RawMetricData) -> Option<Decoded> {
        self.schemas
            .lookup(metric)
            .map(|schema| decode(schema, raw))
    }

    /// Decodes `raw` for `metric` and applies the result to the sink.
    pub fn process(&self, metric: &str, raw: &RawMetricData) -> DispatchReport {
        if raw.is_empty() {
            return DispatchReport::skipped(metric, DispatchStatus::Empty);
        }

        let Some(schema) = self.schemas.lookup(metric) else {
            debug!(metric = %metric, "no schema for metric, skipping");
            return DispatchReport::skipped(metric, DispatchStatus::Unknown);
        };

        let decoded = decode(schema, raw);
        for rejection in &decoded.rejections {
            warn!(
                metric = %metric,
                entry = rejection.entry,
                error = %rejection.error,
                "failed to decode entry"
            );
        }

        let mut applied = 0;
        let mut sink_errors = 0;
        for observation in &decoded.observations {
            match self.sink.apply(observation) {
                Ok(()) => applied += 1,
                Err(e) => {
                    sink_errors += 1;
                    warn!(metric = %metric, error = %e, "failed to apply observation");
                }
            }
        }

        debug!(
            metric = %metric,
            strategy = %schema.strategy,
            applied,
            rejected = decoded.rejections.len(),
            "processed metric"
        );

        DispatchReport {
            metric: metric.to_string(),
            status: DispatchStatus::Decoded,
            applied,
            rejected: decoded.rejections.len(),
            sink_errors,
        }
    }
}
