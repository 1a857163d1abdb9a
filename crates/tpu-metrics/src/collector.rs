//! The poll tick.
//!
//! A [`Poller`] walks every metric the source supports, fetches its raw data
//! and hands it to the [`Dispatcher`]. Fetch failures and decode failures are
//! logged and counted; the tick always runs to the end.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::dispatch::{DispatchStatus, Dispatcher};
use crate::prometheus::ExporterMetrics;
use crate::sink::ObservationSink;
use crate::source::MetricSource;

/// Totals for one poll tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Metric names visited.
    pub metrics: usize,
    /// Observations applied to the sink.
    pub applied: usize,
    /// Entries or values rejected by decoders.
    pub rejected: usize,
    /// Observations refused by the sink.
    pub sink_errors: usize,
    /// Metrics whose fetch failed.
    pub source_errors: usize,
    /// Metrics without a schema.
    pub unknown: usize,
    /// Metrics that reported no data.
    pub empty: usize,
    /// The supported-metric listing failed; nothing was polled.
    pub listing_failed: bool,
}

/// Runs poll ticks against a source.
pub struct Poller<S> {
    source: Arc<dyn MetricSource>,
    dispatcher: Dispatcher<S>,
    exporter: Option<ExporterMetrics>,
    supported: Mutex<Option<Vec<String>>>,
}

impl<S> std::fmt::Debug for Poller<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("source", &self.source.name())
            .field("supported", &self.supported.lock().as_ref().map(Vec::len))
            .finish_non_exhaustive()
    }
}

impl<S: ObservationSink> Poller<S> {
    /// Creates a poller reading from `source` and dispatching through
    /// `dispatcher`.
    pub fn new(source: Arc<dyn MetricSource>, dispatcher: Dispatcher<S>) -> Self {
        Self {
            source,
            dispatcher,
            exporter: None,
            supported: Mutex::new(None),
        }
    }

    /// Records tick counters on `metrics`.
    #[must_use]
    pub fn with_exporter_metrics(mut self, metrics: ExporterMetrics) -> Self {
        self.exporter = Some(metrics);
        self
    }

    /// The dispatcher used for every metric.
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher<S> {
        &self.dispatcher
    }

    /// The metric names being polled, once listed.
    #[must_use]
    pub fn supported_metrics(&self) -> Option<Vec<String>> {
        self.supported.lock().clone()
    }

    /// Lists supported metrics on first use and caches a non-empty result.
    fn metric_names(&self) -> Option<Vec<String>> {
        let mut supported = self.supported.lock();
        if let Some(names) = supported.as_ref() {
            return Some(names.clone());
        }

        match self.source.list_supported_metrics() {
            Ok(names) if names.is_empty() => {
                warn!(source = self.source.name(), "monitor reported no supported metrics");
                None
            }
            Ok(names) => {
                let known = names
                    .iter()
                    .filter(|n| self.dispatcher.schemas().contains(n))
                    .count();
                debug!(
                    source = self.source.name(),
                    supported = names.len(),
                    known,
                    "listed supported metrics"
                );
                *supported = Some(names.clone());
                Some(names)
            }
            Err(e) => {
                error!(source = self.source.name(), error = %e, "failed to list supported metrics");
                None
            }
        }
    }

    /// Runs one poll tick over every supported metric.
    pub fn poll_once(&self) -> TickSummary {
        let started = Instant::now();
        let mut summary = TickSummary::default();

        let Some(names) = self.metric_names() else {
            summary.listing_failed = true;
            return summary;
        };

        for name in &names {
            summary.metrics += 1;

            let raw = match self.source.get_metric(name) {
                Ok(raw) => raw,
                Err(e) => {
                    summary.source_errors += 1;
                    warn!(metric = %name, error = %e, "failed to fetch metric");
                    if let Some(exporter) = &self.exporter {
                        exporter.inc_source_errors(name);
                    }
                    continue;
                }
            };

            let report = self.dispatcher.process(name, &raw);
            match report.status {
                DispatchStatus::Empty => summary.empty += 1,
                DispatchStatus::Unknown => summary.unknown += 1,
                DispatchStatus::Decoded => {}
            }
            summary.applied += report.applied;
            summary.rejected += report.rejected;
            summary.sink_errors += report.sink_errors;

            if report.rejected > 0 {
                if let Some(exporter) = &self.exporter {
                    exporter.inc_rejected_entries(name, report.rejected as u64);
                }
            }
        }

        if let Some(exporter) = &self.exporter {
            exporter.observe_poll(started.elapsed());
        }

        debug!(
            metrics = summary.metrics,
            applied = summary.applied,
            rejected = summary.rejected,
            source_errors = summary.source_errors,
            elapsed_ms = started.elapsed().as_millis(),
            "poll tick complete"
        );

        summary
    }
}
