//! Prometheus exposition of decoded TPU metrics.
//!
//! [`GaugeRegistry`] registers one gauge family per [`MetricSchema`] and acts
//! as the [`ObservationSink`] for the dispatcher. It also carries a few
//! counters describing the exporter itself.
//!
//! # Example
//!
//! ```rust
//! use tpu_metrics::prometheus::GaugeRegistry;
//! use tpu_metrics::{LabelSet, Observation, ObservationSink, SchemaRegistry};
//!
//! let registry = GaugeRegistry::new("libtpu", &SchemaRegistry::libtpu()).unwrap();
//!
//! let labels = LabelSet::new().with("core", "tensorcore-0");
//! registry
//!     .apply(&Observation::new("hlo_queue_size", labels, 1.0))
//!     .unwrap();
//!
//! let output = registry.encode();
//! assert!(output.contains("libtpu_hlo_queue_size"));
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use parking_lot::RwLock;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

use crate::error::{MetricsError, Result};
use crate::schema::{MetricSchema, SchemaRegistry};
use crate::sink::ObservationSink;
use crate::types::{LabelSet, Observation, validate_metric_name};

type LabelPairs = Vec<(String, String)>;

/// Gauge family keyed by `(label, value)` pairs in label-name order.
type GaugeFamily = Family<LabelPairs, Gauge<f64, AtomicU64>>;

/// Label set for per-metric exporter counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct MetricLabels {
    /// Source metric name.
    pub metric: String,
}

#[derive(Clone)]
struct RegisteredGauge {
    family: GaugeFamily,
    labels: &'static [&'static str],
    /// Label sets set at least once; the family creates series on read.
    written: Arc<RwLock<HashSet<LabelPairs>>>,
}

/// Counters describing the exporter's own health.
#[derive(Clone)]
pub struct ExporterMetrics {
    /// Completed poll ticks.
    polls: Counter,
    /// Rejected entries or values, by source metric.
    rejected_entries: Family<MetricLabels, Counter>,
    /// Failed fetches from the monitoring source, by source metric.
    source_errors: Family<MetricLabels, Counter>,
    /// Wall time of the last poll tick.
    poll_duration_seconds: Gauge<f64, AtomicU64>,
}

impl std::fmt::Debug for ExporterMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExporterMetrics")
            .field("polls", &self.polls.get())
            .finish_non_exhaustive()
    }
}

impl ExporterMetrics {
    fn new(registry: &mut Registry) -> Self {
        let polls = Counter::default();
        registry.register(
            "exporter_polls",
            "Number of completed poll ticks",
            polls.clone(),
        );

        let rejected_entries = Family::<MetricLabels, Counter>::default();
        registry.register(
            "exporter_rejected_entries",
            "Raw entries or values that could not be decoded",
            rejected_entries.clone(),
        );

        let source_errors = Family::<MetricLabels, Counter>::default();
        registry.register(
            "exporter_source_errors",
            "Failed fetches from the monitoring source",
            source_errors.clone(),
        );

        let poll_duration_seconds = Gauge::<f64, AtomicU64>::default();
        registry.register(
            "exporter_poll_duration_seconds",
            "Wall time of the last poll tick",
            poll_duration_seconds.clone(),
        );

        Self {
            polls,
            rejected_entries,
            source_errors,
            poll_duration_seconds,
        }
    }

    /// Records a completed poll tick and its duration.
    pub fn observe_poll(&self, duration: std::time::Duration) {
        self.polls.inc();
        self.poll_duration_seconds.set(duration.as_secs_f64());
    }

    /// Number of completed poll ticks.
    #[must_use]
    pub fn polls(&self) -> u64 {
        self.polls.get()
    }

    /// Adds `count` rejected entries for a source metric.
    pub fn inc_rejected_entries(&self, metric: &str, count: u64) {
        let labels = MetricLabels {
            metric: metric.to_string(),
        };
        self.rejected_entries.get_or_create(&labels).inc_by(count);
    }

    /// Total rejected entries for a source metric.
    #[must_use]
    pub fn rejected_entries(&self, metric: &str) -> u64 {
        let labels = MetricLabels {
            metric: metric.to_string(),
        };
        self.rejected_entries.get_or_create(&labels).get()
    }

    /// Records a failed fetch for a source metric.
    pub fn inc_source_errors(&self, metric: &str) {
        let labels = MetricLabels {
            metric: metric.to_string(),
        };
        self.source_errors.get_or_create(&labels).inc();
    }

    /// Total failed fetches for a source metric.
    #[must_use]
    pub fn source_errors(&self, metric: &str) -> u64 {
        let labels = MetricLabels {
            metric: metric.to_string(),
        };
        self.source_errors.get_or_create(&labels).get()
    }
}

/// Prometheus registry holding one gauge family per metric schema.
///
/// Clones share state, so one clone can be written by the poll loop while
/// another is encoded by the HTTP endpoint.
#[derive(Clone)]
pub struct GaugeRegistry {
    registry: Arc<RwLock<Registry>>,
    gauges: Arc<HashMap<&'static str, RegisteredGauge>>,
    exporter: ExporterMetrics,
    namespace: String,
}

impl std::fmt::Debug for GaugeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GaugeRegistry")
            .field("namespace", &self.namespace)
            .field("gauges", &self.gauges.len())
            .field("exporter", &self.exporter)
            .finish_non_exhaustive()
    }
}

impl GaugeRegistry {
    /// Creates a registry with every schema's gauge registered under
    /// `namespace`.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace is not a valid metric-name prefix.
    pub fn new(namespace: &str, schemas: &SchemaRegistry) -> Result<Self> {
        validate_metric_name(namespace)?;

        let mut registry = Registry::with_prefix(namespace);
        let mut gauges = HashMap::with_capacity(schemas.len());
        for schema in schemas.iter() {
            gauges.insert(schema.name, Self::register_gauge(&mut registry, schema));
        }
        let exporter = ExporterMetrics::new(&mut registry);

        Ok(Self {
            registry: Arc::new(RwLock::new(registry)),
            gauges: Arc::new(gauges),
            exporter,
            namespace: namespace.to_string(),
        })
    }

    fn register_gauge(registry: &mut Registry, schema: &MetricSchema) -> RegisteredGauge {
        let family = GaugeFamily::default();
        registry.register(schema.name, schema.help, family.clone());
        RegisteredGauge {
            family,
            labels: schema.labels,
            written: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// The namespace prefixed to every exported name.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Counters describing the exporter itself.
    #[must_use]
    pub fn exporter_metrics(&self) -> &ExporterMetrics {
        &self.exporter
    }

    /// Returns true if a gauge is registered under the exported name.
    #[must_use]
    pub fn has_gauge(&self, metric: &str) -> bool {
        self.gauges.contains_key(metric)
    }

    /// Reads the current value of a gauge.
    ///
    /// Returns `None` for unknown metrics, label sets that do not match
    /// the gauge's dimensions, and label sets never written. Reading never
    /// adds a series to the exposition.
    #[must_use]
    pub fn gauge_value(&self, metric: &str, labels: &LabelSet) -> Option<f64> {
        let gauge = self.gauges.get(metric)?;
        let pairs = labels.to_pairs();
        if !gauge.written.read().contains(&pairs) {
            return None;
        }
        Some(gauge.family.get_or_create(&pairs).get())
    }

    /// Encodes all metrics in Prometheus text format.
    ///
    /// This output can be served directly from a `/metrics` HTTP endpoint.
    #[must_use]
    pub fn encode(&self) -> String {
        let registry = self.registry.read();
        let mut buffer = String::new();
        if encode(&mut buffer, &registry).is_err() {
            tracing::error!("failed to encode prometheus metrics");
            return String::new();
        }
        buffer
    }

    /// Returns the Content-Type header value for Prometheus metrics.
    #[must_use]
    pub const fn content_type() -> &'static str {
        "text/plain; version=0.0.4; charset=utf-8"
    }
}

impl ObservationSink for GaugeRegistry {
    fn apply(&self, observation: &Observation) -> Result<()> {
        let gauge = self
            .gauges
            .get(observation.metric.as_str())
            .ok_or_else(|| MetricsError::Sink {
                metric: observation.metric.clone(),
                reason: "no gauge registered".to_string(),
            })?;

        if !observation.labels.matches_dimensions(gauge.labels) {
            return Err(MetricsError::Sink {
                metric: observation.metric.clone(),
                reason: format!(
                    "labels {} do not match dimensions {:?}",
                    observation.labels, gauge.labels
                ),
            });
        }

        if !observation.value.is_finite() {
            return Err(MetricsError::Sink {
                metric: observation.metric.clone(),
                reason: format!("non-finite value {}", observation.value),
            });
        }

        let pairs = observation.labels.to_pairs();
        gauge.family.get_or_create(&pairs).set(observation.value);
        if !gauge.written.read().contains(&pairs) {
            gauge.written.write().insert(pairs);
        }
        Ok(())
    }
}

/// HTTP handler for serving metrics.
#[derive(Clone, Debug)]
pub struct MetricsHandler {
    registry: GaugeRegistry,
}

impl MetricsHandler {
    /// Creates a new metrics handler with the given registry.
    #[must_use]
    pub const fn new(registry: GaugeRegistry) -> Self {
        Self { registry }
    }

    /// Returns the metrics in Prometheus text format.
    #[must_use]
    pub fn handle(&self) -> MetricsResponse {
        MetricsResponse {
            body: self.registry.encode(),
            content_type: GaugeRegistry::content_type(),
        }
    }
}

/// Response from the metrics handler.
#[derive(Debug, Clone)]
pub struct MetricsResponse {
    /// The response body in Prometheus text format.
    pub body: String,
    /// The Content-Type header value.
    pub content_type: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn registry() -> GaugeRegistry {
        GaugeRegistry::new("libtpu", &SchemaRegistry::libtpu()).unwrap()
    }

    fn accel(id: &str) -> LabelSet {
        LabelSet::new().with("accelerator_id", id)
    }

    mod gauge_registry_tests {
        use super::*;

        #[test]
        fn registers_every_schema() {
            let registry = registry();
            for schema in SchemaRegistry::libtpu().iter() {
                assert!(registry.has_gauge(schema.name), "{} missing", schema.name);
            }
        }

        #[test]
        fn rejects_invalid_namespace() {
            let result = GaugeRegistry::new("lib-tpu", &SchemaRegistry::libtpu());
            assert!(matches!(result, Err(MetricsError::InvalidMetricName { .. })));
        }

        #[test]
        fn apply_sets_gauge() {
            let registry = registry();
            registry
                .apply(&Observation::new("tensorcore_util", accel("0"), 85.5))
                .unwrap();
            assert_eq!(registry.gauge_value("tensorcore_util", &accel("0")), Some(85.5));
        }

        #[test]
        fn apply_is_last_write_wins() {
            let registry = registry();
            registry
                .apply(&Observation::new("duty_cycle_pct", accel("0"), 10.0))
                .unwrap();
            registry
                .apply(&Observation::new("duty_cycle_pct", accel("0"), 20.0))
                .unwrap();
            assert_eq!(registry.gauge_value("duty_cycle_pct", &accel("0")), Some(20.0));
        }

        #[test]
        fn unwritten_label_sets_keep_their_value() {
            let registry = registry();
            for (id, value) in [("0", 1.0), ("1", 2.0)] {
                registry
                    .apply(&Observation::new("tensorcore_util", accel(id), value))
                    .unwrap();
            }
            registry
                .apply(&Observation::new("tensorcore_util", accel("0"), 5.0))
                .unwrap();

            assert_eq!(registry.gauge_value("tensorcore_util", &accel("1")), Some(2.0));
        }

        #[test]
        fn apply_rejects_unknown_metric() {
            let registry = registry();
            let result = registry.apply(&Observation::new("nonexistent", accel("0"), 1.0));
            assert!(matches!(result, Err(MetricsError::Sink { .. })));
        }

        #[test]
        fn apply_rejects_mismatched_labels() {
            let registry = registry();
            let labels = LabelSet::new().with("core", "tensorcore-0");
            let result = registry.apply(&Observation::new("tensorcore_util", labels, 1.0));
            assert!(matches!(result, Err(MetricsError::Sink { .. })));
        }

        #[test]
        fn apply_rejects_non_finite() {
            let registry = registry();
            let result = registry.apply(&Observation::new("tensorcore_util", accel("0"), f64::NAN));
            assert!(result.is_err());
        }

        #[test]
        fn cloned_registry_shares_state() {
            let registry1 = registry();
            let registry2 = registry1.clone();

            registry1
                .apply(&Observation::new("tensorcore_util", accel("3"), 42.0))
                .unwrap();
            assert_eq!(registry2.gauge_value("tensorcore_util", &accel("3")), Some(42.0));
        }

        #[test]
        fn reading_unwritten_label_set_does_not_export_it() {
            let registry = registry();
            registry
                .apply(&Observation::new("tensorcore_util", accel("0"), 7.0))
                .unwrap();

            assert_eq!(registry.gauge_value("tensorcore_util", &accel("5")), None);
            assert_eq!(registry.gauge_value("duty_cycle_pct", &accel("0")), None);

            let output = registry.encode();
            assert!(output.contains(r#"libtpu_tensorcore_util{accelerator_id="0"} 7"#));
            assert!(!output.contains(r#"accelerator_id="5""#));
            assert!(!output.contains("libtpu_duty_cycle_pct{"));
        }

        #[test]
        fn gauge_value_for_wrong_dimensions_is_none() {
            let registry = registry();
            assert_eq!(registry.gauge_value("tensorcore_util", &LabelSet::new()), None);
            assert_eq!(registry.gauge_value("nonexistent", &accel("0")), None);
        }
    }

    mod encode_tests {
        use super::*;

        #[test]
        fn output_uses_namespace_and_labels() {
            let registry = registry();
            let labels = LabelSet::new()
                .with("buffer_size", "8MB+")
                .with("statistic", "p99.9");
            registry
                .apply(&Observation::new("buffer_transfer_latency_us", labels, 0.5))
                .unwrap();

            let output = registry.encode();
            assert!(output.contains("# HELP libtpu_buffer_transfer_latency_us"));
            assert!(output.contains("# TYPE libtpu_buffer_transfer_latency_us gauge"));
            assert!(output.contains(r#"buffer_size="8MB+""#));
            assert!(output.contains(r#"statistic="p99.9""#));
        }

        #[test]
        fn exporter_counters_are_exposed() {
            let registry = registry();
            registry.exporter_metrics().observe_poll(Duration::from_millis(5));
            registry.exporter_metrics().inc_rejected_entries("hlo_queue_size", 2);

            let output = registry.encode();
            assert!(output.contains("libtpu_exporter_polls_total 1"));
            assert!(output.contains("libtpu_exporter_rejected_entries_total"));
            assert!(output.contains("libtpu_exporter_poll_duration_seconds"));
        }

        #[test]
        fn content_type_is_correct() {
            let ct = GaugeRegistry::content_type();
            assert!(ct.contains("text/plain"));
            assert!(ct.contains("0.0.4"));
        }

    }

    mod exporter_metrics_tests {
        use super::*;

        #[test]
        fn counters_accumulate() {
            let registry = registry();
            let metrics = registry.exporter_metrics();

            metrics.observe_poll(Duration::from_millis(1));
            metrics.observe_poll(Duration::from_millis(1));
            metrics.inc_rejected_entries("buffer_transfer_latency", 3);
            metrics.inc_source_errors("hlo_queue_size");

            assert_eq!(metrics.polls(), 2);
            assert_eq!(metrics.rejected_entries("buffer_transfer_latency"), 3);
            assert_eq!(metrics.source_errors("hlo_queue_size"), 1);
            assert_eq!(metrics.source_errors("tensorcore_util"), 0);
        }
    }

    mod metrics_handler_tests {
        use super::*;

        #[test]
        fn handle_returns_response() {
            let registry = registry();
            let handler = MetricsHandler::new(registry.clone());
            registry
                .apply(&Observation::new("tensorcore_util", accel("0"), 1.0))
                .unwrap();

            let response = handler.handle();
            assert!(response.body.contains(r#"libtpu_tensorcore_util{accelerator_id="0"} 1"#));
            assert_eq!(response.content_type, GaugeRegistry::content_type());
        }
    }

    mod thread_safety_tests {
        use super::*;
        use std::thread;

        #[test]
        fn concurrent_apply_and_encode() {
            let registry = registry();
            let mut handles = vec![];

            for i in 0..4 {
                let writer = registry.clone();
                handles.push(thread::spawn(move || {
                    for j in 0..100 {
                        writer
                            .apply(&Observation::new(
                                "tensorcore_util",
                                accel(&i.to_string()),
                                f64::from(j),
                            ))
                            .unwrap();
                    }
                }));
                let reader = registry.clone();
                handles.push(thread::spawn(move || {
                    for _ in 0..100 {
                        assert!(reader.encode().contains("libtpu_tensorcore_util"));
                    }
                }));
            }

            for handle in handles {
                handle.join().unwrap();
            }

            for i in 0..4 {
                assert_eq!(
                    registry.gauge_value("tensorcore_util", &accel(&i.to_string())),
                    Some(99.0)
                );
            }
        }
    }
}
