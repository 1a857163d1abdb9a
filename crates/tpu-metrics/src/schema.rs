//! The metric schema table.
//!
//! Every metric the exporter understands is described by a [`MetricSchema`]:
//! the name the monitoring source reports, the gauge it is exported as, its
//! label dimensions and the [`Strategy`] used to decode its raw data. Adding
//! a metric is a table change, not a code change.

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{MetricsError, Result};
use crate::types::validate_metric_name;

/// Five-point summary used by latency and gRPC distributions.
pub const STANDARD_STATISTICS: &[&str] = &["avg", "p50", "p90", "p99", "p99.9"];

/// HLO timing reports p95 where the other distributions report p99.
pub const HLO_STATISTICS: &[&str] = &["avg", "p50", "p90", "p95", "p99.9"];

/// Label for the positional accelerator index.
pub const ACCELERATOR_ID: &str = "accelerator_id";
/// Label for the statistic name of a distribution value.
pub const STATISTIC: &str = "statistic";

/// How a metric's raw data is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// One scalar per accelerator; the position is the `accelerator_id`.
    IndexedScalar,
    /// `label, v1, v2, ...` rows paired with a statistic sequence.
    StatisticsRow,
    /// `v1, v2, ...` rows paired with a statistic sequence, no row label.
    Distribution,
    /// `label: value` pairs.
    ColonPair,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::IndexedScalar => "indexed_scalar",
            Self::StatisticsRow => "statistics_row",
            Self::Distribution => "distribution",
            Self::ColonPair => "colon_pair",
        };
        f.write_str(s)
    }
}

/// Static description of one supported metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSchema {
    /// Name reported by the monitoring source.
    pub source_name: &'static str,
    /// Exported gauge name, without the namespace prefix.
    pub name: &'static str,
    /// Help text for the exported gauge.
    pub help: &'static str,
    /// Label dimensions, in exposition order.
    pub labels: &'static [&'static str],
    /// Decoding strategy.
    pub strategy: Strategy,
    /// Statistic names paired positionally with decoded values. Empty for
    /// strategies that carry no statistic dimension.
    pub statistics: &'static [&'static str],
}

impl MetricSchema {
    /// Label dimension that carries the row label or accelerator index,
    /// i.e. the first declared label that is not `statistic`.
    #[must_use]
    pub fn row_label(&self) -> Option<&'static str> {
        self.labels.iter().copied().find(|l| *l != STATISTIC)
    }

    fn indexed(
        source_name: &'static str,
        name: &'static str,
        help: &'static str,
    ) -> Self {
        Self {
            source_name,
            name,
            help,
            labels: &[ACCELERATOR_ID],
            strategy: Strategy::IndexedScalar,
            statistics: &[],
        }
    }

    fn rows(
        source_name: &'static str,
        name: &'static str,
        help: &'static str,
        labels: &'static [&'static str],
        statistics: &'static [&'static str],
    ) -> Self {
        Self {
            source_name,
            name,
            help,
            labels,
            strategy: Strategy::StatisticsRow,
            statistics,
        }
    }

    fn distribution(
        source_name: &'static str,
        name: &'static str,
        help: &'static str,
    ) -> Self {
        Self {
            source_name,
            name,
            help,
            labels: &[STATISTIC],
            strategy: Strategy::Distribution,
            statistics: STANDARD_STATISTICS,
        }
    }

    /// Checks that the schema is internally consistent.
    fn validate(&self) -> Result<()> {
        validate_metric_name(self.name)?;

        let invalid = |reason: String| MetricsError::InvalidMetricName {
            reason: format!("{}: {reason}", self.source_name),
        };

        let has_statistic = self.labels.contains(&STATISTIC);
        match self.strategy {
            Strategy::IndexedScalar => {
                if self.labels != [ACCELERATOR_ID] {
                    return Err(invalid("indexed scalars take exactly accelerator_id".into()));
                }
            }
            Strategy::StatisticsRow => {
                if !has_statistic || self.labels.len() != 2 {
                    return Err(invalid("statistics rows need a row label and statistic".into()));
                }
            }
            Strategy::Distribution => {
                if self.labels != [STATISTIC] {
                    return Err(invalid("distributions take exactly statistic".into()));
                }
            }
            Strategy::ColonPair => {
                if has_statistic || self.labels.len() != 1 {
                    return Err(invalid("colon pairs take exactly one label".into()));
                }
            }
        }

        if has_statistic == self.statistics.is_empty() {
            return Err(invalid("statistic label and statistic sequence disagree".into()));
        }

        Ok(())
    }
}

/// The libtpu metrics understood out of the box.
static LIBTPU_SCHEMAS: Lazy<Vec<MetricSchema>> = Lazy::new(|| {
    vec![
        MetricSchema::indexed(
            "tensorcore_util",
            "tensorcore_util",
            "Percentage of TensorCore usage",
        ),
        MetricSchema::indexed(
            "duty_cycle_pct",
            "duty_cycle_pct",
            "Accelerator active duty cycle percentage",
        ),
        MetricSchema::indexed(
            "hbm_capacity_total",
            "hbm_capacity_total_bytes",
            "Total HBM capacity in bytes",
        ),
        MetricSchema::indexed(
            "hbm_capacity_usage",
            "hbm_capacity_usage_bytes",
            "HBM capacity usage in bytes",
        ),
        MetricSchema::rows(
            "buffer_transfer_latency",
            "buffer_transfer_latency_us",
            "Buffer transfer latency stats",
            &["buffer_size", STATISTIC],
            STANDARD_STATISTICS,
        ),
        MetricSchema::rows(
            "collective_e2e_latency",
            "collective_e2e_latency_us",
            "Collective End-to-End latency",
            &["operation", STATISTIC],
            STANDARD_STATISTICS,
        ),
        MetricSchema::distribution(
            "grpc_tcp_min_round_trip_times",
            "grpc_tcp_min_rtt_us",
            "gRPC TCP minimum round trip times",
        ),
        MetricSchema::distribution(
            "grpc_tcp_delivery_rates",
            "grpc_tcp_delivery_rates_bps",
            "gRPC TCP delivery rates",
        ),
        MetricSchema::rows(
            "hlo_exec_timing",
            "hlo_exec_timing_us",
            "HLO execution timing distribution",
            &["core", STATISTIC],
            HLO_STATISTICS,
        ),
        MetricSchema {
            source_name: "hlo_queue_size",
            name: "hlo_queue_size",
            help: "HLO execution queue size",
            labels: &["core"],
            strategy: Strategy::ColonPair,
            statistics: &[],
        },
    ]
});

/// Lookup table from source metric name to schema.
///
/// Built once and never mutated afterwards; share it by reference or `Arc`.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    by_source: HashMap<&'static str, MetricSchema>,
    order: Vec<&'static str>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the registry of built-in libtpu metrics.
    #[must_use]
    pub fn libtpu() -> Self {
        let mut registry = Self::new();
        for schema in LIBTPU_SCHEMAS.iter() {
            registry.order.push(schema.source_name);
            registry.by_source.insert(schema.source_name, schema.clone());
        }
        registry
    }

    /// Adds a schema, consuming and returning the registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema is inconsistent or its source name is
    /// already registered.
    pub fn with_schema(mut self, schema: MetricSchema) -> Result<Self> {
        schema.validate()?;
        if self.by_source.contains_key(schema.source_name) {
            return Err(MetricsError::DuplicateSchema {
                name: schema.source_name.to_string(),
            });
        }
        self.order.push(schema.source_name);
        self.by_source.insert(schema.source_name, schema);
        Ok(self)
    }

    /// Looks up the schema for a source metric name.
    #[must_use]
    pub fn lookup(&self, source_name: &str) -> Option<&MetricSchema> {
        self.by_source.get(source_name)
    }

    /// Returns true if the source metric name is known.
    #[must_use]
    pub fn contains(&self, source_name: &str) -> bool {
        self.by_source.contains_key(source_name)
    }

    /// Iterates over schemas in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &MetricSchema> {
        self.order.iter().filter_map(|name| self.by_source.get(name))
    }

    /// Number of registered schemas.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if no schema is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
