//! Decoding of libtpu monitoring data into labeled Prometheus gauges.
//!
//! libtpu reports each metric as an opaque list: one scalar per accelerator,
//! comma-joined statistic rows, or `label: value` pairs. `tpu-metrics` turns
//! those lists into structured, labeled gauge observations.
//!
//! # Pieces
//!
//! - [`SchemaRegistry`]: which metrics exist and how each one is decoded
//! - [`tokenizer`]: comma splitting and quote stripping for composite entries
//! - [`decode`]: one decoder per strategy family
//! - [`Dispatcher`]: per-metric failure boundary between decoders and sink
//! - [`GaugeRegistry`]: the Prometheus sink
//! - [`Poller`]: one poll tick over a [`MetricSource`]
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tpu_metrics::{Dispatcher, GaugeRegistry, RawMetricData, SchemaRegistry};
//!
//! let schemas = Arc::new(SchemaRegistry::libtpu());
//! let gauges = GaugeRegistry::new("libtpu", &schemas).unwrap();
//! let dispatcher = Dispatcher::new(Arc::clone(&schemas), gauges.clone());
//!
//! let raw = RawMetricData::new(["8MB+, 2233.25, 10.0, 5.0, 1.0, 0.5"]);
//! let report = dispatcher.process("buffer_transfer_latency", &raw);
//! assert_eq!(report.applied, 5);
//!
//! assert!(gauges.encode().contains("libtpu_buffer_transfer_latency_us"));
//! ```

#![forbid(unsafe_code)]
#![doc(html_root_url = "https://docs.rs/tpu-metrics/0.1.0")]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod collector;
pub mod decode;
pub mod dispatch;
pub mod error;
pub mod prometheus;
pub mod schema;
pub mod sink;
pub mod source;
pub mod tokenizer;
pub mod types;

// Re-export main types at crate root
pub use collector::{Poller, TickSummary};
pub use decode::{Decoded, Rejection};
pub use dispatch::{DispatchReport, DispatchStatus, Dispatcher};
pub use error::{DecodeError, MetricsError, Result};
pub use prometheus::{ExporterMetrics, GaugeRegistry};
pub use schema::{HLO_STATISTICS, MetricSchema, STANDARD_STATISTICS, SchemaRegistry, Strategy};
pub use sink::{ObservationSink, RecordingSink};
pub use source::{CommandSource, FakeSource, MetricSource, SnapshotSource};
pub use tokenizer::tokenize;
pub use types::{LabelSet, Observation, RawMetricData};
