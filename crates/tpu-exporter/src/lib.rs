//! tpu-exporter - Prometheus exporter for libtpu runtime metrics
//!
//! Polls a libtpu monitoring source once per interval, decodes every
//! supported metric with `tpu-metrics`, and serves the resulting gauges on
//! an HTTP `/metrics` endpoint.

pub mod config;
pub mod error;
pub mod runtime;
pub mod server;

pub use config::{ExporterConfig, SourceConfig};
pub use error::ExporterError;
pub use runtime::Exporter;
pub use server::MetricsServer;
