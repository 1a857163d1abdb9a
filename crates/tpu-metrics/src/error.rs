//! Error types for the tpu-metrics crate.

use std::num::ParseFloatError;

use thiserror::Error;

/// Why a single raw entry (or a single value inside it) was rejected.
///
/// Decode errors never abort a poll tick. They are collected per metric and
/// reported alongside whatever observations could still be produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The token is not a floating-point number.
    #[error("invalid number '{token}': {source}")]
    InvalidNumber {
        /// The offending token, after normalization.
        token: String,
        /// The underlying parse failure.
        source: ParseFloatError,
    },

    /// The token parsed, but to NaN or an infinity.
    #[error("non-finite value '{token}'")]
    NonFinite {
        /// The offending token.
        token: String,
    },

    /// A `label: value` entry has no colon.
    #[error("missing ':' separator in entry '{entry}'")]
    MissingSeparator {
        /// The raw entry.
        entry: String,
    },

    /// The entry's label is empty after trimming and quote removal.
    #[error("empty label in entry '{entry}'")]
    EmptyLabel {
        /// The raw entry.
        entry: String,
    },
}

/// Errors that can occur in the metrics system.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// The metric name is invalid (empty or contains invalid characters).
    #[error("invalid metric name: {reason}")]
    InvalidMetricName {
        /// The reason the name is invalid.
        reason: String,
    },

    /// The monitoring source could not be queried.
    #[error("source error: {reason}")]
    Source {
        /// The reason the source call failed.
        reason: String,
    },

    /// The sink rejected an observation.
    #[error("sink error for {metric}: {reason}")]
    Sink {
        /// The exported metric name.
        metric: String,
        /// The reason the observation was rejected.
        reason: String,
    },

    /// A schema with the same source name is already registered.
    #[error("duplicate schema: {name}")]
    DuplicateSchema {
        /// The duplicated source name.
        name: String,
    },

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for metrics operations.
pub type Result<T> = std::result::Result<T, MetricsError>;
