//! Core types for the metrics system.
//!
//! - [`RawMetricData`]: what the monitoring source reports for one metric
//! - [`LabelSet`]: the dimensions of one time-series
//! - [`Observation`]: a decoded value ready for the sink

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MetricsError, Result};

/// Maximum allowed length for a metric name.
pub const MAX_METRIC_NAME_LENGTH: usize = 256;

/// Validates a Prometheus metric name or name prefix.
///
/// Metric names must:
/// - Be non-empty
/// - Contain only alphanumeric characters, underscores, and colons
/// - Start with a letter or underscore
/// - Be at most 256 characters long
pub fn validate_metric_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MetricsError::InvalidMetricName {
            reason: "metric name cannot be empty".to_string(),
        });
    }

    if name.len() > MAX_METRIC_NAME_LENGTH {
        return Err(MetricsError::InvalidMetricName {
            reason: format!(
                "metric name exceeds maximum length of {MAX_METRIC_NAME_LENGTH} characters"
            ),
        });
    }

    if let Some(c) = name.chars().next() {
        if !c.is_ascii_alphabetic() && c != '_' {
            return Err(MetricsError::InvalidMetricName {
                reason: "metric name must start with a letter or underscore".to_string(),
            });
        }
    }

    if let Some(c) = name
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && *c != '_' && *c != ':')
    {
        return Err(MetricsError::InvalidMetricName {
            reason: format!("invalid character '{c}' in metric name"),
        });
    }

    Ok(())
}

/// The raw value reported by the monitoring source for one metric at one
/// poll tick.
///
/// Depending on the metric family this is either one scalar per accelerator
/// or a list of composite entry strings. Both shapes are carried as strings;
/// JSON numbers are rendered with their source formatting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<RawToken>", into = "Vec<String>")]
pub struct RawMetricData(Vec<String>);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawToken {
    Text(String),
    Number(serde_json::Number),
    Flag(bool),
}

impl From<Vec<RawToken>> for RawMetricData {
    fn from(tokens: Vec<RawToken>) -> Self {
        Self(
            tokens
                .into_iter()
                .map(|token| match token {
                    RawToken::Text(s) => s,
                    RawToken::Number(n) => n.to_string(),
                    RawToken::Flag(b) => b.to_string(),
                })
                .collect(),
        )
    }
}

impl From<RawMetricData> for Vec<String> {
    fn from(raw: RawMetricData) -> Self {
        raw.0
    }
}

impl RawMetricData {
    /// Creates raw data from entry strings.
    #[must_use]
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(entries.into_iter().map(Into::into).collect())
    }

    /// Creates raw data from per-accelerator scalars.
    #[must_use]
    pub fn from_scalars(values: &[f64]) -> Self {
        Self(values.iter().map(f64::to_string).collect())
    }

    /// Returns true if the source reported nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates over the entries in source order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// The label dimensions of one time-series.
///
/// Keys are unique and ordering is irrelevant for equality; iteration is in
/// key order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabelSet(BTreeMap<String, String>);

impl LabelSet {
    /// Creates an empty label set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a label and returns self for chaining.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Returns the value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Number of labels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no labels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the label keys in key order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Iterates over `(key, value)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns true if the keys are exactly `dimensions`, in any order.
    #[must_use]
    pub fn matches_dimensions(&self, dimensions: &[&str]) -> bool {
        self.0.len() == dimensions.len() && dimensions.iter().all(|d| self.0.contains_key(*d))
    }

    /// Converts to the `(key, value)` vector used as a gauge family key.
    #[must_use]
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        self.0.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{k}=\"{v}\"")?;
        }
        f.write_str("}")
    }
}

/// A decoded value for one time-series of an exported metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Exported metric name, without the namespace prefix.
    pub metric: String,
    /// Dimensions of the time-series.
    pub labels: LabelSet,
    /// The finite gauge value.
    pub value: f64,
}

impl Observation {
    /// Creates a new observation.
    #[must_use]
    pub fn new(metric: impl Into<String>, labels: LabelSet, value: f64) -> Self {
        Self {
            metric: metric.into(),
            labels,
            value,
        }
    }
}

impl fmt::Display for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{} {}", self.metric, self.labels, self.value)
    }
}
