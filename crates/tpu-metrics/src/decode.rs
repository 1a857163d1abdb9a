//! Strategy decoders.
//!
//! Each decoder turns one metric's [`RawMetricData`] into [`Observation`]s
//! according to its [`MetricSchema`]. Decoding never fails as a whole: a bad
//! value or entry is recorded as a [`Rejection`] and the rest of the data is
//! still decoded.

use crate::error::DecodeError;
use crate::schema::{ACCELERATOR_ID, MetricSchema, STATISTIC, Strategy};
use crate::tokenizer::{clean_token, tokenize};
use crate::types::{LabelSet, Observation, RawMetricData};

/// A rejected entry or value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Zero-based position of the entry in the raw data.
    pub entry: usize,
    /// Why it was rejected.
    pub error: DecodeError,
}

/// Output of decoding one metric.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decoded {
    /// Observations in source order.
    pub observations: Vec<Observation>,
    /// Entries or values that could not be decoded.
    pub rejections: Vec<Rejection>,
}

impl Decoded {
    fn reject(&mut self, entry: usize, error: DecodeError) {
        self.rejections.push(Rejection { entry, error });
    }
}

/// Parses a normalized token as a finite float.
pub fn parse_value(token: &str) -> Result<f64, DecodeError> {
    let token = token.trim();
    let value = token
        .parse::<f64>()
        .map_err(|source| DecodeError::InvalidNumber {
            token: token.to_string(),
            source,
        })?;
    if !value.is_finite() {
        return Err(DecodeError::NonFinite {
            token: token.to_string(),
        });
    }
    Ok(value)
}

/// Decodes raw data with the strategy declared by `schema`.
#[must_use]
pub fn decode(schema: &MetricSchema, raw: &RawMetricData) -> Decoded {
    match schema.strategy {
        Strategy::IndexedScalar => decode_indexed(schema, raw),
        Strategy::StatisticsRow => decode_statistics_rows(schema, raw),
        Strategy::Distribution => decode_distribution(schema, raw),
        Strategy::ColonPair => decode_colon_pairs(schema, raw),
    }
}

/// One observation per element; the element's position is its
/// `accelerator_id`.
#[must_use]
pub fn decode_indexed(schema: &MetricSchema, raw: &RawMetricData) -> Decoded {
    let mut out = Decoded::default();
    for (index, element) in raw.iter().enumerate() {
        match parse_value(element) {
            Ok(value) => out.observations.push(Observation::new(
                schema.name,
                LabelSet::new().with(ACCELERATOR_ID, index.to_string()),
                value,
            )),
            Err(error) => out.reject(index, error),
        }
    }
    out
}

/// `label, v1, v2, ...` rows. The first token labels the row, the rest are
/// paired with the schema's statistics; values past the end of the sequence
/// are dropped.
#[must_use]
pub fn decode_statistics_rows(schema: &MetricSchema, raw: &RawMetricData) -> Decoded {
    let mut out = Decoded::default();
    let Some(row_label) = schema.row_label() else {
        return out;
    };

    for (index, entry) in raw.iter().enumerate() {
        let tokens = tokenize(entry);
        let Some((label, values)) = tokens.split_first() else {
            continue;
        };
        if label.is_empty() {
            out.reject(
                index,
                DecodeError::EmptyLabel {
                    entry: entry.to_string(),
                },
            );
            continue;
        }

        for (statistic, token) in schema.statistics.iter().zip(values) {
            match parse_value(token) {
                Ok(value) => out.observations.push(Observation::new(
                    schema.name,
                    LabelSet::new()
                        .with(row_label, label.as_str())
                        .with(STATISTIC, *statistic),
                    value,
                )),
                Err(error) => out.reject(index, error),
            }
        }
    }
    out
}

/// `v1, v2, ...` rows paired with the schema's statistics. Later rows
/// overwrite earlier ones in the sink.
#[must_use]
pub fn decode_distribution(schema: &MetricSchema, raw: &RawMetricData) -> Decoded {
    let mut out = Decoded::default();
    for (index, entry) in raw.iter().enumerate() {
        for (statistic, token) in schema.statistics.iter().zip(tokenize(entry)) {
            match parse_value(&token) {
                Ok(value) => out.observations.push(Observation::new(
                    schema.name,
                    LabelSet::new().with(STATISTIC, *statistic),
                    value,
                )),
                Err(error) => out.reject(index, error),
            }
        }
    }
    out
}

/// `label: value` pairs, split on the first colon only.
#[must_use]
pub fn decode_colon_pairs(schema: &MetricSchema, raw: &RawMetricData) -> Decoded {
    let mut out = Decoded::default();
    let Some(row_label) = schema.row_label() else {
        return out;
    };

    for (index, entry) in raw.iter().enumerate() {
        let Some((label, value)) = entry.split_once(':') else {
            out.reject(
                index,
                DecodeError::MissingSeparator {
                    entry: entry.to_string(),
                },
            );
            continue;
        };

        let label = clean_token(label);
        if label.is_empty() {
            out.reject(
                index,
                DecodeError::EmptyLabel {
                    entry: entry.to_string(),
                },
            );
            continue;
        }

        match parse_value(value) {
            Ok(value) => out.observations.push(Observation::new(
                schema.name,
                LabelSet::new().with(row_label, label),
                value,
            )),
            Err(error) => out.reject(index, error),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaRegistry;

    fn schema(source: &str) -> MetricSchema {
        SchemaRegistry::libtpu().lookup(source).unwrap().clone()
    }

    fn stat(obs: &Observation) -> &str {
        obs.labels.get(STATISTIC).unwrap()
    }

    mod parse_value_tests {
        use super::*;
        use test_case::test_case;

        #[test_case("1", 1.0 ; "integer")]
        #[test_case(" 85.5 ", 85.5 ; "padded")]
        #[test_case("-0.25", -0.25 ; "negative")]
        #[test_case("1e3", 1000.0 ; "exponent")]
        fn parses(token: &str, expected: f64) {
            assert!((parse_value(token).unwrap() - expected).abs() < f64::EPSILON);
        }

        #[test_case("abc" ; "word")]
        #[test_case("" ; "empty")]
        #[test_case("1 2" ; "two fields")]
        fn rejects_non_numeric(token: &str) {
            assert!(matches!(
                parse_value(token),
                Err(DecodeError::InvalidNumber { .. })
            ));
        }

        #[test_case("NaN" ; "nan")]
        #[test_case("inf" ; "infinity")]
        #[test_case("-inf" ; "negative infinity")]
        fn rejects_non_finite(token: &str) {
            assert!(matches!(parse_value(token), Err(DecodeError::NonFinite { .. })));
        }
    }

    mod indexed_tests {
        use super::*;

        #[test]
        fn one_observation_per_accelerator_in_order() {
            let raw = RawMetricData::new(["10.5", "20", "30.25", "0"]);
            let decoded = decode(&schema("tensorcore_util"), &raw);

            assert!(decoded.rejections.is_empty());
            assert_eq!(decoded.observations.len(), 4);
            for (i, obs) in decoded.observations.iter().enumerate() {
                assert_eq!(obs.metric, "tensorcore_util");
                assert_eq!(obs.labels.get("accelerator_id"), Some(i.to_string().as_str()));
                assert_eq!(obs.labels.len(), 1);
            }
            assert!((decoded.observations[2].value - 30.25).abs() < f64::EPSILON);
        }

        #[test]
        fn bad_element_fails_only_itself() {
            let raw = RawMetricData::new(["1", "n/a", "3"]);
            let decoded = decode(&schema("hbm_capacity_usage"), &raw);

            assert_eq!(decoded.observations.len(), 2);
            assert_eq!(decoded.observations[1].labels.get("accelerator_id"), Some("2"));
            assert_eq!(decoded.rejections.len(), 1);
            assert_eq!(decoded.rejections[0].entry, 1);
        }

        #[test]
        fn exported_name_is_used() {
            let raw = RawMetricData::from_scalars(&[34_359_738_368.0]);
            let decoded = decode(&schema("hbm_capacity_total"), &raw);
            assert_eq!(decoded.observations[0].metric, "hbm_capacity_total_bytes");
        }
    }

    mod statistics_row_tests {
        use super::*;

        #[test]
        fn buffer_latency_row() {
            let raw = RawMetricData::new(["8MB+, 2233.25, 10.0, 5.0, 1.0, 0.5"]);
            let decoded = decode(&schema("buffer_transfer_latency"), &raw);

            assert!(decoded.rejections.is_empty());
            let got: Vec<(&str, &str, f64)> = decoded
                .observations
                .iter()
                .map(|o| (o.labels.get("buffer_size").unwrap(), stat(o), o.value))
                .collect();
            assert_eq!(
                got,
                vec![
                    ("8MB+", "avg", 2233.25),
                    ("8MB+", "p50", 10.0),
                    ("8MB+", "p90", 5.0),
                    ("8MB+", "p99", 1.0),
                    ("8MB+", "p99.9", 0.5),
                ]
            );
        }

        #[test]
        fn quoted_row_is_normalized() {
            let raw = RawMetricData::new(["'8MB+', '2233.25', '10.0'"]);
            let decoded = decode(&schema("buffer_transfer_latency"), &raw);
            assert_eq!(decoded.observations.len(), 2);
            assert_eq!(decoded.observations[0].labels.get("buffer_size"), Some("8MB+"));
        }

        #[test]
        fn short_row_yields_fewer_observations() {
            let raw = RawMetricData::new(["8MB+-ALL_REDUCE, 1000, 900"]);
            let decoded = decode(&schema("collective_e2e_latency"), &raw);

            assert!(decoded.rejections.is_empty());
            assert_eq!(decoded.observations.len(), 2);
            assert_eq!(stat(&decoded.observations[0]), "avg");
            assert_eq!(stat(&decoded.observations[1]), "p50");
            assert_eq!(
                decoded.observations[0].labels.get("operation"),
                Some("8MB+-ALL_REDUCE")
            );
        }

        #[test]
        fn excess_values_are_dropped() {
            let raw = RawMetricData::new(["tensorcore-0, 1, 2, 3, 4, 5, 6, 7"]);
            let decoded = decode(&schema("hlo_exec_timing"), &raw);
            assert!(decoded.rejections.is_empty());
            assert_eq!(decoded.observations.len(), 5);
        }

        #[test]
        fn hlo_timing_uses_p95() {
            let raw = RawMetricData::new(["'tensorcore-0', '10.00', '9', '8', '7', '6'"]);
            let decoded = decode(&schema("hlo_exec_timing"), &raw);
            let stats: Vec<&str> = decoded.observations.iter().map(stat).collect();
            assert_eq!(stats, vec!["avg", "p50", "p90", "p95", "p99.9"]);
            assert_eq!(decoded.observations[0].labels.get("core"), Some("tensorcore-0"));
        }

        #[test]
        fn label_only_row_yields_nothing() {
            let raw = RawMetricData::new(["8MB+"]);
            let decoded = decode(&schema("buffer_transfer_latency"), &raw);
            assert!(decoded.observations.is_empty());
            assert!(decoded.rejections.is_empty());
        }

        #[test]
        fn malformed_row_does_not_hide_others() {
            let raw = RawMetricData::new([
                "1MB, 1, 2, 3, 4, 5",
                ", 1, 2",
                "2MB, x, 2",
                "4MB, 1, 2, 3, 4, 5",
            ]);
            let decoded = decode(&schema("buffer_transfer_latency"), &raw);

            assert_eq!(decoded.observations.len(), 11);
            let entries: Vec<usize> = decoded.rejections.iter().map(|r| r.entry).collect();
            assert_eq!(entries, vec![1, 2]);
            assert!(matches!(
                decoded.rejections[0].error,
                DecodeError::EmptyLabel { .. }
            ));
            assert!(
                decoded
                    .observations
                    .iter()
                    .any(|o| o.labels.get("buffer_size") == Some("4MB"))
            );
        }
    }

    mod distribution_tests {
        use super::*;

        #[test]
        fn values_pair_with_standard_statistics() {
            let raw = RawMetricData::new(["'12.5', '10', '20', '30', '40'"]);
            let decoded = decode(&schema("grpc_tcp_min_round_trip_times"), &raw);

            assert_eq!(decoded.observations.len(), 5);
            assert_eq!(decoded.observations[0].metric, "grpc_tcp_min_rtt_us");
            assert_eq!(decoded.observations[0].labels.len(), 1);
            assert_eq!(stat(&decoded.observations[3]), "p99");
            assert!((decoded.observations[3].value - 30.0).abs() < f64::EPSILON);
        }

        #[test]
        fn bad_value_fails_only_itself() {
            let raw = RawMetricData::new(["1, oops, 3"]);
            let decoded = decode(&schema("grpc_tcp_delivery_rates"), &raw);
            assert_eq!(decoded.observations.len(), 2);
            assert_eq!(stat(&decoded.observations[1]), "p90");
            assert_eq!(decoded.rejections.len(), 1);
        }
    }

    mod colon_pair_tests {
        use super::*;
        use test_case::test_case;

        #[test]
        fn single_pair() {
            let raw = RawMetricData::new(["tensorcore-0: 1"]);
            let decoded = decode(&schema("hlo_queue_size"), &raw);

            assert_eq!(decoded.observations.len(), 1);
            let obs = &decoded.observations[0];
            assert_eq!(obs.metric, "hlo_queue_size");
            assert_eq!(obs.labels.get("core"), Some("tensorcore-0"));
            assert!((obs.value - 1.0).abs() < f64::EPSILON);
        }

        #[test]
        fn quoted_label_is_cleaned() {
            let raw = RawMetricData::new([r#""tensorcore-1" : 4"#, "'tensorcore-2':0"]);
            let decoded = decode(&schema("hlo_queue_size"), &raw);
            assert_eq!(decoded.observations[0].labels.get("core"), Some("tensorcore-1"));
            assert_eq!(decoded.observations[1].labels.get("core"), Some("tensorcore-2"));
        }

        #[test_case("tensorcore-0 1" ; "no colon")]
        #[test_case(": 1" ; "empty label")]
        #[test_case("tensorcore-0: 1: 2" ; "second colon stays in value")]
        #[test_case("tensorcore-0: 1 2" ; "two fields")]
        #[test_case("tensorcore-0:" ; "missing value")]
        fn malformed_entry_is_rejected(entry: &str) {
            let raw = RawMetricData::new([entry, "tensorcore-9: 2"]);
            let decoded = decode(&schema("hlo_queue_size"), &raw);

            assert_eq!(decoded.rejections.len(), 1);
            assert_eq!(decoded.rejections[0].entry, 0);
            assert_eq!(decoded.observations.len(), 1);
            assert_eq!(decoded.observations[0].labels.get("core"), Some("tensorcore-9"));
        }
    }
}
