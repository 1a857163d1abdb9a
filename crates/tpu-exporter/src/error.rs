//! Error types for tpu-exporter.

use thiserror::Error;

/// Errors that can occur while configuring or running the exporter.
#[derive(Debug, Error)]
pub enum ExporterError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The metrics endpoint failed.
    #[error("metrics server error: {0}")]
    Server(String),

    /// Metrics pipeline error.
    #[error(transparent)]
    Metrics(#[from] tpu_metrics::MetricsError),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ExporterError::Config("poll_interval_secs must be greater than 0".to_string());
        assert_eq!(
            err.to_string(),
            "configuration error: poll_interval_secs must be greater than 0"
        );
    }

    #[test]
    fn test_server_error_display() {
        let err = ExporterError::Server("address in use".to_string());
        assert_eq!(err.to_string(), "metrics server error: address in use");
    }

    #[test]
    fn test_metrics_error_is_transparent() {
        let err = ExporterError::from(tpu_metrics::MetricsError::Source {
            reason: "helper missing".to_string(),
        });
        assert_eq!(err.to_string(), "source error: helper missing");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ExporterError = io_err.into();
        assert!(err.to_string().contains("io error"));
    }
}
