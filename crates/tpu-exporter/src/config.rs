//! Exporter configuration.
//!
//! Configuration is a JSON file; every field has a default, so a missing
//! file or an empty object yields a working exporter that polls the libtpu
//! helper once per second and serves `0.0.0.0:8000`.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tpu_metrics::types::validate_metric_name;
use tpu_metrics::source::DEFAULT_COMMAND_TIMEOUT;
use tpu_metrics::{CommandSource, MetricSource, SnapshotSource};

use crate::error::ExporterError;

/// Default helper program that bridges to the libtpu monitoring SDK.
pub const DEFAULT_HELPER: &str = "tpu-monitoring-helper";

/// Where raw metric data comes from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Run a helper program (`<program> <args..> list|get <name>`).
    Command {
        /// Program to execute.
        program: String,
        /// Arguments placed before the sub-command.
        #[serde(default)]
        args: Vec<String>,
        /// Seconds a single helper call may run before it is killed.
        #[serde(default = "default_command_timeout_secs")]
        timeout_secs: u64,
    },
    /// Replay a JSON snapshot file.
    Snapshot {
        /// Path to a JSON object of metric name to raw data.
        path: PathBuf,
    },
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self::Command {
            program: DEFAULT_HELPER.to_string(),
            args: Vec::new(),
            timeout_secs: default_command_timeout_secs(),
        }
    }
}

impl SourceConfig {
    /// Builds the configured source.
    #[must_use]
    pub fn build(&self) -> Arc<dyn MetricSource> {
        match self {
            Self::Command {
                program,
                args,
                timeout_secs,
            } => Arc::new(
                CommandSource::new(program.clone(), args.clone())
                    .with_timeout(Duration::from_secs(*timeout_secs)),
            ),
            Self::Snapshot { path } => Arc::new(SnapshotSource::new(path.clone())),
        }
    }
}

const fn default_command_timeout_secs() -> u64 {
    DEFAULT_COMMAND_TIMEOUT.as_secs()
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8000))
}

const fn default_poll_interval_secs() -> u64 {
    1
}

fn default_namespace() -> String {
    "libtpu".to_string()
}

/// Main exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExporterConfig {
    /// Address the metrics endpoint listens on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    /// Seconds to sleep between poll ticks.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Prefix for every exported metric name.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Monitoring source.
    #[serde(default)]
    pub source: SourceConfig,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            poll_interval_secs: default_poll_interval_secs(),
            namespace: default_namespace(),
            source: SourceConfig::default(),
        }
    }
}

impl ExporterConfig {
    /// Load configuration from a JSON file, falling back to defaults when
    /// the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ExporterError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            ExporterError::Config(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::from_json(&content)
    }

    /// Parse configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or fails validation.
    pub fn from_json(content: &str) -> Result<Self, ExporterError> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| ExporterError::Config(format!("invalid JSON: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Write configuration to a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ExporterError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ExporterError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<(), ExporterError> {
        if self.poll_interval_secs == 0 {
            return Err(ExporterError::Config(
                "poll_interval_secs must be greater than 0".to_string(),
            ));
        }

        validate_metric_name(&self.namespace)
            .map_err(|e| ExporterError::Config(format!("namespace: {e}")))?;

        match &self.source {
            SourceConfig::Command { program, .. } if program.trim().is_empty() => {
                return Err(ExporterError::Config(
                    "source.program cannot be empty".to_string(),
                ));
            }
            SourceConfig::Command { timeout_secs: 0, .. } => {
                return Err(ExporterError::Config(
                    "source.timeout_secs must be greater than 0".to_string(),
                ));
            }
            SourceConfig::Snapshot { path } if path.as_os_str().is_empty() => {
                return Err(ExporterError::Config(
                    "source.path cannot be empty".to_string(),
                ));
            }
            _ => {}
        }

        Ok(())
    }

    /// The delay between poll ticks.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}
