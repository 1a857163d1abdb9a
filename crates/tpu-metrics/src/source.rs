//! Monitoring sources.
//!
//! A [`MetricSource`] lists the metric names the hardware monitor supports
//! and fetches the raw data for one of them. The exporter talks to libtpu
//! through a helper program ([`CommandSource`]); [`SnapshotSource`] replays
//! a JSON file and [`FakeSource`] serves in-memory data for tests.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{MetricsError, Result};
use crate::types::RawMetricData;

/// Trait for monitoring sources.
///
/// Implementations are queried from the poll loop, one metric at a time.
pub trait MetricSource: Send + Sync {
    /// Lists the metric names the monitor can report.
    ///
    /// # Errors
    ///
    /// Returns an error if the monitor cannot be queried.
    fn list_supported_metrics(&self) -> Result<Vec<String>>;

    /// Fetches the current raw data for one metric.
    ///
    /// # Errors
    ///
    /// Returns an error if the monitor cannot be queried or its output is
    /// not a JSON array.
    fn get_metric(&self, name: &str) -> Result<RawMetricData>;

    /// Returns the name of this source for logging purposes.
    fn name(&self) -> &'static str;
}

/// How long a helper call may run before it is killed.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

const WAIT_STEP: Duration = Duration::from_millis(10);

/// Source backed by an external helper program.
///
/// The helper is invoked as `<program> <args..> list`, printing a JSON array
/// of metric names, and `<program> <args..> get <name>`, printing a JSON
/// array of numbers or strings (or `null` when there is no data). A call
/// that outlives the timeout is killed and reported as a source error.
#[derive(Debug, Clone)]
pub struct CommandSource {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandSource {
    /// Creates a source that runs `program` with `args` before each
    /// sub-command.
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Sets the per-call timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The helper program.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// The per-call timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    fn run(&self, subcommand: &[&str]) -> Result<String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .args(subcommand)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| MetricsError::Source {
                reason: format!("failed to run {}: {e}", self.program),
            })?;

        // Both pipes are drained while waiting; a full pipe would stall the helper.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    if let Err(e) = child.kill() {
                        warn!(program = %self.program, error = %e, "failed to kill helper");
                    }
                    let _ = child.wait();
                    return Err(MetricsError::Source {
                        reason: format!(
                            "{} {} timed out after {:?}",
                            self.program,
                            subcommand.join(" "),
                            self.timeout
                        ),
                    });
                }
                Ok(None) => thread::sleep(WAIT_STEP),
                Err(e) => {
                    return Err(MetricsError::Source {
                        reason: format!("failed to wait for {}: {e}", self.program),
                    });
                }
            }
        };

        let stdout = join_drain(stdout, &self.program)?;
        if !status.success() {
            let stderr = join_drain(stderr, &self.program)?;
            let stderr = String::from_utf8_lossy(&stderr);
            return Err(MetricsError::Source {
                reason: format!(
                    "{} {} failed ({}): {}",
                    self.program,
                    subcommand.join(" "),
                    status,
                    stderr.trim()
                ),
            });
        }

        String::from_utf8(stdout).map_err(|e| MetricsError::Source {
            reason: format!("invalid output from {}: {e}", self.program),
        })
    }

    /// Parses the helper's `list` output.
    pub fn parse_metric_names(output: &str) -> Result<Vec<String>> {
        Ok(serde_json::from_str(output.trim())?)
    }

    /// Parses the helper's `get` output.
    pub fn parse_metric_data(output: &str) -> Result<RawMetricData> {
        let data: Option<RawMetricData> = serde_json::from_str(output.trim())?;
        Ok(data.unwrap_or_default())
    }
}

impl MetricSource for CommandSource {
    fn list_supported_metrics(&self) -> Result<Vec<String>> {
        let output = self.run(&["list"])?;
        Self::parse_metric_names(&output)
    }

    fn get_metric(&self, name: &str) -> Result<RawMetricData> {
        let output = self.run(&["get", name])?;
        Self::parse_metric_data(&output)
    }

    fn name(&self) -> &'static str {
        "CommandSource"
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

fn join_drain(handle: JoinHandle<Vec<u8>>, program: &str) -> Result<Vec<u8>> {
    handle.join().map_err(|_| MetricsError::Source {
        reason: format!("reader for {program} panicked"),
    })
}

/// Source that reads a JSON object of `{ "metric": [..] }` on every call.
///
/// The file may be rewritten between polls; each fetch sees its latest
/// contents.
#[derive(Debug, Clone)]
pub struct SnapshotSource {
    path: PathBuf,
}

impl SnapshotSource {
    /// Creates a source reading from `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The snapshot file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, Option<RawMetricData>>> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| MetricsError::Source {
            reason: format!("failed to read snapshot '{}': {e}", self.path.display()),
        })?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl MetricSource for SnapshotSource {
    fn list_supported_metrics(&self) -> Result<Vec<String>> {
        Ok(self.load()?.into_keys().collect())
    }

    fn get_metric(&self, name: &str) -> Result<RawMetricData> {
        let mut snapshot = self.load()?;
        match snapshot.remove(name) {
            Some(data) => Ok(data.unwrap_or_default()),
            None => Err(MetricsError::Source {
                reason: format!("metric '{name}' not in snapshot"),
            }),
        }
    }

    fn name(&self) -> &'static str {
        "SnapshotSource"
    }
}

/// A fake source for testing.
#[derive(Debug, Default)]
pub struct FakeSource {
    metrics: Mutex<BTreeMap<String, RawMetricData>>,
    failing: Mutex<BTreeSet<String>>,
    list_fails: Mutex<bool>,
}

impl FakeSource {
    /// Create a new fake source with no metrics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a metric with its raw data.
    #[must_use]
    pub fn with_metric(self, name: impl Into<String>, data: RawMetricData) -> Self {
        self.metrics.lock().insert(name.into(), data);
        self
    }

    /// Add a metric whose fetch always fails.
    #[must_use]
    pub fn with_failing_metric(self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.metrics.lock().insert(name.clone(), RawMetricData::default());
        self.failing.lock().insert(name);
        self
    }

    /// Replace the data served for a metric.
    pub fn set_metric(&self, name: impl Into<String>, data: RawMetricData) {
        self.metrics.lock().insert(name.into(), data);
    }

    /// Make `list_supported_metrics` fail (or succeed again).
    pub fn set_list_fails(&self, fails: bool) {
        *self.list_fails.lock() = fails;
    }
}

impl MetricSource for FakeSource {
    fn list_supported_metrics(&self) -> Result<Vec<String>> {
        if *self.list_fails.lock() {
            return Err(MetricsError::Source {
                reason: "monitor unavailable".to_string(),
            });
        }
        Ok(self.metrics.lock().keys().cloned().collect())
    }

    fn get_metric(&self, name: &str) -> Result<RawMetricData> {
        if self.failing.lock().contains(name) {
            return Err(MetricsError::Source {
                reason: format!("fetch of {name} failed"),
            });
        }
        let data = self.metrics.lock().get(name).cloned().unwrap_or_default();
        debug!(metric = %name, entries = data.len(), "served fake metric");
        Ok(data)
    }

    fn name(&self) -> &'static str {
        "FakeSource"
    }
}
