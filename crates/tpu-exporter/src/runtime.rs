//! Wires the poller and the metrics endpoint together.

use std::sync::Arc;

use tokio::sync::watch;
use tpu_metrics::{
    Dispatcher, GaugeRegistry, MetricSource, Poller, SchemaRegistry, TickSummary,
};
use tracing::{error, info, warn};

use crate::config::ExporterConfig;
use crate::error::ExporterError;
use crate::server::MetricsServer;

/// A configured exporter: one poller writing into one gauge registry.
#[derive(Debug)]
pub struct Exporter {
    config: ExporterConfig,
    gauges: GaugeRegistry,
    poller: Arc<Poller<GaugeRegistry>>,
    source_name: &'static str,
}

impl Exporter {
    /// Builds an exporter over an explicit source.
    pub fn new(config: ExporterConfig, source: Arc<dyn MetricSource>) -> Result<Self, ExporterError> {
        config.validate()?;

        let schemas = Arc::new(SchemaRegistry::libtpu());
        let gauges = GaugeRegistry::new(&config.namespace, &schemas)?;
        let dispatcher = Dispatcher::new(schemas, gauges.clone());
        let source_name = source.name();
        let poller = Poller::new(source, dispatcher)
            .with_exporter_metrics(gauges.exporter_metrics().clone());

        Ok(Self {
            config,
            gauges,
            poller: Arc::new(poller),
            source_name,
        })
    }

    /// Builds an exporter over the source named in `config`.
    pub fn from_config(config: ExporterConfig) -> Result<Self, ExporterError> {
        let source = config.source.build();
        Self::new(config, source)
    }

    /// The configuration in effect.
    pub const fn config(&self) -> &ExporterConfig {
        &self.config
    }

    /// The registry served on `/metrics`.
    pub const fn gauges(&self) -> &GaugeRegistry {
        &self.gauges
    }

    /// The poller driving each tick.
    pub fn poller(&self) -> &Poller<GaugeRegistry> {
        &self.poller
    }

    /// Runs one poll tick on the blocking pool.
    ///
    /// Returns `None` if the tick panicked; the panic is logged and the
    /// caller may keep polling.
    pub async fn tick(&self) -> Option<TickSummary> {
        let poller = Arc::clone(&self.poller);
        match tokio::task::spawn_blocking(move || poller.poll_once()).await {
            Ok(summary) => {
                if summary.listing_failed {
                    warn!(source = self.source_name, "no supported metrics this tick");
                }
                Some(summary)
            }
            Err(e) => {
                error!(error = %e, "poll tick aborted");
                None
            }
        }
    }

    /// Polls immediately, then once per interval, until `shutdown` flips to
    /// `true` or its sender is dropped.
    ///
    /// Shutdown does not wait for an in-flight tick; the blocking poll is
    /// left to finish on its own.
    pub async fn run_poll_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.config.poll_interval();
        info!(
            source = self.source_name,
            interval_secs = self.config.poll_interval_secs,
            "starting poll loop"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = self.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("shutdown during poll tick");
                        break;
                    }
                }
            }

            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("poll loop stopped");
    }

    /// Serves `/metrics` on the configured address and polls until shutdown.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), ExporterError> {
        let server = MetricsServer::bind(self.config.listen_addr, self.gauges.clone()).await?;
        let server_task = tokio::spawn(server.run(shutdown.clone()));

        self.run_poll_loop(shutdown).await;

        match server_task.await {
            Ok(result) => result,
            Err(e) => Err(ExporterError::Server(format!("server task failed: {e}"))),
        }
    }
}
