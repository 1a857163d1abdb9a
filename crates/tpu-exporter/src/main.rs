//! tpu-exporter - libtpu metrics for Prometheus
//!
//! Runs next to a TPU workload, polls the libtpu monitoring SDK through a
//! helper program, and exposes the decoded metrics on `/metrics`.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tpu_exporter::{Exporter, ExporterConfig};
use tpu_metrics::{Dispatcher, RecordingSink, SchemaRegistry};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "tpu-exporter")]
#[command(about = "Prometheus exporter for libtpu runtime metrics")]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(
        short,
        long,
        global = true,
        env = "TPU_EXPORTER_CONFIG",
        default_value = "/etc/tpu-exporter/config.json"
    )]
    config: PathBuf,

    /// Override the listen address
    #[arg(long, global = true)]
    listen: Option<SocketAddr>,

    /// Override the poll interval in seconds
    #[arg(long, global = true)]
    interval: Option<u64>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the monitoring source and serve /metrics (default)
    Run,

    /// List the metrics the monitoring source supports
    List,

    /// Fetch one metric and show how it decodes
    Dump {
        /// Source metric name, e.g. `hlo_queue_size`
        metric: String,
    },

    /// Generate a default config file
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = "/etc/tpu-exporter/config.json")]
        output: PathBuf,
    },
}

fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive("tpu_exporter=info".parse()?)
        .add_directive("tpu_metrics=info".parse()?);

    match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            run_exporter(cli.config, cli.listen, cli.interval).await?;
        }

        Commands::List => {
            list_metrics(&cli.config)?;
        }

        Commands::Dump { metric } => {
            dump_metric(&cli.config, &metric)?;
        }

        Commands::InitConfig { output } => {
            init_config(&output)?;
        }
    }

    Ok(())
}

async fn run_exporter(
    config_path: PathBuf,
    listen: Option<SocketAddr>,
    interval: Option<u64>,
) -> anyhow::Result<()> {
    info!(config = %config_path.display(), "starting tpu-exporter");

    let mut config = ExporterConfig::load(&config_path)?;
    if let Some(listen) = listen {
        config.listen_addr = listen;
    }
    if let Some(interval) = interval {
        config.poll_interval_secs = interval;
    }

    info!(
        listen = %config.listen_addr,
        interval_secs = config.poll_interval_secs,
        namespace = %config.namespace,
        source = ?config.source,
        "loaded config"
    );

    let exporter = Exporter::from_config(config)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    exporter.run(shutdown_rx).await?;
    info!("tpu-exporter stopped");
    Ok(())
}

/// Resolves when `signal` fires. A handler that could not be installed
/// never resolves, so it cannot trigger a shutdown on its own.
async fn until_signal<F>(signal: F, name: &str)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        error!(signal = name, error = %e, "failed to listen for signal");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                () = until_signal(tokio::signal::ctrl_c(), "ctrl-c") => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "failed to install SIGTERM handler");
            until_signal(tokio::signal::ctrl_c(), "ctrl-c").await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    until_signal(tokio::signal::ctrl_c(), "ctrl-c").await;
}

fn list_metrics(config_path: &Path) -> anyhow::Result<()> {
    let config = ExporterConfig::load(config_path)?;
    let source = config.source.build();
    let schemas = SchemaRegistry::libtpu();

    let names = source.list_supported_metrics()?;
    if names.is_empty() {
        println!("No metrics reported by {}", source.name());
        return Ok(());
    }

    println!("Supported metrics ({}):", names.len());
    println!();
    for name in &names {
        match schemas.lookup(name) {
            Some(schema) => println!(
                "  {:<32} -> {}_{} ({})",
                name, config.namespace, schema.name, schema.strategy
            ),
            None => println!("  {name:<32}    (not exported)"),
        }
    }

    Ok(())
}

fn dump_metric(config_path: &Path, metric: &str) -> anyhow::Result<()> {
    let config = ExporterConfig::load(config_path)?;
    let source = config.source.build();
    let raw = source.get_metric(metric)?;

    println!("Raw data for {metric}:");
    println!("  {}", serde_json::to_string(&raw)?);
    println!();

    let dispatcher = Dispatcher::new(Arc::new(SchemaRegistry::libtpu()), RecordingSink::new());
    let Some(decoded) = dispatcher.decode(metric, &raw) else {
        println!("No schema for {metric}; it is not exported");
        return Ok(());
    };

    println!("Observations ({}):", decoded.observations.len());
    for observation in &decoded.observations {
        println!("  {}_{observation}", config.namespace);
    }

    if !decoded.rejections.is_empty() {
        println!();
        println!("Rejected entries ({}):", decoded.rejections.len());
        for rejection in &decoded.rejections {
            println!("  entry {}: {}", rejection.entry, rejection.error);
        }
    }

    Ok(())
}

fn init_config(output: &Path) -> anyhow::Result<()> {
    let config = ExporterConfig::default();
    config.save(output)?;

    println!("Config written to {}", output.display());
    println!();
    println!("Edit the source section if the helper lives elsewhere, then run:");
    println!("  tpu-exporter --config {} run", output.display());

    Ok(())
}
