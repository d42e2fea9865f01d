use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use pckts::{Config, Driver};
use tracing_subscriber::{EnvFilter, fmt};

/// Simulated client fleet streaming packets to a live stats server.
#[derive(Parser)]
#[command(name = "pckts", version, about)]
struct Cli {
    /// Path to a YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of simulated clients (overrides the config file).
    #[arg(long)]
    clients: Option<u32>,

    /// Ingest listen address (overrides the config file).
    #[arg(long)]
    ingest_addr: Option<SocketAddr>,

    /// Observer listen address (overrides the config file).
    #[arg(long)]
    observer_addr: Option<SocketAddr>,

    /// Stats window in milliseconds (overrides the config file).
    #[arg(long)]
    publish_interval_ms: Option<u64>,

    /// Logging filter (trace, debug, info, warn, error); RUST_LOG takes precedence.
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(clients) = self.clients {
            config.clients = clients;
        }
        if let Some(addr) = self.ingest_addr {
            config.ingest_addr = addr;
        }
        if let Some(addr) = self.observer_addr {
            config.observer_addr = addr;
        }
        if let Some(ms) = self.publish_interval_ms {
            config.publish_interval_ms = ms;
        }

        config.validate().context("validating configuration")?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&cli.log_level)
            .with_context(|| format!("invalid log level: {}", cli.log_level))?,
    };
    fmt().with_env_filter(filter).with_target(true).init();

    let config = cli.config()?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(run(config))
}

async fn run(config: Config) -> Result<()> {
    let handle = Driver::start(&config).await.context("starting fleet")?;

    tracing::info!(
        ingest = %handle.ingest_addr(),
        observers = %handle.observer_addr(),
        "ready; connect an observer to receive stats and send rate changes",
    );

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    tracing::info!("received SIGINT, shutting down");

    handle.shutdown().await;
    Ok(())
}
