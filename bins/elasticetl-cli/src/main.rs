//! ElasticETL pipeline runner.
//!
//! Loads the YAML configuration, schedules every enabled pipeline on its
//! own ticker, optionally exposes Prometheus scrape metrics, and drains
//! gracefully on ctrl-c.
//!
//! ```bash
//! elasticetl --config elasticetl.yml
//! elasticetl --config elasticetl.yml --log-level debug
//! ```

mod runner;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use elasticetl_core::Config;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::runner::Runner;

#[derive(Parser, Debug)]
#[command(name = "elasticetl", version)]
#[command(about = "Periodic ETL engine for Elasticsearch aggregation responses")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Default log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let raw = std::fs::read_to_string(&args.config)
        .with_context(|| format!("reading {}", args.config.display()))?;
    let config: Config = serde_yaml::from_str(&raw)
        .with_context(|| format!("parsing {}", args.config.display()))?;
    config.validate()?;

    if let Some(metrics) = &config.metrics {
        let addr: SocketAddr = metrics
            .listen
            .parse()
            .with_context(|| format!("invalid metrics listen address {:?}", metrics.listen))?;
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("installing metrics exporter")?;
        info!(listen = %addr, "metrics exporter listening");
    }

    let runner = Runner::new();
    for spec in config.pipelines {
        let name = spec.name.clone();
        runner
            .install(spec)
            .await
            .with_context(|| format!("starting pipeline {name:?}"))?;
    }
    info!(
        pipelines = runner.pipeline_names().len(),
        "elasticetl started"
    );

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received, draining pipelines");
    runner.shutdown().await;
    Ok(())
}
