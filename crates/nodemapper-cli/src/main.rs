//! # nodemapper
//!
//! Per-node agent that maps which pods talk to which destinations and
//! reports the facts to the mapper service.

mod args;

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing_subscriber::EnvFilter;

use nodemapper_agent::{MapperClient, Orchestrator, ReportMetrics, cloud, server};
use nodemapper_common::constants;
use nodemapper_common::error::Result;
use nodemapper_identity::ProcFsIpResolver;

use crate::args::{Cli, LogFormat};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug, cli.log_format);

    let config = cli.into_config();
    config.validate()?;
    tracing::info!(app = constants::APP_NAME, ?config, "starting");

    let token = CancellationToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || {
        tracing::info!("shutdown signal received");
        handler_token.cancel();
    })
    .context("failed to install signal handler")?;

    let cloud = cloud::detect(&config.cloud_metadata_url, config.cloud_detect_timeout).await;

    let client = MapperClient::new(config.mapper_api_url.clone(), config.calls_timeout)?;
    if let Err(e) = client.health().await {
        tracing::warn!(url = %client.url(), error = %e, "mapper health check failed, continuing");
    }

    let metrics = Arc::new(ReportMetrics::new()?);
    let endpoints = TaskTracker::new();
    let metrics_listener = server::bind(config.metrics_port).await?;
    let health_listener = server::bind(config.health_port).await?;
    let _metrics = endpoints.spawn(log_failure(
        "metrics",
        server::serve(metrics_listener, server::metrics_router(Arc::clone(&metrics)), token.clone()),
    ));
    let _health = endpoints.spawn(log_failure(
        "health",
        server::serve(health_listener, server::health_router(client.clone()), token.clone()),
    ));
    endpoints.close();

    let resolver = ProcFsIpResolver::new(config.host_proc_dir.clone());
    let outcome = Orchestrator::new(config, resolver, client, cloud)
        .with_metrics(metrics)
        .run(token.clone())
        .await;

    token.cancel();
    endpoints.wait().await;
    outcome?;

    tracing::info!("stopped");
    Ok(())
}

async fn log_failure(endpoint: &'static str, serve: impl Future<Output = Result<()>>) {
    if let Err(e) = serve.await {
        tracing::error!(endpoint, error = %e, "HTTP endpoint stopped");
    }
}

fn init_tracing(debug: bool, format: LogFormat) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
