use std::sync::Arc;

use anyhow::Context;
use caching_exporter::api::{ApiServer, AppState};
use caching_exporter::config::{Args, ExporterConfig};
use caching_exporter::logging::init_logging;
use caching_exporter::metrics::{CachingMetrics, HealthRegistry, MetricsBridge, PrometheusExporter};
use caching_exporter::poller::CachingPoller;
use clap::Parser;
use logmetrics::Engine;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = ExporterConfig::from_args(Args::parse()).context("Invalid configuration")?;
    let logging = init_logging(config.log_dir.as_deref())?;

    let cancel_token = CancellationToken::new();
    logging.start_retention_cleanup(cancel_token.clone());

    let engine = Arc::new(
        Engine::new(config.engine_options()).context("Failed to start log-metrics engine")?,
    );
    let tailers = engine.start_tailing(cancel_token.clone());
    info!(
        logs = config.logs.len(),
        progs = %config.progs.display(),
        metrics = engine.store().len(),
        "Log-metrics engine started"
    );

    let metrics = CachingMetrics::new().context("Failed to register metrics")?;
    let health = Arc::new(HealthRegistry::new());

    let bridge = MetricsBridge::new(engine.clone(), metrics.collected().clone())
        .with_scrape_timeout(config.scrape_timeout)
        .with_health(health.clone());
    let exporter = PrometheusExporter::new(metrics.clone(), Arc::new(bridge));

    let poller = CachingPoller::new(
        config.config_source(),
        config.live_state_source(),
        metrics,
        health.clone(),
    )
    .with_interval(config.poll_interval);

    let server = ApiServer::new(
        config.server_config(),
        AppState::new(exporter, health),
        cancel_token.clone(),
    );

    tokio::spawn(shutdown_signal(cancel_token.clone()));

    // Whichever of the two stops first takes the other down with it.
    let poller_task = {
        let cancel_token = cancel_token.clone();
        tokio::spawn(async move {
            let result = poller.run(cancel_token.clone()).await;
            cancel_token.cancel();
            result
        })
    };
    let server_task = {
        let cancel_token = cancel_token.clone();
        tokio::spawn(async move {
            let result = server.run().await;
            cancel_token.cancel();
            result
        })
    };

    let (poller_result, server_result) = tokio::join!(poller_task, server_task);

    for tailer in tailers {
        if let Err(e) = tailer.await {
            warn!(error = %e, "Log tailer task failed");
        }
    }

    if let Err(e) = server_result? {
        error!(error = %e, "HTTP server failed");
        return Err(e.into());
    }
    poller_result?.context("Caching poller failed")?;

    info!("Shutdown complete");
    Ok(())
}

/// Cancel `cancel_token` on Ctrl-C or SIGTERM.
async fn shutdown_signal(cancel_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown"),
        _ = terminate => info!("Received terminate signal, initiating graceful shutdown"),
        _ = cancel_token.cancelled() => return,
    }
    cancel_token.cancel();
}
