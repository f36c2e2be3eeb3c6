use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

mod handlers;
mod routes;
mod state;

use common::config::Settings;
use common::executor::HttpTriggerExecutor;
use common::lifecycle::HostedLifecycle;
use common::orchestrator::SchedulerOrchestrator;
use common::scheduler::{CronScheduler, EngineConfig};
use common::sink::JsonFileSink;
use common::store::ConfigurationStore;
use common::telemetry;
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load().context("Failed to load configuration")?;

    telemetry::init_logging(
        &settings.observability.log_level,
        settings.observability.tracing_endpoint.as_deref(),
    )?;
    settings
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    tracing::info!(
        host = %settings.server.host,
        port = %settings.server.port,
        storage = %settings.storage.path.display(),
        "Starting cronhook"
    );

    let metrics = if settings.observability.metrics_enabled {
        Some(telemetry::init_metrics()?)
    } else {
        None
    };

    // A registry that cannot be loaded blocks startup rather than running an empty schedule
    let sink = Arc::new(JsonFileSink::new(&settings.storage.path));
    let store = Arc::new(
        ConfigurationStore::load(sink)
            .await
            .context("Failed to load trigger registry")?,
    );

    let executor = HttpTriggerExecutor::new(settings.scheduler.trigger_timeout())?;
    let outcomes = executor.outcome_sender();
    let scheduler = Arc::new(CronScheduler::new(
        Arc::new(executor),
        EngineConfig::from(&settings.scheduler),
    ));
    let orchestrator = Arc::new(SchedulerOrchestrator::new(
        store.clone(),
        scheduler.clone(),
    ));

    let (lifecycle, report) = HostedLifecycle::start(store.clone(), orchestrator, scheduler).await;
    for failure in &report.failures {
        tracing::warn!(
            trigger = %failure.name,
            operation = %failure.operation,
            error = %failure.error,
            "Trigger could not be scheduled at startup"
        );
    }

    let shutdown = CancellationToken::new();
    let state = AppState::new(store, lifecycle.clone(), outcomes, metrics, shutdown.clone());
    let app = routes::create_router(state);

    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));
    tracing::info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let mut server = tokio::spawn(serve(listener, app, shutdown.clone()));

    let early_exit = tokio::select! {
        _ = shutdown_signal() => None,
        result = &mut server => Some(result),
    };

    // Stop admitting fires and end streaming responses without waiting for clients to leave
    shutdown.cancel();
    lifecycle.shutdown(settings.scheduler.shutdown_grace()).await;

    let served = match early_exit {
        Some(result) => result,
        None => server.await,
    };
    telemetry::shutdown_tracer();
    served??;

    tracing::info!("cronhook stopped");
    Ok(())
}

/// Serve the API until the shutdown token is cancelled and open connections drain
async fn serve(
    listener: tokio::net::TcpListener,
    app: axum::Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }

    tracing::info!("Initiating graceful shutdown");
}
