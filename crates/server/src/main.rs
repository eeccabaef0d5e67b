use anyhow::Result;
use axum::serve;
use relay_core::{
    aggregation::AggregationService,
    config::{AppConfig, LogFormat},
    metrics::MetricsCollector,
};
use server::router::{create_app, AppState};
use std::{net::SocketAddr, sync::Arc};
use tokio::{signal, sync::broadcast};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the logging system.
///
/// `RUST_LOG=debug` and `RUST_LOG=trace` raise the level of this workspace's crates only; any
/// other value is parsed as a full filter directive.
fn init_logging(format: LogFormat) {
    let filter = if let Ok(env_filter) = std::env::var("RUST_LOG") {
        if env_filter == "debug" {
            EnvFilter::new("warn,relay_core=debug,server=debug,tests=debug")
        } else if env_filter == "trace" {
            EnvFilter::new("warn,relay_core=trace,server=trace,tests=trace")
        } else {
            EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| {
                EnvFilter::new("warn,relay_core=debug,server=debug,tests=debug")
            })
        }
    } else {
        EnvFilter::new("warn,relay_core=info,server=info,tests=info")
    };

    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer().json();
            registry.with(fmt_layer).init();
        }
        LogFormat::Pretty => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .pretty()
                .with_file(true)
                .with_line_number(true)
                .with_target(false);
            registry.with(fmt_layer).init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            // The format is unknown until the config loads.
            init_logging(LogFormat::default());
            error!(error = %e, "invalid configuration");
            return Err(e.into());
        }
    };
    init_logging(config.log_format);

    info!(
        endpoints = config.endpoints.len(),
        grace_window_ms = config.grace_window.as_millis(),
        "Starting beacon relay"
    );

    let metrics = Arc::new(MetricsCollector::new());
    let service = Arc::new(AggregationService::from_endpoints(
        &config.endpoints,
        &config.http_client_config(),
        config.aggregation_config(),
        Arc::clone(&metrics),
    )?);

    for conn in service.connections() {
        info!(upstream = %conn.endpoint(), id = conn.id(), "Beacon node configured");
    }

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let handles = service.start_with_shutdown(&shutdown_tx);
    info!(tasks = handles.len(), "Aggregation service started");

    let app = create_app(AppState {
        service: Arc::clone(&service),
        metrics,
        shutdown: shutdown_tx.clone(),
    });
    info!(address = %config.listen_addr, "HTTP server listening");

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    if let Err(e) = serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal(shutdown_tx.clone()))
        .await
    {
        error!(error = %e, "Server error occurred");
    }

    let _ = shutdown_tx.send(());
    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "Background task failed during shutdown");
        }
    }
    info!("Server shutdown complete");

    Ok(())
}

/// Waits for Ctrl+C or SIGTERM, then tells background loops and open event streams to stop
/// so the graceful shutdown can drain.
async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(
                error = %e,
                "Failed to install Ctrl+C handler"
            );
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!(
                    error = %e,
                    "Failed to install signal handler"
                );

                () = std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
    let _ = shutdown_tx.send(());
}
