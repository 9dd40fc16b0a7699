//! Orchestrator entry point.

use std::sync::Arc;

use orchestrator::backend::{Backend, InMemory, Postgres, Stores};
use orchestrator::config::{Config, LogFormat};
use orchestrator::error::StartupError;
use orchestrator::{Orchestrator, create_app};
use saga::PlanningConfig;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn serve<B: Backend>(stores: Stores<B>, config: Config) -> Result<(), StartupError> {
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| StartupError::Metrics(e.to_string()))?;

    let orchestrator = Arc::new(Orchestrator::new(stores, &config, PlanningConfig::default()));
    orchestrator.start().await?;

    let app = create_app(orchestrator.state(), metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, "starting orchestrator");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    orchestrator.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    let config = Config::from_env();
    init_tracing(&config);

    match config.database_url.clone() {
        Some(url) => {
            tracing::info!("using PostgreSQL stores");
            let stores = Stores::<Postgres>::connect(&url).await?;
            serve(stores, config).await?;
        }
        None => {
            tracing::warn!("DATABASE_URL not set, state is kept in memory only");
            serve(Stores::<InMemory>::in_memory(), config).await?;
        }
    }

    tracing::info!("server shut down gracefully");
    Ok(())
}
