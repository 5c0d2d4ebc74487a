//! Worker entry point.

use std::sync::Arc;

use history::{HistoryStore, InMemoryHistoryStore, PostgresHistoryStore, spawn_writer};
use saga::SagaConfig;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use worker::config::Config;
use worker::runtime::Runtime;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
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
    if config.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn history_store(config: &Config) -> Arc<dyn HistoryStore> {
    let Some(url) = &config.database_url else {
        return Arc::new(InMemoryHistoryStore::new());
    };
    let store = PostgresHistoryStore::connect(url)
        .await
        .expect("failed to connect to the history database");
    store
        .run_migrations()
        .await
        .expect("failed to run history migrations");
    tracing::info!("history is stored in PostgreSQL");
    Arc::new(store)
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. History store and the background writer feeding it
    let store = history_store(&config).await;
    let (recorder, writer) = spawn_writer(store.clone());

    // 4. Hub shards and the simulated speaker
    let runtime = Runtime::spawn(&config, SagaConfig::from_env(), Arc::new(recorder));
    let state = Arc::new(worker::AppState::new(&runtime, store));

    // 5. Build the application
    let app = worker::create_app(state, metrics_handle);

    // 6. Start server
    let addr = config.addr();
    tracing::info!(%addr, shards = config.hub_shards, "starting saga worker");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    runtime.shutdown().await;
    let _ = writer.await;
    tracing::info!("worker shut down gracefully");
}
