//! Flow saga worker.
//!
//! Hosts the flow hub in a fixed number of shards, each a tokio task owning
//! its sagas. A simulated switch speaker answers speaker commands, and an
//! HTTP API accepts flow operations and exposes health, Prometheus metrics
//! and saga status.

pub mod config;
pub mod error;
pub mod fabric;
pub mod routes;
pub mod runtime;
pub mod shard;
pub mod speaker;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use history::HistoryStore;
use metrics_exporter_prometheus::PrometheusHandle;
use model::InMemoryFlowRepository;
use saga::InMemoryPathComputer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use fabric::SagaResults;
use runtime::{Runtime, ShardRouter};

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub router: ShardRouter,
    pub results: SagaResults,
    pub repository: Arc<InMemoryFlowRepository>,
    pub paths: Arc<InMemoryPathComputer>,
    pub history: Arc<dyn HistoryStore>,
}

impl AppState {
    pub fn new(runtime: &Runtime, history: Arc<dyn HistoryStore>) -> Self {
        Self {
            router: runtime.router.clone(),
            results: runtime.results.clone(),
            repository: runtime.repository.clone(),
            paths: runtime.paths.clone(),
            history,
        }
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/sagas", get(routes::sagas::list))
        .route("/history", get(routes::history::search))
        .route("/history/export", get(routes::history::export))
        .route("/sagas/{key}", get(routes::sagas::get))
        .route("/sagas/{key}/history", get(routes::sagas::history))
        .route("/links", post(routes::topology::add).delete(routes::topology::remove))
        .route("/flows", post(routes::flows::create))
        .route(
            "/flows/{id}",
            get(routes::flows::get)
                .put(routes::flows::update)
                .delete(routes::flows::delete),
        )
        .route("/flows/{id}/reroute", post(routes::flows::reroute))
        .route("/flows/{id}/swap", post(routes::flows::swap))
        .route("/y-flows", post(routes::flows::create_y_flow))
        .route(
            "/y-flows/{id}",
            get(routes::flows::get_y_flow)
                .put(routes::flows::update_y_flow)
                .delete(routes::flows::delete_y_flow),
        )
        .route("/y-flows/{id}/reroute", post(routes::flows::reroute_y_flow))
        .route("/y-flows/{id}/swap", post(routes::flows::swap_y_flow))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
