//! Saga status and history endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::SagaKey;
use history::{HistoryEntry, HistoryStoreExt};
use saga::{NorthboundResponse, SagaSummary};
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;
use crate::shard::ShardStatus;

#[derive(Serialize)]
pub struct SagaListResponse {
    pub in_flight: usize,
    pub shards: Vec<ShardStatus>,
}

#[derive(Serialize)]
pub struct SagaStatusResponse {
    pub saga_key: String,
    /// `running`, `completed` or `failed`.
    pub status: &'static str,
    pub state: Option<String>,
    pub error_kind: Option<&'static str>,
    pub reason: Option<String>,
}

/// GET /sagas — every running saga, per shard.
pub async fn list(State(state): State<Arc<AppState>>) -> Json<SagaListResponse> {
    let shards = state.router.status().await;
    let in_flight = shards.iter().map(|s| s.sagas.len()).sum();
    Json(SagaListResponse { in_flight, shards })
}

/// GET /sagas/{key} — progress or final result of one saga.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<SagaStatusResponse>, ApiError> {
    let saga_key = SagaKey::new(key);

    if let Some(response) = state.results.get(&saga_key) {
        let (status, error_kind, reason) = match response {
            NorthboundResponse::Success { .. } => ("completed", None, None),
            NorthboundResponse::Error { kind, reason, .. } => {
                ("failed", Some(kind.as_str()), Some(reason))
            }
        };
        return Ok(Json(SagaStatusResponse {
            saga_key: saga_key.to_string(),
            status,
            state: None,
            error_kind,
            reason,
        }));
    }

    let running: Option<SagaSummary> = state
        .router
        .status()
        .await
        .into_iter()
        .flat_map(|s| s.sagas)
        .find(|s| s.saga_key == saga_key.as_str());
    match running {
        Some(summary) => Ok(Json(SagaStatusResponse {
            saga_key: summary.saga_key,
            status: "running",
            state: Some(summary.state),
            error_kind: None,
            reason: None,
        })),
        None => Err(ApiError::NotFound(format!("Saga {saga_key} not found"))),
    }
}

/// GET /sagas/{key}/history — the recorded trail of one saga.
pub async fn history(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
    let entries = state.history.entries_for_saga(&SagaKey::new(key)).await?;
    Ok(Json(entries))
}
