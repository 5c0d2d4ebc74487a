//! History search and export endpoints.

use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use common::{FlowId, SagaKey};
use futures_util::StreamExt;
use history::{HistoryEntry, HistoryKind, HistoryQuery};
use serde::Deserialize;

use crate::AppState;
use crate::error::ApiError;

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

/// Query string of `GET /history`.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub saga: Option<String>,
    pub flow: Option<String>,
    /// Comma-separated kinds: `event`, `action`, `error`.
    pub kind: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl HistoryParams {
    fn into_query(self) -> Result<HistoryQuery, ApiError> {
        let mut query = HistoryQuery::new().limit(self.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT));
        query.saga_key = self.saga.map(SagaKey::new);
        query.flow_id = self.flow.map(FlowId::new);
        if let Some(kinds) = self.kind {
            let kinds = kinds
                .split(',')
                .map(|k| {
                    HistoryKind::parse(k.trim())
                        .ok_or_else(|| ApiError::BadRequest(format!("Unknown history kind: {k}")))
                })
                .collect::<Result<Vec<_>, _>>()?;
            query = query.kinds(kinds);
        }
        if let (Some(from), Some(to)) = (self.from, self.to)
            && from > to
        {
            return Err(ApiError::BadRequest("from is after to".into()));
        }
        query.from_timestamp = self.from;
        query.to_timestamp = self.to;
        if let Some(offset) = self.offset {
            query = query.offset(offset);
        }
        Ok(query)
    }
}

/// GET /history — entries filtered by saga, flow, kind and time window.
#[tracing::instrument(skip(state))]
pub async fn search(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
    let query = params.into_query()?;
    Ok(Json(state.history.query(query).await?))
}

/// GET /history/export — every entry as newline-delimited JSON.
pub async fn export(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let entries = state.history.stream_all().await?;
    let lines = entries.map(|entry| -> Result<String, axum::BoxError> {
        let mut line = serde_json::to_string(&entry?)?;
        line.push('\n');
        Ok(line)
    });
    Ok((
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(lines),
    )
        .into_response())
}
