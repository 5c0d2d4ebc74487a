//! Network links known to the path computer.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use common::SwitchId;
use serde::Deserialize;

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct LinkRequest {
    pub src_switch: u64,
    pub src_port: u32,
    pub dst_switch: u64,
    pub dst_port: u32,
    pub bandwidth: u64,
}

/// POST /links — adds a bidirectional link.
#[tracing::instrument(skip(state))]
pub async fn add(State(state): State<Arc<AppState>>, Json(req): Json<LinkRequest>) -> StatusCode {
    state.paths.add_link(
        SwitchId::new(req.src_switch),
        req.src_port,
        SwitchId::new(req.dst_switch),
        req.dst_port,
        req.bandwidth,
    );
    StatusCode::NO_CONTENT
}

/// DELETE /links — removes a link in both directions.
#[tracing::instrument(skip(state))]
pub async fn remove(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LinkRequest>,
) -> StatusCode {
    state.paths.remove_link(
        SwitchId::new(req.src_switch),
        req.src_port,
        SwitchId::new(req.dst_switch),
        req.dst_port,
    );
    StatusCode::NO_CONTENT
}
