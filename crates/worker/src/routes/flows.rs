//! Flow and y-flow operation endpoints.
//!
//! Every operation is accepted asynchronously: the handler returns the saga
//! key once the hub admitted the saga, and the result is read later from
//! `/sagas/{key}`.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{FlowId, SagaKey, YFlowId};
use model::{Flow, FlowPath, FlowRepository, YFlow};
use saga::{FlowOperationRequest, FlowRequest, Operation, RerouteRequest, YFlowOperationRequest, YFlowRequest};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;
use crate::shard::SagaRequest;

#[derive(Debug, Default, Deserialize)]
pub struct RerouteBody {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Serialize)]
pub struct SagaAccepted {
    pub saga_key: String,
    pub subject: String,
    pub operation: Operation,
}

#[derive(Serialize)]
pub struct FlowResponse {
    pub flow: Flow,
    pub paths: Vec<FlowPath>,
}

type Accepted = (StatusCode, Json<SagaAccepted>);

async fn submit(
    state: &AppState,
    subject: String,
    operation: Operation,
    request: SagaRequest,
) -> Result<Accepted, ApiError> {
    let saga_key = SagaKey::generate();
    state.router.start(saga_key.clone(), request).await?;
    tracing::info!(saga_key = %saga_key, subject = %subject, operation = operation.as_str(), "saga accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(SagaAccepted {
            saga_key: saga_key.to_string(),
            subject,
            operation,
        }),
    ))
}

async fn submit_flow(state: &AppState, request: FlowOperationRequest) -> Result<Accepted, ApiError> {
    let subject = request.flow_id().to_string();
    let operation = request.operation();
    submit(state, subject, operation, SagaRequest::Flow(request)).await
}

async fn submit_y_flow(
    state: &AppState,
    request: YFlowOperationRequest,
) -> Result<Accepted, ApiError> {
    let subject = request.y_flow_id().to_string();
    let operation = request.operation();
    submit(state, subject, operation, SagaRequest::YFlow(request)).await
}

/// An empty body means a plain, unforced reroute.
fn reroute_body(bytes: &Bytes) -> Result<RerouteBody, ApiError> {
    if bytes.is_empty() {
        return Ok(RerouteBody::default());
    }
    serde_json::from_slice(bytes).map_err(|e| ApiError::BadRequest(format!("Invalid body: {e}")))
}

fn same_id(path: &str, body: &str) -> Result<(), ApiError> {
    if path == body {
        Ok(())
    } else {
        Err(ApiError::BadRequest(format!(
            "Id in path '{path}' does not match id in body '{body}'"
        )))
    }
}

/// POST /flows — create a flow.
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FlowRequest>,
) -> Result<Accepted, ApiError> {
    submit_flow(&state, FlowOperationRequest::Create(req)).await
}

/// GET /flows/{id} — a flow with its path records.
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<FlowResponse>, ApiError> {
    let flow_id = FlowId::new(id);
    let internal = |e: model::RepositoryError| ApiError::Internal(e.to_string());
    let flow = state
        .repository
        .find_flow(&flow_id)
        .map_err(internal)?
        .ok_or_else(|| ApiError::NotFound(format!("Flow {flow_id} not found")))?;
    let paths = state.repository.find_paths_by_flow(&flow_id).map_err(internal)?;
    Ok(Json(FlowResponse { flow, paths }))
}

/// PUT /flows/{id} — update a flow to the given attributes.
pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<FlowRequest>,
) -> Result<Accepted, ApiError> {
    same_id(&id, req.flow_id.as_str())?;
    submit_flow(&state, FlowOperationRequest::Update(req)).await
}

/// DELETE /flows/{id}
pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Accepted, ApiError> {
    submit_flow(&state, FlowOperationRequest::Delete(FlowId::new(id))).await
}

/// POST /flows/{id}/reroute
pub async fn reroute(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Accepted, ApiError> {
    let body = reroute_body(&body)?;
    let mut request = RerouteRequest::new(
        FlowId::new(id),
        body.reason.unwrap_or_else(|| "manual reroute".to_string()),
    );
    request.force = body.force;
    submit_flow(&state, FlowOperationRequest::Reroute(request)).await
}

/// POST /flows/{id}/swap — swap primary and protected paths.
pub async fn swap(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Accepted, ApiError> {
    submit_flow(&state, FlowOperationRequest::PathSwap(FlowId::new(id))).await
}

/// POST /y-flows — create a y-flow and its sub-flows.
pub async fn create_y_flow(
    State(state): State<Arc<AppState>>,
    Json(req): Json<YFlowRequest>,
) -> Result<Accepted, ApiError> {
    submit_y_flow(&state, YFlowOperationRequest::Create(req)).await
}

/// GET /y-flows/{id}
pub async fn get_y_flow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<YFlow>, ApiError> {
    let y_flow_id = YFlowId::new(id);
    state
        .repository
        .find_y_flow(&y_flow_id)
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Y-flow {y_flow_id} not found")))
}

/// PUT /y-flows/{id}
pub async fn update_y_flow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<YFlowRequest>,
) -> Result<Accepted, ApiError> {
    same_id(&id, req.y_flow_id.as_str())?;
    submit_y_flow(&state, YFlowOperationRequest::Update(req)).await
}

/// DELETE /y-flows/{id}
pub async fn delete_y_flow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Accepted, ApiError> {
    submit_y_flow(&state, YFlowOperationRequest::Delete(YFlowId::new(id))).await
}

/// POST /y-flows/{id}/reroute
pub async fn reroute_y_flow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Accepted, ApiError> {
    let body = reroute_body(&body)?;
    let request = YFlowOperationRequest::Reroute {
        y_flow_id: YFlowId::new(id),
        reason: body.reason.unwrap_or_else(|| "manual reroute".to_string()),
    };
    submit_y_flow(&state, request).await
}

/// POST /y-flows/{id}/swap
pub async fn swap_y_flow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Accepted, ApiError> {
    submit_y_flow(&state, YFlowOperationRequest::PathSwap(YFlowId::new(id))).await
}
