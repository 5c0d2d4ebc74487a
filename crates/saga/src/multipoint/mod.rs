//! Multipoint (y-shaped) flows.
//!
//! A y-flow operation runs a parent saga that validates the y-flow, leases
//! the shared y-point resources and starts one child flow saga per
//! sub-flow. The parent waits for every child outcome; a failed mandatory
//! sub-flow fails the whole operation, while changes made by sub-flows that
//! succeeded stay in place.

mod actions;
pub mod table;

use std::collections::{HashMap, HashSet};

use common::{FlowId, YFlowId};
use model::{EncapsulationType, FlowEndpoint, FlowRepositoryExt, FlowStatus, YFlow, YSubFlow};
use serde::{Deserialize, Serialize};

use crate::{
    error::SagaError,
    event::{Operation, SagaOutcome},
    flow::FlowRequest,
    fsm::MachineContext,
    instance::{ChildStart, CleanupItem, SagaContext, SagaCore},
    services::YPointResources,
};

pub use table::{YFlowState, YFlowTable, y_flow_table};

/// One leg of a y-flow, from the shared endpoint to its own endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubFlowRequest {
    pub flow_id: FlowId,
    pub endpoint: FlowEndpoint,
    pub mandatory: bool,
}

/// Desired attributes of a y-flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YFlowRequest {
    pub y_flow_id: YFlowId,
    pub shared_endpoint: FlowEndpoint,
    pub bandwidth: u64,
    #[serde(default)]
    pub encapsulation: EncapsulationType,
    pub sub_flows: Vec<SubFlowRequest>,
}

impl YFlowRequest {
    pub fn new(y_flow_id: YFlowId, shared_endpoint: FlowEndpoint, bandwidth: u64) -> Self {
        Self {
            y_flow_id,
            shared_endpoint,
            bandwidth,
            encapsulation: EncapsulationType::default(),
            sub_flows: Vec::new(),
        }
    }

    pub fn with_sub_flow(mut self, flow_id: FlowId, endpoint: FlowEndpoint, mandatory: bool) -> Self {
        self.sub_flows.push(SubFlowRequest {
            flow_id,
            endpoint,
            mandatory,
        });
        self
    }

    /// Attributes of one sub-flow as a flow request.
    pub(crate) fn sub_flow_request(&self, sub_flow: &SubFlowRequest) -> FlowRequest {
        let mut request = FlowRequest::unicast(
            sub_flow.flow_id.clone(),
            self.shared_endpoint,
            sub_flow.endpoint,
            self.bandwidth,
        );
        request.encapsulation = self.encapsulation;
        request.y_flow_id = Some(self.y_flow_id.clone());
        request
    }

    /// Overwrites the y-flow attributes and membership of `y_flow`.
    pub(crate) fn apply_to(&self, y_flow: &mut YFlow) {
        y_flow.shared_endpoint = self.shared_endpoint;
        y_flow.bandwidth = self.bandwidth;
        y_flow.sub_flows = self
            .sub_flows
            .iter()
            .map(|s| YSubFlow {
                flow_id: s.flow_id.clone(),
                mandatory: s.mandatory,
            })
            .collect();
    }
}

/// One request for a y-flow saga.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum YFlowOperationRequest {
    Create(YFlowRequest),
    Update(YFlowRequest),
    Reroute { y_flow_id: YFlowId, reason: String },
    Delete(YFlowId),
    PathSwap(YFlowId),
}

impl YFlowOperationRequest {
    pub fn y_flow_id(&self) -> &YFlowId {
        match self {
            YFlowOperationRequest::Create(r) | YFlowOperationRequest::Update(r) => &r.y_flow_id,
            YFlowOperationRequest::Reroute { y_flow_id, .. } => y_flow_id,
            YFlowOperationRequest::Delete(id) | YFlowOperationRequest::PathSwap(id) => id,
        }
    }

    pub fn operation(&self) -> Operation {
        match self {
            YFlowOperationRequest::Create(_) => Operation::Create,
            YFlowOperationRequest::Update(_) => Operation::Update,
            YFlowOperationRequest::Reroute { .. } => Operation::Reroute,
            YFlowOperationRequest::Delete(_) => Operation::Delete,
            YFlowOperationRequest::PathSwap(_) => Operation::PathSwap,
        }
    }
}

/// Working data of a y-flow parent saga.
#[derive(Debug)]
pub struct YFlowContext {
    pub core: SagaCore,
    pub y_flow_id: YFlowId,
    pub request: YFlowOperationRequest,
    /// The y-flow as it was before the saga marked it in progress.
    pub original: Option<YFlow>,
    /// Set once a create saga has stored the y-flow record.
    pub created: bool,
    pub y_point: Option<YPointResources>,
    /// Child sagas to start, in order.
    pub planned: Vec<ChildStart>,
    pub expected: HashSet<FlowId>,
    pub outcomes: HashMap<FlowId, SagaOutcome>,
}

impl YFlowContext {
    pub fn new(core: SagaCore, request: YFlowOperationRequest) -> Self {
        Self {
            y_flow_id: request.y_flow_id().clone(),
            core,
            request,
            original: None,
            created: false,
            y_point: None,
            planned: Vec::new(),
            expected: HashSet::new(),
            outcomes: HashMap::new(),
        }
    }

    /// True once the saga changed persisted state.
    pub fn mutated(&self) -> bool {
        self.original.is_some() || self.created
    }

    /// True when at least one child saga completed.
    pub fn any_child_succeeded(&self) -> bool {
        self.outcomes.values().any(SagaOutcome::is_success)
    }

    fn release_y_flow(&mut self) {
        let restore = match (&self.original, self.created) {
            (Some(original), _) => Some((original.status, original.status_info.clone())),
            (None, true) => Some((FlowStatus::Down, Some("Abandoned".to_string()))),
            (None, false) => None,
        };
        let Some((status, info)) = restore else {
            return;
        };
        let y_flow_id = self.y_flow_id.clone();
        let result = self.core.services.repository.in_transaction(|tx| {
            if let Some(mut y_flow) = tx.y_flow(&y_flow_id)? {
                y_flow.status = status;
                y_flow.status_info = info;
                tx.save_y_flow(y_flow)?;
            }
            Ok(())
        });
        if let Err(e) = result {
            tracing::warn!(y_flow_id = %y_flow_id, error = %e, "failed to release abandoned y-flow");
        }
    }
}

impl MachineContext for YFlowContext {
    fn on_action_error(&mut self, error: &SagaError) {
        self.core.record_error("Action failed", error.to_string());
        self.core.fail(error.kind(), error.to_string());
    }
}

impl SagaContext for YFlowContext {
    fn core(&self) -> &SagaCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SagaCore {
        &mut self.core
    }

    fn abandon(&mut self) -> Vec<CleanupItem> {
        self.release_y_flow();
        Vec::new()
    }
}
