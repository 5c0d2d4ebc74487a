//! Requests accepted by the flow sagas.

use common::{FlowId, YFlowId};
use model::{EncapsulationType, Flow, FlowEndpoint, FlowKind, FlowPathIds, FlowStatus};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ErrorKind, SagaError},
    event::Operation,
};

/// Desired attributes of a unicast or multi-destination flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRequest {
    pub flow_id: FlowId,
    pub kind: FlowKind,
    pub source: FlowEndpoint,
    pub destinations: Vec<FlowEndpoint>,
    pub bandwidth: u64,
    pub ignore_bandwidth: bool,
    pub encapsulation: EncapsulationType,
    pub allocate_protected_path: bool,
    pub diverse_group_id: Option<String>,
    pub affinity_group_id: Option<String>,
    pub description: Option<String>,
    /// Set for sub-flows of a multipoint flow.
    pub y_flow_id: Option<YFlowId>,
}

impl FlowRequest {
    pub fn unicast(
        flow_id: FlowId,
        source: FlowEndpoint,
        destination: FlowEndpoint,
        bandwidth: u64,
    ) -> Self {
        Self::from_flow(&Flow::unicast(flow_id, source, destination, bandwidth))
    }

    pub fn multi_destination(
        flow_id: FlowId,
        source: FlowEndpoint,
        destinations: Vec<FlowEndpoint>,
        bandwidth: u64,
    ) -> Self {
        Self::from_flow(&Flow::multi_destination(
            flow_id,
            source,
            destinations,
            bandwidth,
        ))
    }

    /// The attributes an existing flow has now.
    pub fn from_flow(flow: &Flow) -> Self {
        Self {
            flow_id: flow.flow_id.clone(),
            kind: flow.kind,
            source: flow.source,
            destinations: flow.destinations.clone(),
            bandwidth: flow.bandwidth,
            ignore_bandwidth: flow.ignore_bandwidth,
            encapsulation: flow.encapsulation,
            allocate_protected_path: flow.allocate_protected_path,
            diverse_group_id: flow.diverse_group_id.clone(),
            affinity_group_id: flow.affinity_group_id.clone(),
            description: flow.description.clone(),
            y_flow_id: flow.y_flow_id.clone(),
        }
    }

    /// Overwrites the attributes of `flow`, leaving status and paths alone.
    pub fn apply_to(&self, flow: &mut Flow) {
        flow.kind = self.kind;
        flow.source = self.source;
        flow.destinations = self.destinations.clone();
        flow.bandwidth = self.bandwidth;
        flow.ignore_bandwidth = self.ignore_bandwidth;
        flow.encapsulation = self.encapsulation;
        flow.allocate_protected_path = self.allocate_protected_path;
        flow.diverse_group_id = self.diverse_group_id.clone();
        flow.affinity_group_id = self.affinity_group_id.clone();
        flow.description = self.description.clone();
        flow.y_flow_id = self.y_flow_id.clone();
    }

    /// A new flow record owned by a create saga.
    pub fn to_flow(&self) -> Flow {
        let source = self.source;
        let mut flow = Flow::unicast(self.flow_id.clone(), source, source, self.bandwidth);
        self.apply_to(&mut flow);
        flow.status = FlowStatus::InProgress;
        flow.paths = FlowPathIds::default();
        flow
    }

    /// Checks the request on its own, without looking at stored state.
    pub fn validate(&self) -> Result<(), SagaError> {
        let invalid = |message: String| Err(SagaError::validation(ErrorKind::RequestInvalid, message));

        match (self.kind, self.destinations.len()) {
            (_, 0) => return invalid(format!("Flow {} has no destination", self.flow_id)),
            (FlowKind::Unicast, n) if n > 1 => {
                return invalid(format!(
                    "Unicast flow {} must have exactly one destination",
                    self.flow_id
                ));
            }
            (FlowKind::MultiDestination, 1) => {
                return invalid(format!(
                    "Multi-destination flow {} must have at least two destinations",
                    self.flow_id
                ));
            }
            _ => {}
        }

        if self.destinations.iter().any(|d| *d == self.source) {
            return invalid(
                "It is not allowed to create one-switch flow for the same ports and vlans".into(),
            );
        }

        if self.kind == FlowKind::MultiDestination {
            for (i, destination) in self.destinations.iter().enumerate() {
                let repeated = self.destinations[..i]
                    .iter()
                    .any(|d| d.switch_id == destination.switch_id);
                if repeated || destination.switch_id == self.source.switch_id {
                    return invalid(format!(
                        "Flow {} has several endpoints on switch {}",
                        self.flow_id, destination.switch_id
                    ));
                }
            }
        }

        if self.allocate_protected_path {
            if self.kind == FlowKind::MultiDestination {
                return invalid(format!(
                    "Protected path is not supported for multi-destination flow {}",
                    self.flow_id
                ));
            }
            if self
                .destinations
                .iter()
                .all(|d| d.switch_id == self.source.switch_id)
            {
                return invalid("Couldn't setup protected path for one-switch flow".into());
            }
        }
        Ok(())
    }
}

/// Reroute of an existing flow onto the current best path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RerouteRequest {
    pub flow_id: FlowId,
    pub reason: String,
    /// Reinstall even when the best path equals the current one.
    pub force: bool,
}

impl RerouteRequest {
    pub fn new(flow_id: FlowId, reason: impl Into<String>) -> Self {
        Self {
            flow_id,
            reason: reason.into(),
            force: false,
        }
    }
}

/// One request for a flow saga.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FlowOperationRequest {
    Create(FlowRequest),
    Update(FlowRequest),
    Reroute(RerouteRequest),
    Delete(FlowId),
    PathSwap(FlowId),
}

impl FlowOperationRequest {
    pub fn flow_id(&self) -> &FlowId {
        match self {
            FlowOperationRequest::Create(r) | FlowOperationRequest::Update(r) => &r.flow_id,
            FlowOperationRequest::Reroute(r) => &r.flow_id,
            FlowOperationRequest::Delete(id) | FlowOperationRequest::PathSwap(id) => id,
        }
    }

    pub fn operation(&self) -> Operation {
        match self {
            FlowOperationRequest::Create(_) => Operation::Create,
            FlowOperationRequest::Update(_) => Operation::Update,
            FlowOperationRequest::Reroute(_) => Operation::Reroute,
            FlowOperationRequest::Delete(_) => Operation::Delete,
            FlowOperationRequest::PathSwap(_) => Operation::PathSwap,
        }
    }
}
