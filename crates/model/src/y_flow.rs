//! Multipoint (y-shaped) flows.

use common::{FlowId, GroupId, MeterId, SwitchId, YFlowId};
use serde::{Deserialize, Serialize};

use crate::{FlowEndpoint, FlowStatus};

/// Membership of a sub-flow in a y-flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YSubFlow {
    pub flow_id: FlowId,
    /// A failed mandatory sub-flow fails the whole y-flow operation.
    pub mandatory: bool,
}

/// A group of unicast sub-flows sharing one endpoint and a y-point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YFlow {
    pub y_flow_id: YFlowId,
    pub shared_endpoint: FlowEndpoint,
    pub sub_flows: Vec<YSubFlow>,
    pub bandwidth: u64,
    pub status: FlowStatus,
    pub status_info: Option<String>,
    /// Switch where the sub-flows diverge.
    pub y_point: Option<SwitchId>,
    pub shared_meter_id: Option<MeterId>,
    pub y_point_group_id: Option<GroupId>,
}

impl YFlow {
    pub fn new(y_flow_id: YFlowId, shared_endpoint: FlowEndpoint, bandwidth: u64) -> Self {
        Self {
            y_flow_id,
            shared_endpoint,
            sub_flows: Vec::new(),
            bandwidth,
            status: FlowStatus::Down,
            status_info: None,
            y_point: None,
            shared_meter_id: None,
            y_point_group_id: None,
        }
    }

    pub fn sub_flow(&self, flow_id: &FlowId) -> Option<&YSubFlow> {
        self.sub_flows.iter().find(|s| &s.flow_id == flow_id)
    }

    pub fn is_mandatory(&self, flow_id: &FlowId) -> bool {
        self.sub_flow(flow_id).is_some_and(|s| s.mandatory)
    }
}
