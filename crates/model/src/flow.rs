//! Flow records.

use common::{FlowId, PathId, SwitchId, YFlowId};
use serde::{Deserialize, Serialize};

use crate::FlowStatus;

/// Shape of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum FlowKind {
    /// Point-to-point, with forward and reverse paths.
    #[default]
    Unicast,
    /// One source, several destinations; a single forward path tree that
    /// splits at a group rule.
    MultiDestination,
}

/// Transit encapsulation used between switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum EncapsulationType {
    #[default]
    TransitVlan,
    Vxlan,
}

/// A customer-facing port on a switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowEndpoint {
    pub switch_id: SwitchId,
    pub port: u32,
    pub vlan: u16,
}

impl FlowEndpoint {
    pub fn new(switch_id: SwitchId, port: u32, vlan: u16) -> Self {
        Self {
            switch_id,
            port,
            vlan,
        }
    }
}

/// Path pointers of a flow. Replaced as a whole at the swap point.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FlowPathIds {
    pub forward: Option<PathId>,
    pub reverse: Option<PathId>,
    pub protected_forward: Option<PathId>,
    pub protected_reverse: Option<PathId>,
}

impl FlowPathIds {
    pub fn primary(&self) -> Vec<&PathId> {
        self.forward.iter().chain(self.reverse.iter()).collect()
    }

    pub fn protected(&self) -> Vec<&PathId> {
        self.protected_forward
            .iter()
            .chain(self.protected_reverse.iter())
            .collect()
    }

    pub fn all(&self) -> Vec<&PathId> {
        let mut ids = self.primary();
        ids.extend(self.protected());
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.all().is_empty()
    }

    pub fn contains(&self, path_id: &PathId) -> bool {
        self.all().contains(&path_id)
    }
}

/// A logical circuit between a source endpoint and one or more destinations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub flow_id: FlowId,
    pub kind: FlowKind,
    pub source: FlowEndpoint,
    /// Exactly one destination for unicast flows.
    pub destinations: Vec<FlowEndpoint>,
    /// Bandwidth in kbps.
    pub bandwidth: u64,
    pub ignore_bandwidth: bool,
    pub encapsulation: EncapsulationType,
    pub allocate_protected_path: bool,
    pub diverse_group_id: Option<String>,
    pub affinity_group_id: Option<String>,
    pub description: Option<String>,
    pub status: FlowStatus,
    pub status_info: Option<String>,
    pub paths: FlowPathIds,
    /// Set when the flow is a sub-flow of a y-flow.
    pub y_flow_id: Option<YFlowId>,
}

impl Flow {
    /// Creates a unicast flow without paths, in `Down` status.
    pub fn unicast(
        flow_id: FlowId,
        source: FlowEndpoint,
        destination: FlowEndpoint,
        bandwidth: u64,
    ) -> Self {
        Self {
            flow_id,
            kind: FlowKind::Unicast,
            source,
            destinations: vec![destination],
            bandwidth,
            ignore_bandwidth: false,
            encapsulation: EncapsulationType::default(),
            allocate_protected_path: false,
            diverse_group_id: None,
            affinity_group_id: None,
            description: None,
            status: FlowStatus::Down,
            status_info: None,
            paths: FlowPathIds::default(),
            y_flow_id: None,
        }
    }

    /// Creates a multi-destination flow without paths, in `Down` status.
    pub fn multi_destination(
        flow_id: FlowId,
        source: FlowEndpoint,
        destinations: Vec<FlowEndpoint>,
        bandwidth: u64,
    ) -> Self {
        Self {
            kind: FlowKind::MultiDestination,
            destinations,
            ..Self::unicast(flow_id, source, source, bandwidth)
        }
    }

    pub fn is_multi_destination(&self) -> bool {
        self.kind == FlowKind::MultiDestination
    }

    /// Multi-destination flows carry traffic in the forward direction only.
    pub fn has_reverse_direction(&self) -> bool {
        self.kind == FlowKind::Unicast
    }

    /// Destination of a unicast flow.
    pub fn destination(&self) -> Option<&FlowEndpoint> {
        self.destinations.first()
    }

    /// True when source and every destination sit on one switch.
    pub fn is_one_switch(&self) -> bool {
        self.destinations
            .iter()
            .all(|d| d.switch_id == self.source.switch_id)
    }
}
