//! Shared fixture for unit tests of flow steps.

use std::sync::Arc;

use common::{Cookie, EncapsulationId, FlowId, MeterId, PathId, SagaKey, SwitchId};
use history::InMemoryRecorder;
use model::{
    EncapsulationType, Flow, FlowEndpoint, FlowPath, FlowPathIds, FlowRepositoryExt,
    FlowResources, FlowStatus, InMemoryFlowRepository, PathDirection, PathResources, PathStatus,
    Segment,
};

use crate::{
    config::SagaConfig,
    flow::{FlowContext, FlowOperationRequest, FlowRequest},
    instance::SagaCore,
    services::{
        FlowRuleManager, FlowServices, InMemoryPathComputer, InMemoryResourceManager,
        RecordingCarrier, RecordingListener,
    },
};

pub(crate) const LINK_BANDWIDTH: u64 = 10_000;

pub(crate) fn endpoint(dpid: u64, port: u32) -> FlowEndpoint {
    FlowEndpoint::new(SwitchId::new(dpid), port, 100)
}

pub(crate) struct Fixture {
    pub repo: Arc<InMemoryFlowRepository>,
    pub resources: Arc<InMemoryResourceManager>,
    pub paths: Arc<InMemoryPathComputer>,
    pub carrier: Arc<RecordingCarrier>,
    pub history: Arc<InMemoryRecorder>,
    pub listener: Arc<RecordingListener>,
}

impl Fixture {
    /// Two switches joined by one link, plus a detour over switch 3.
    pub fn new() -> Self {
        let paths = InMemoryPathComputer::new();
        let sw = SwitchId::new;
        paths.add_link(sw(1), 10, sw(2), 10, LINK_BANDWIDTH);
        paths.add_link(sw(1), 11, sw(3), 10, LINK_BANDWIDTH);
        paths.add_link(sw(3), 11, sw(2), 11, LINK_BANDWIDTH);
        Self {
            repo: Arc::new(InMemoryFlowRepository::new()),
            resources: Arc::new(InMemoryResourceManager::new()),
            paths: Arc::new(paths),
            carrier: Arc::new(RecordingCarrier::new()),
            history: Arc::new(InMemoryRecorder::new()),
            listener: Arc::new(RecordingListener::new()),
        }
    }

    /// Flow `flow_id` from switch 1 to switch 2, up, using cookie 100.
    pub fn with_flow_up(flow_id: &str) -> Self {
        let fixture = Self::new();
        let flow_id = FlowId::new(flow_id);
        let mut flow = Flow::unicast(flow_id.clone(), endpoint(1, 1), endpoint(2, 1), 10);
        flow.status = FlowStatus::Up;

        let forward_id = PathId::generate(&flow_id, "forward");
        let reverse_id = PathId::generate(&flow_id, "reverse");
        let path = |path_id: &PathId, direction, src, dst, meter| FlowPath {
            path_id: path_id.clone(),
            flow_id: flow_id.clone(),
            direction,
            protected: false,
            src_switch: SwitchId::new(src),
            dst_switch: SwitchId::new(dst),
            segments: vec![Segment::new(SwitchId::new(src), 10, SwitchId::new(dst), 10)],
            branches: Vec::new(),
            cookie: Cookie::new(100),
            meter_id: Some(MeterId::new(meter)),
            group_id: None,
            encapsulation_id: Some(EncapsulationId::new(2)),
            bandwidth: 10,
            status: PathStatus::Active,
        };
        let forward = path(&forward_id, PathDirection::Forward, 1, 2, 32);
        let reverse = path(&reverse_id, PathDirection::Reverse, 2, 1, 33);
        flow.paths = FlowPathIds {
            forward: Some(forward_id.clone()),
            reverse: Some(reverse_id.clone()),
            ..FlowPathIds::default()
        };

        fixture.resources.seed_lease(FlowResources {
            flow_id: flow_id.clone(),
            cookie: Cookie::new(100),
            encapsulation_type: EncapsulationType::TransitVlan,
            encapsulation_id: EncapsulationId::new(2),
            forward: PathResources {
                path_id: forward_id,
                meter_id: Some(MeterId::new(32)),
                group_id: None,
            },
            reverse: Some(PathResources {
                path_id: reverse_id,
                meter_id: Some(MeterId::new(33)),
                group_id: None,
            }),
        });
        fixture.repo.seed(vec![flow], vec![forward, reverse]);
        fixture
    }

    pub fn config(&self) -> SagaConfig {
        SagaConfig::default()
    }

    pub fn services(&self, config: SagaConfig) -> FlowServices {
        FlowServices::new(
            self.repo.clone(),
            self.resources.clone(),
            self.paths.clone(),
            Arc::new(FlowRuleManager::new()),
            self.carrier.clone(),
        )
        .with_history(self.history.clone())
        .with_listener(self.listener.clone())
        .with_config(config)
    }

    pub fn context(&self, request: FlowOperationRequest) -> FlowContext {
        self.context_with(self.config(), request)
    }

    pub fn context_with(&self, config: SagaConfig, request: FlowOperationRequest) -> FlowContext {
        let core = SagaCore::new(
            self.services(config),
            SagaKey::generate(),
            request.flow_id().as_str(),
            request.operation(),
            None,
        );
        FlowContext::new(core, request)
    }

    /// An update of `flow_id` changing only its bandwidth.
    pub fn update_request(&self, flow_id: &str, bandwidth: u64) -> FlowRequest {
        let mut request = FlowRequest::from_flow(&self.flow(flow_id));
        request.bandwidth = bandwidth;
        request
    }

    pub fn flow(&self, flow_id: &str) -> Flow {
        self.repo
            .get_flow(&FlowId::new(flow_id))
            .expect("flow is stored")
    }

    pub fn set_status(&self, flow_id: &str, status: FlowStatus) {
        self.repo
            .in_transaction(|tx| tx.update_flow_status(&FlowId::new(flow_id), status, None))
            .expect("status is stored");
    }
}
