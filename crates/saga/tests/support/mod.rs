//! Harness shared by the saga integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use common::{Cookie, EncapsulationId, FlowId, MeterId, PathId, SagaKey, SwitchId};
use history::InMemoryRecorder;
use model::{
    EncapsulationType, Flow, FlowEndpoint, FlowPath, FlowPathIds, FlowRepository, FlowRepositoryExt,
    FlowResources, FlowStatus, InMemoryFlowRepository, PathDirection, PathResources, PathStatus,
    Segment,
};
use saga::{
    CommandKey, FlowHub, FlowRuleManager, FlowServices, InMemoryPathComputer,
    InMemoryResourceManager, NorthboundResponse, RecordingCarrier, RecordingListener, SagaConfig,
    SpeakerRequest, SpeakerResponse,
};

pub fn sw(dpid: u64) -> SwitchId {
    SwitchId::new(dpid)
}

pub fn endpoint(dpid: u64, port: u32) -> FlowEndpoint {
    FlowEndpoint::new(sw(dpid), port, 100)
}

/// How the fake switch agent answers one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Success,
    Failure,
    /// Leave the command unanswered.
    Silent,
}

pub struct TestHarness {
    pub hub: FlowHub,
    pub repo: Arc<InMemoryFlowRepository>,
    pub resources: Arc<InMemoryResourceManager>,
    pub paths: Arc<InMemoryPathComputer>,
    pub carrier: Arc<RecordingCarrier>,
    pub listener: Arc<RecordingListener>,
    pub history: Arc<InMemoryRecorder>,
    /// Every command the harness has taken from the carrier so far.
    pub seen: Vec<(CommandKey, SpeakerRequest)>,
}

impl TestHarness {
    /// Switches 1 and 2 joined directly, with a detour over switch 3.
    pub fn new() -> Self {
        Self::with_config(SagaConfig::default())
    }

    pub fn with_config(config: SagaConfig) -> Self {
        Self::build(
            config,
            &[(1, 10, 2, 10), (1, 11, 3, 10), (3, 11, 2, 11)],
        )
    }

    /// Custom topology of `(src, src_port, dst, dst_port)` links.
    pub fn build(config: SagaConfig, links: &[(u64, u32, u64, u32)]) -> Self {
        let paths = InMemoryPathComputer::new();
        for &(src, src_port, dst, dst_port) in links {
            paths.add_link(sw(src), src_port, sw(dst), dst_port, 10_000);
        }

        let repo = Arc::new(InMemoryFlowRepository::new());
        let resources = Arc::new(InMemoryResourceManager::new());
        let paths = Arc::new(paths);
        let carrier = Arc::new(RecordingCarrier::new());
        let listener = Arc::new(RecordingListener::new());
        let history = Arc::new(InMemoryRecorder::new());

        let services = FlowServices::new(
            repo.clone(),
            resources.clone(),
            paths.clone(),
            Arc::new(FlowRuleManager::new()),
            carrier.clone(),
        )
        .with_history(history.clone())
        .with_listener(listener.clone())
        .with_config(config);

        Self {
            hub: FlowHub::new(services),
            repo,
            resources,
            paths,
            carrier,
            listener,
            history,
            seen: Vec::new(),
        }
    }

    /// Stores flow `flow_id` from switch 1 to switch 2 as up, on cookie 100,
    /// together with the lease backing its paths.
    pub fn seed_flow_up(&self, flow_id: &str) -> Flow {
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
            src_switch: sw(src),
            dst_switch: sw(dst),
            segments: vec![Segment::new(sw(src), 10, sw(dst), 10)],
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

        self.resources.seed_lease(FlowResources {
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
        self.repo.seed(vec![flow.clone()], vec![forward, reverse]);
        flow
    }

    pub fn flow(&self, flow_id: &str) -> Flow {
        self.repo
            .get_flow(&FlowId::new(flow_id))
            .expect("flow is stored")
    }

    pub fn find_flow(&self, flow_id: &str) -> Option<Flow> {
        self.repo
            .find_flow(&FlowId::new(flow_id))
            .expect("repository is readable")
    }

    pub fn path(&self, path_id: &PathId) -> FlowPath {
        self.repo.get_path(path_id).expect("path is stored")
    }

    pub fn set_status(&self, flow_id: &str, status: FlowStatus) {
        self.repo
            .in_transaction(|tx| tx.update_flow_status(&FlowId::new(flow_id), status, None))
            .expect("status is stored");
    }

    /// Answers commands with `policy` until the sagas stop sending.
    /// Unanswered commands stay in `seen`.
    pub fn answer_with(&mut self, mut policy: impl FnMut(&SpeakerRequest) -> Reply) {
        loop {
            let requests = self.carrier.take_requests();
            if requests.is_empty() {
                break;
            }
            let mut answered = false;
            for (key, request) in requests {
                self.seen.push((key.clone(), request.clone()));
                let response = match policy(&request) {
                    Reply::Success => SpeakerResponse::success(key.command_id, request.switch_id),
                    Reply::Failure => {
                        SpeakerResponse::failure(key.command_id, request.switch_id, "switch error")
                    }
                    Reply::Silent => continue,
                };
                answered = true;
                let _ = self.hub.handle_async_response(&key, response);
            }
            if !answered {
                break;
            }
        }
    }

    pub fn answer_all(&mut self) {
        self.answer_with(|_| Reply::Success);
    }

    /// Takes the commands sent so far without answering them.
    pub fn take_unanswered(&mut self) -> Vec<(CommandKey, SpeakerRequest)> {
        let requests = self.carrier.take_requests();
        self.seen.extend(requests.iter().cloned());
        requests
    }

    pub fn response(&self, saga_key: &SagaKey) -> NorthboundResponse {
        self.carrier
            .response_for(saga_key)
            .expect("a northbound response was sent")
    }
}
