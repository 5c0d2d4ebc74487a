//! Collaborators used by saga actions and their in-memory implementations.

pub mod carrier;
pub mod listener;
pub mod path_computer;
pub mod resource_manager;
pub mod rule_manager;

use std::sync::Arc;

use history::{HistoryRecorder, NoopRecorder};
use model::FlowRepository;

use crate::config::SagaConfig;

pub use carrier::{FlowCarrier, RecordingCarrier};
pub use listener::{FailureNotice, FlowEventListener, RecordingListener};
pub use path_computer::{ComputedPath, InMemoryPathComputer, LinkKey, PathComputer, PathRequest};
pub use resource_manager::{
    EncapsulationResources, InMemoryResourceManager, ResourceManager, ResourceRequest,
    YPointResources,
};
pub use rule_manager::{FlowRuleManager, RuleManager, RuleScope, merge_by_switch};

/// Everything a saga needs from the outside world.
#[derive(Clone)]
pub struct FlowServices {
    pub repository: Arc<dyn FlowRepository>,
    pub resources: Arc<dyn ResourceManager>,
    pub paths: Arc<dyn PathComputer>,
    pub rules: Arc<dyn RuleManager>,
    pub carrier: Arc<dyn FlowCarrier>,
    pub history: Arc<dyn HistoryRecorder>,
    pub listeners: Vec<Arc<dyn FlowEventListener>>,
    pub config: Arc<SagaConfig>,
}

impl FlowServices {
    /// Bundles the collaborators with no history, no listeners and the
    /// default configuration.
    pub fn new(
        repository: Arc<dyn FlowRepository>,
        resources: Arc<dyn ResourceManager>,
        paths: Arc<dyn PathComputer>,
        rules: Arc<dyn RuleManager>,
        carrier: Arc<dyn FlowCarrier>,
    ) -> Self {
        Self {
            repository,
            resources,
            paths,
            rules,
            carrier,
            history: Arc::new(NoopRecorder),
            listeners: Vec::new(),
            config: Arc::new(SagaConfig::default()),
        }
    }

    pub fn with_history(mut self, history: Arc<dyn HistoryRecorder>) -> Self {
        self.history = history;
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn FlowEventListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn with_config(mut self, config: SagaConfig) -> Self {
        self.config = Arc::new(config);
        self
    }
}

impl std::fmt::Debug for FlowServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowServices")
            .field("listeners", &self.listeners.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
