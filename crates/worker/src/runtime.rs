//! Wiring of hub shards, the simulated speaker and shared collaborators.
//!
//! ```text
//!   HTTP ──start──▶ ShardRouter ──hash(root key)──▶ Shard n (FlowHub)
//!                        ▲                               │
//!                        │ responses                     │ commands
//!                        └──────── SimulatedSpeaker ◀────┘
//! ```
//!
//! Every saga key is routed by its root, so a y-flow parent and its forked
//! sub-flow sagas always share one shard.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use common::SagaKey;
use history::HistoryRecorder;
use model::InMemoryFlowRepository;
use saga::{
    CommandKey, FlowHub, FlowRuleManager, FlowServices, HubError, InMemoryPathComputer,
    InMemoryResourceManager, SagaConfig, SpeakerResponse,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::{
    config::Config,
    error::WorkerError,
    fabric::{ChannelCarrier, LoggingListener, SagaResults},
    shard::{SagaRequest, Shard, ShardCommand, ShardStatus},
    speaker::SimulatedSpeaker,
};

const RESULT_CAPACITY: usize = 10_000;

/// Routes work to the shard owning a saga key.
#[derive(Debug, Clone)]
pub struct ShardRouter {
    shards: Arc<[mpsc::Sender<ShardCommand>]>,
}

impl ShardRouter {
    pub fn new(shards: Vec<mpsc::Sender<ShardCommand>>) -> Self {
        Self {
            shards: shards.into(),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Index of the shard owning `saga_key`.
    pub fn shard_index(&self, saga_key: &SagaKey) -> usize {
        let mut hasher = DefaultHasher::new();
        saga_key.root().hash(&mut hasher);
        (hasher.finish() % self.shards.len().max(1) as u64) as usize
    }

    fn shard(&self, saga_key: &SagaKey) -> Result<&mpsc::Sender<ShardCommand>, WorkerError> {
        self.shards
            .get(self.shard_index(saga_key))
            .ok_or(WorkerError::Unavailable)
    }

    /// Starts a saga and waits until the hub admitted or rejected it.
    pub async fn start(&self, saga_key: SagaKey, request: SagaRequest) -> Result<(), WorkerError> {
        let (reply, admitted) = oneshot::channel();
        self.shard(&saga_key)?
            .send(ShardCommand::Start {
                saga_key,
                request,
                reply,
            })
            .await
            .map_err(|_| WorkerError::Unavailable)?;
        let result: Result<(), HubError> = admitted.await.map_err(|_| WorkerError::Unavailable)?;
        result.map_err(WorkerError::from)
    }

    /// Hands a speaker response to the shard of its saga.
    pub async fn deliver(&self, key: CommandKey, response: SpeakerResponse) {
        let Ok(shard) = self.shard(&key.saga_key) else {
            return;
        };
        if shard
            .send(ShardCommand::SpeakerResponse { key, response })
            .await
            .is_err()
        {
            tracing::debug!("shard is gone, speaker response dropped");
        }
    }

    /// Status of every shard that is still running.
    pub async fn status(&self) -> Vec<ShardStatus> {
        let mut statuses = Vec::with_capacity(self.shards.len());
        for shard in self.shards.iter() {
            let (reply, status) = oneshot::channel();
            if shard.send(ShardCommand::Status { reply }).await.is_err() {
                continue;
            }
            if let Ok(status) = status.await {
                statuses.push(status);
            }
        }
        statuses
    }

    pub async fn shutdown(&self) {
        for shard in self.shards.iter() {
            let _ = shard.send(ShardCommand::Shutdown).await;
        }
    }
}

/// A running worker: shards, speaker and the collaborators they share.
pub struct Runtime {
    pub router: ShardRouter,
    pub results: SagaResults,
    pub repository: Arc<InMemoryFlowRepository>,
    pub resources: Arc<InMemoryResourceManager>,
    pub paths: Arc<InMemoryPathComputer>,
    tasks: Vec<JoinHandle<()>>,
}

impl Runtime {
    /// Spawns one task per shard plus the simulated speaker.
    pub fn spawn(config: &Config, saga_config: SagaConfig, history: Arc<dyn HistoryRecorder>) -> Self {
        let repository = Arc::new(InMemoryFlowRepository::new());
        let resources = Arc::new(InMemoryResourceManager::new());
        let paths = Arc::new(InMemoryPathComputer::new());
        let rules = Arc::new(FlowRuleManager::new());
        let results = SagaResults::new(RESULT_CAPACITY);
        let (speaker_tx, speaker_rx) = mpsc::unbounded_channel();

        let mut senders = Vec::with_capacity(config.hub_shards);
        let mut tasks = Vec::with_capacity(config.hub_shards + 1);
        for id in 0..config.hub_shards.max(1) {
            let carrier = Arc::new(ChannelCarrier::new(speaker_tx.clone(), results.clone()));
            let services = FlowServices::new(
                repository.clone(),
                resources.clone(),
                paths.clone(),
                rules.clone(),
                carrier,
            )
            .with_history(history.clone())
            .with_listener(Arc::new(LoggingListener))
            .with_config(saga_config.clone());

            let (shard, sender) = Shard::new(id, FlowHub::new(services), config.tick_interval);
            senders.push(sender);
            tasks.push(tokio::spawn(shard.run()));
        }
        drop(speaker_tx);

        let router = ShardRouter::new(senders);
        let speaker = SimulatedSpeaker::new(
            speaker_rx,
            router.clone(),
            config.speaker_delay,
            config.failing_switches.iter().copied(),
        );
        tasks.push(tokio::spawn(speaker.run()));

        tracing::info!(shards = router.shard_count(), "worker runtime started");
        Self {
            router,
            results,
            repository,
            resources,
            paths,
            tasks,
        }
    }

    /// Stops the shards and waits for every task to finish.
    pub async fn shutdown(self) {
        self.router.shutdown().await;
        drop(self.router);
        for task in self.tasks {
            let _ = task.await;
        }
        tracing::info!("worker runtime stopped");
    }
}
