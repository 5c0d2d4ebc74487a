//! Channels between the hub shards, the switch speaker and the requester.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use common::{FlowId, SagaKey};
use saga::{
    CommandKey, ErrorKind, FlowCarrier, FlowEventListener, NorthboundResponse, SpeakerRequest,
};
use tokio::sync::mpsc;

/// A speaker command on its way to a switch.
#[derive(Debug, Clone)]
pub struct SpeakerCommand {
    pub key: CommandKey,
    pub request: SpeakerRequest,
}

#[derive(Debug, Default)]
struct ResultLog {
    responses: HashMap<SagaKey, NorthboundResponse>,
    order: VecDeque<SagaKey>,
}

/// Final responses of finished sagas, oldest evicted first.
#[derive(Debug, Clone)]
pub struct SagaResults {
    log: Arc<Mutex<ResultLog>>,
    capacity: usize,
}

impl SagaResults {
    pub fn new(capacity: usize) -> Self {
        Self {
            log: Arc::new(Mutex::new(ResultLog::default())),
            capacity: capacity.max(1),
        }
    }

    pub fn insert(&self, saga_key: SagaKey, response: NorthboundResponse) {
        let mut log = self.lock();
        if log.responses.insert(saga_key.clone(), response).is_none() {
            log.order.push_back(saga_key);
        }
        while log.order.len() > self.capacity {
            if let Some(oldest) = log.order.pop_front() {
                log.responses.remove(&oldest);
            }
        }
    }

    pub fn get(&self, saga_key: &SagaKey) -> Option<NorthboundResponse> {
        self.lock().responses.get(saga_key).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ResultLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Carrier that hands speaker commands to the speaker task and keeps
/// northbound responses for the HTTP side.
#[derive(Debug, Clone)]
pub struct ChannelCarrier {
    speaker: mpsc::UnboundedSender<SpeakerCommand>,
    results: SagaResults,
}

impl ChannelCarrier {
    pub fn new(speaker: mpsc::UnboundedSender<SpeakerCommand>, results: SagaResults) -> Self {
        Self { speaker, results }
    }
}

impl FlowCarrier for ChannelCarrier {
    fn send_speaker_request(&self, key: CommandKey, request: SpeakerRequest) {
        if self.speaker.send(SpeakerCommand { key, request }).is_err() {
            tracing::warn!("speaker is gone, command dropped");
            metrics::counter!("speaker_send_failures_total").increment(1);
        }
    }

    fn send_northbound_response(&self, saga_key: &SagaKey, response: NorthboundResponse) {
        tracing::debug!(saga_key = %saga_key, success = response.is_success(), "northbound response");
        self.results.insert(saga_key.clone(), response);
    }

    fn cancel_timeout(&self, saga_key: &SagaKey) {
        // Saga timeouts are found by age on each shard tick.
        tracing::trace!(saga_key = %saga_key, "saga timer released");
    }
}

/// Logs every terminal flow notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingListener;

impl FlowEventListener for LoggingListener {
    fn on_completed(&self, flow_id: &FlowId) {
        tracing::info!(flow_id = %flow_id, "flow operation completed");
    }

    fn on_failed(&self, flow_id: &FlowId, reason: &str, kind: ErrorKind) {
        tracing::warn!(flow_id = %flow_id, kind = kind.as_str(), reason, "flow operation failed");
    }
}
