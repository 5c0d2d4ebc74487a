//! Outbound side of the messaging fabric as seen by a saga.

use std::sync::{Arc, Mutex, PoisonError};

use common::SagaKey;

use crate::{
    correlator::CommandKey,
    messages::{NorthboundResponse, SpeakerRequest},
};

/// Sends saga output to switches and to the requester.
///
/// Sending never fails from the saga's view: transport retries belong to the
/// fabric, and a lost command surfaces as a command timeout.
pub trait FlowCarrier: Send + Sync {
    fn send_speaker_request(&self, key: CommandKey, request: SpeakerRequest);

    fn send_northbound_response(&self, saga_key: &SagaKey, response: NorthboundResponse);

    /// Stops the saga-level timer of a finished saga.
    fn cancel_timeout(&self, saga_key: &SagaKey);
}

#[derive(Debug, Default)]
struct CarrierLog {
    requests: Vec<(CommandKey, SpeakerRequest)>,
    responses: Vec<(SagaKey, NorthboundResponse)>,
    cancelled: Vec<SagaKey>,
}

/// Carrier that records everything it is asked to send.
#[derive(Debug, Clone, Default)]
pub struct RecordingCarrier {
    log: Arc<Mutex<CarrierLog>>,
}

impl RecordingCarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// All speaker requests sent so far.
    pub fn sent_requests(&self) -> Vec<(CommandKey, SpeakerRequest)> {
        self.lock().requests.clone()
    }

    /// Removes and returns the speaker requests sent so far.
    pub fn take_requests(&self) -> Vec<(CommandKey, SpeakerRequest)> {
        std::mem::take(&mut self.lock().requests)
    }

    pub fn northbound_responses(&self) -> Vec<(SagaKey, NorthboundResponse)> {
        self.lock().responses.clone()
    }

    /// The last response sent for `saga_key`.
    pub fn response_for(&self, saga_key: &SagaKey) -> Option<NorthboundResponse> {
        self.lock()
            .responses
            .iter()
            .rev()
            .find(|(key, _)| key == saga_key)
            .map(|(_, response)| response.clone())
    }

    pub fn cancelled_timeouts(&self) -> Vec<SagaKey> {
        self.lock().cancelled.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CarrierLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FlowCarrier for RecordingCarrier {
    fn send_speaker_request(&self, key: CommandKey, request: SpeakerRequest) {
        self.lock().requests.push((key, request));
    }

    fn send_northbound_response(&self, saga_key: &SagaKey, response: NorthboundResponse) {
        self.lock().responses.push((saga_key.clone(), response));
    }

    fn cancel_timeout(&self, saga_key: &SagaKey) {
        self.lock().cancelled.push(saga_key.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::CommandKind;
    use common::{CommandId, SwitchId};

    #[test]
    fn records_and_drains_requests() {
        let carrier = RecordingCarrier::new();
        let key = CommandKey::new(CommandId::new(), SagaKey::new("s1"));
        carrier.send_speaker_request(
            key.clone(),
            SpeakerRequest {
                switch_id: SwitchId::new(1),
                kind: CommandKind::Install,
                rules: Vec::new(),
            },
        );

        assert_eq!(carrier.sent_requests().len(), 1);
        let drained = carrier.take_requests();
        assert_eq!(drained[0].0, key);
        assert!(carrier.sent_requests().is_empty());
    }

    #[test]
    fn last_response_wins_per_key() {
        let carrier = RecordingCarrier::new();
        let key = SagaKey::new("s1");
        carrier.send_northbound_response(
            &key,
            NorthboundResponse::Success {
                subject: "F1".into(),
                operation: "update".into(),
            },
        );
        carrier.cancel_timeout(&key);

        assert!(carrier.response_for(&key).unwrap().is_success());
        assert!(carrier.response_for(&SagaKey::new("other")).is_none());
        assert_eq!(carrier.cancelled_timeouts(), vec![key]);
    }
}
