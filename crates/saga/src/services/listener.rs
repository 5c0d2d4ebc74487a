//! Completion callbacks for flow operations.

use std::sync::{Arc, Mutex, PoisonError};

use common::FlowId;

use crate::error::ErrorKind;

/// Notified once per saga when it reaches a terminal state.
///
/// Multipoint sagas report under the y-flow id.
pub trait FlowEventListener: Send + Sync {
    fn on_completed(&self, flow_id: &FlowId);

    fn on_failed(&self, flow_id: &FlowId, reason: &str, kind: ErrorKind);
}

/// A failure seen by [`RecordingListener`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureNotice {
    pub flow_id: FlowId,
    pub reason: String,
    pub kind: ErrorKind,
}

#[derive(Debug, Default)]
struct Notices {
    completed: Vec<FlowId>,
    failed: Vec<FailureNotice>,
}

/// Listener that keeps every notification.
#[derive(Debug, Clone, Default)]
pub struct RecordingListener {
    notices: Arc<Mutex<Notices>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn completed(&self) -> Vec<FlowId> {
        self.lock().completed.clone()
    }

    pub fn failed(&self) -> Vec<FailureNotice> {
        self.lock().failed.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Notices> {
        self.notices.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FlowEventListener for RecordingListener {
    fn on_completed(&self, flow_id: &FlowId) {
        self.lock().completed.push(flow_id.clone());
    }

    fn on_failed(&self, flow_id: &FlowId, reason: &str, kind: ErrorKind) {
        self.lock().failed.push(FailureNotice {
            flow_id: flow_id.clone(),
            reason: reason.to_string(),
            kind,
        });
    }
}
