//! Events, inputs and outcomes shared by every flow saga.

use common::{FlowId, SagaKey};
use serde::{Deserialize, Serialize};

use crate::{error::ErrorKind, fsm::MachineEvent, messages::SpeakerResponse};

/// Events driving every flow saga table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowEvent {
    Next,
    /// A successful switch or child response arrived.
    ResponseReceived,
    /// A failed switch or child response arrived, including command timeouts.
    ErrorReceived,
    /// The saga as a whole ran out of time.
    Timeout,
    NoPathFound,
    /// Reroute found the current path again.
    PathUnchanged,
    Error,
}

impl FlowEvent {
    /// Events every non-final state must handle.
    pub const EVERYWHERE: [FlowEvent; 2] = [FlowEvent::Error, FlowEvent::Timeout];
    /// Events states waiting for responses must handle.
    pub const RESTING: [FlowEvent; 2] = [FlowEvent::ResponseReceived, FlowEvent::ErrorReceived];
    /// Events the remaining states must handle.
    pub const RUNNING: [FlowEvent; 1] = [FlowEvent::Next];
}

impl MachineEvent for FlowEvent {
    fn next() -> Self {
        FlowEvent::Next
    }

    fn error() -> Self {
        FlowEvent::Error
    }
}

/// Payload delivered along with an external event.
#[derive(Debug, Clone, Default)]
pub enum SagaInput {
    #[default]
    None,
    Speaker(SpeakerResponse),
    Child(ChildOutcome),
}

/// Flow lifecycle operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Reroute,
    Delete,
    PathSwap,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Reroute => "reroute",
            Operation::Delete => "delete",
            Operation::PathSwap => "path_swap",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a saga ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SagaOutcome {
    /// Finished; warnings list best-effort steps that did not succeed.
    Completed { warnings: Vec<String> },
    Failed { kind: ErrorKind, reason: String },
}

impl SagaOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SagaOutcome::Completed { .. })
    }
}

/// Outcome of a child saga, delivered to its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildOutcome {
    pub saga_key: SagaKey,
    pub flow_id: FlowId,
    pub outcome: SagaOutcome,
}
