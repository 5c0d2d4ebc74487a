//! Messages exchanged with switch-facing agents and the requester.

use common::{CommandId, Cookie, EncapsulationId, FlowId, GroupId, MeterId, PathId, SwitchId};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// What a speaker command asks the switch agent to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    Install,
    Remove,
    /// Check that the rules are present as expected.
    Validate,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Install => "install",
            CommandKind::Remove => "remove",
            CommandKind::Validate => "validate",
        }
    }
}

/// Role of a rule on its switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleKind {
    /// Matches customer traffic at the flow source and applies the meter.
    Ingress,
    Transit,
    Egress,
    /// Replicates traffic to several branches at a split switch.
    Group,
}

/// One forwarding rule, identified on its switch by cookie and path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRule {
    pub kind: RuleKind,
    pub flow_id: FlowId,
    pub path_id: PathId,
    pub cookie: Cookie,
    pub in_port: u32,
    pub out_ports: Vec<u32>,
    pub meter_id: Option<MeterId>,
    pub group_id: Option<GroupId>,
    pub encapsulation_id: Option<EncapsulationId>,
}

/// A batch of rule operations for one switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakerRequest {
    pub switch_id: SwitchId,
    pub kind: CommandKind,
    pub rules: Vec<FlowRule>,
}

impl SpeakerRequest {
    /// The same rules, as a validation request.
    pub fn to_validation(&self) -> Self {
        Self {
            kind: CommandKind::Validate,
            ..self.clone()
        }
    }

    /// The same rules, as a removal request.
    pub fn to_removal(&self) -> Self {
        Self {
            kind: CommandKind::Remove,
            ..self.clone()
        }
    }
}

/// Result reported by the switch agent for one command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpeakerOutcome {
    Success,
    /// Validation found rules missing or different.
    Mismatch(String),
    Failure(String),
    /// No answer arrived before the command deadline.
    Timeout,
}

impl SpeakerOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SpeakerOutcome::Success)
    }

    pub fn describe(&self) -> String {
        match self {
            SpeakerOutcome::Success => "success".to_string(),
            SpeakerOutcome::Mismatch(details) => format!("validation mismatch: {details}"),
            SpeakerOutcome::Failure(reason) => reason.clone(),
            SpeakerOutcome::Timeout => "no response before deadline".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakerResponse {
    pub command_id: CommandId,
    pub switch_id: SwitchId,
    pub outcome: SpeakerOutcome,
}

impl SpeakerResponse {
    pub fn success(command_id: CommandId, switch_id: SwitchId) -> Self {
        Self {
            command_id,
            switch_id,
            outcome: SpeakerOutcome::Success,
        }
    }

    pub fn failure(command_id: CommandId, switch_id: SwitchId, reason: impl Into<String>) -> Self {
        Self {
            command_id,
            switch_id,
            outcome: SpeakerOutcome::Failure(reason.into()),
        }
    }
}

/// Final message sent back to the requester of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NorthboundResponse {
    Success {
        subject: String,
        operation: String,
    },
    Error {
        subject: String,
        operation: String,
        kind: ErrorKind,
        reason: String,
    },
}

impl NorthboundResponse {
    pub fn is_success(&self) -> bool {
        matches!(self, NorthboundResponse::Success { .. })
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            NorthboundResponse::Error { kind, .. } => Some(*kind),
            NorthboundResponse::Success { .. } => None,
        }
    }
}
