//! Saga error types.

use common::{CommandId, SagaKey};
use model::RepositoryError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification reported to listeners and in the terminal response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    RequestInvalid,
    NotPermitted,
    InProgress,
    NoPathFound,
    ResourceAllocation,
    SpeakerFailure,
    Timeout,
    Persistence,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::AlreadyExists => "ALREADY_EXISTS",
            ErrorKind::RequestInvalid => "REQUEST_INVALID",
            ErrorKind::NotPermitted => "NOT_PERMITTED",
            ErrorKind::InProgress => "IN_PROGRESS",
            ErrorKind::NoPathFound => "NO_PATH_FOUND",
            ErrorKind::ResourceAllocation => "RESOURCE_ALLOCATION",
            ErrorKind::SpeakerFailure => "SPEAKER_FAILURE",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Persistence => "PERSISTENCE",
            ErrorKind::Internal => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by saga actions and collaborators.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SagaError {
    /// The request is rejected before anything is mutated.
    #[error("{message}")]
    Validation { kind: ErrorKind, message: String },

    #[error("No path found: {0}")]
    NoPathFound(String),

    /// Concurrent allocation clash; the caller may retry.
    #[error("Path allocation conflict: {0}")]
    PathConflict(String),

    /// Concurrent resource clash; the caller may retry.
    #[error("Resource allocation conflict: {0}")]
    ResourceConflict(String),

    #[error("Failed to allocate resources: {0}")]
    ResourceAllocation(String),

    #[error("Failed to deallocate resources: {0}")]
    ResourceDeallocation(String),

    #[error("Speaker command failed: {0}")]
    Speaker(String),

    #[error("Persistence error: {0}")]
    Repository(#[from] RepositoryError),

    /// Input delivered to an action did not match what it expects.
    #[error("Unexpected input: {0}")]
    UnexpectedInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SagaError {
    pub fn validation(kind: ErrorKind, message: impl Into<String>) -> Self {
        SagaError::Validation {
            kind,
            message: message.into(),
        }
    }

    /// Error kind reported for this failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SagaError::Validation { kind, .. } => *kind,
            SagaError::NoPathFound(_) | SagaError::PathConflict(_) => ErrorKind::NoPathFound,
            SagaError::ResourceConflict(_)
            | SagaError::ResourceAllocation(_)
            | SagaError::ResourceDeallocation(_) => ErrorKind::ResourceAllocation,
            SagaError::Speaker(_) => ErrorKind::SpeakerFailure,
            SagaError::Repository(RepositoryError::NotFound { .. }) => ErrorKind::NotFound,
            SagaError::Repository(_) => ErrorKind::Persistence,
            SagaError::UnexpectedInput(_) | SagaError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// True for clashes that are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SagaError::PathConflict(_) | SagaError::ResourceConflict(_)
        )
    }
}

/// Configuration defects detected by the state machine engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("No transition defined from {state} on {event}")]
    UndefinedTransition { state: String, event: String },

    #[error("No guard allowed a transition from {state} on {event}")]
    NoTransitionAllowed { state: String, event: String },

    #[error("Machine already terminated in {state}")]
    Terminated { state: String },

    #[error("Event chain did not settle after {steps} steps in {state}")]
    RunawayChain { state: String, steps: usize },
}

/// Rejections at the hub entry points.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HubError {
    #[error("Saga key {0} is already in use")]
    DuplicateKey(SagaKey),

    /// Another saga already owns the flow.
    #[error("{subject} is busy with saga {saga_key}")]
    FlowBusy { subject: String, saga_key: SagaKey },

    #[error("Unknown key: {0}")]
    UnknownKey(String),

    #[error("Command {command_id} is not expected by saga {saga_key}")]
    UnexpectedCommand {
        saga_key: SagaKey,
        command_id: CommandId,
    },

    #[error("Too many sagas in flight (limit {0})")]
    RegistryFull(usize),

    #[error("Malformed command key: {0}")]
    MalformedKey(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl HubError {
    /// Error kind reported to the requester of a rejected operation.
    pub fn kind(&self) -> ErrorKind {
        match self {
            HubError::DuplicateKey(_) => ErrorKind::AlreadyExists,
            HubError::FlowBusy { .. } => ErrorKind::InProgress,
            HubError::UnknownKey(_) | HubError::UnexpectedCommand { .. } => ErrorKind::NotFound,
            HubError::MalformedKey(_) => ErrorKind::RequestInvalid,
            HubError::RegistryFull(_) | HubError::Engine(_) => ErrorKind::Internal,
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
