//! Correlation of asynchronous speaker commands with their sagas.
//!
//! Every command gets a fresh [`CommandId`]; joined with the owning saga key
//! it forms a [`CommandKey`] that the messaging fabric echoes back with the
//! response. [`PendingCommands`] tracks one fan-out step of a saga.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use common::{CommandId, SagaKey};

use crate::{
    error::HubError,
    messages::{SpeakerOutcome, SpeakerRequest, SpeakerResponse},
};

/// Compound key `(command id, saga key)` routing a response to its saga.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandKey {
    pub command_id: CommandId,
    pub saga_key: SagaKey,
}

impl CommandKey {
    pub fn new(command_id: CommandId, saga_key: SagaKey) -> Self {
        Self {
            command_id,
            saga_key,
        }
    }
}

impl std::fmt::Display for CommandKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.command_id, self.saga_key)
    }
}

impl std::str::FromStr for CommandKey {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (command, saga) = s
            .split_once(':')
            .ok_or_else(|| HubError::MalformedKey(s.to_string()))?;
        if saga.is_empty() {
            return Err(HubError::MalformedKey(s.to_string()));
        }
        let command_id = command
            .parse()
            .map_err(|_| HubError::MalformedKey(s.to_string()))?;
        Ok(Self::new(command_id, SagaKey::new(saga)))
    }
}

/// A command awaiting its response.
#[derive(Debug, Clone)]
pub struct PendingCommand {
    pub request: SpeakerRequest,
    pub attempts: u32,
    pub deadline: Instant,
}

/// A command that exhausted its retry budget.
#[derive(Debug, Clone)]
pub struct FailedCommand {
    pub command_id: CommandId,
    pub request: SpeakerRequest,
    pub reason: String,
    /// The last attempt got no answer before its deadline.
    pub timed_out: bool,
}

/// Result of matching one response.
#[derive(Debug, Clone)]
pub enum ResponseOutcome {
    /// No pending command has this id.
    Unknown,
    Completed,
    /// Send the request again under the same id.
    Retry(SpeakerRequest),
    /// Budget exhausted; the command is recorded as failed.
    Failed(String),
}

/// Commands of the current fan-out step.
#[derive(Debug, Clone)]
pub struct PendingCommands {
    pending: HashMap<CommandId, PendingCommand>,
    failed: Vec<FailedCommand>,
    retries_limit: u32,
    timeout: Duration,
}

impl PendingCommands {
    pub fn new(retries_limit: u32, timeout: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            failed: Vec::new(),
            retries_limit,
            timeout,
        }
    }

    /// Starts tracking a freshly sent command.
    pub fn track(&mut self, command_id: CommandId, request: SpeakerRequest, now: Instant) {
        self.pending.insert(
            command_id,
            PendingCommand {
                request,
                attempts: 1,
                deadline: now + self.timeout,
            },
        );
    }

    pub fn contains(&self, command_id: &CommandId) -> bool {
        self.pending.contains_key(command_id)
    }

    pub fn get(&self, command_id: &CommandId) -> Option<&PendingCommand> {
        self.pending.get(command_id)
    }

    /// Matches a response against the pending set.
    ///
    /// Failures are retried until `retries_limit` extra attempts were made.
    pub fn on_response(&mut self, response: &SpeakerResponse, now: Instant) -> ResponseOutcome {
        let Some(entry) = self.pending.get_mut(&response.command_id) else {
            return ResponseOutcome::Unknown;
        };

        if response.outcome.is_success() {
            self.pending.remove(&response.command_id);
            return ResponseOutcome::Completed;
        }

        if entry.attempts <= self.retries_limit {
            entry.attempts += 1;
            entry.deadline = now + self.timeout;
            return ResponseOutcome::Retry(entry.request.clone());
        }

        let reason = response.outcome.describe();
        if let Some(entry) = self.pending.remove(&response.command_id) {
            self.failed.push(FailedCommand {
                command_id: response.command_id,
                request: entry.request,
                reason: reason.clone(),
                timed_out: response.outcome == SpeakerOutcome::Timeout,
            });
        }
        ResponseOutcome::Failed(reason)
    }

    /// Commands whose deadline passed.
    pub fn expired(&self, now: Instant) -> Vec<CommandId> {
        self.pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(id, _)| *id)
            .collect()
    }

    /// True once every command of the step is accounted for.
    pub fn is_settled(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    pub fn failed(&self) -> &[FailedCommand] {
        &self.failed
    }

    /// Abandons the step, returning what was still pending.
    pub fn abandon(&mut self) -> Vec<(CommandId, PendingCommand)> {
        self.failed.clear();
        self.pending.drain().collect()
    }

    /// Starts a new step: forgets failures of the previous one.
    pub fn reset(&mut self) -> Vec<FailedCommand> {
        self.pending.clear();
        std::mem::take(&mut self.failed)
    }
}

/// Builds a timeout response for a command whose deadline passed.
pub fn timeout_response(command_id: CommandId, request: &SpeakerRequest) -> SpeakerResponse {
    SpeakerResponse {
        command_id,
        switch_id: request.switch_id,
        outcome: SpeakerOutcome::Timeout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::CommandKind;
    use common::SwitchId;

    fn request(dpid: u64) -> SpeakerRequest {
        SpeakerRequest {
            switch_id: SwitchId::new(dpid),
            kind: CommandKind::Install,
            rules: Vec::new(),
        }
    }

    #[test]
    fn command_key_round_trips_through_text() {
        let key = CommandKey::new(CommandId::new(), SagaKey::new("parent/F1"));
        let parsed: CommandKey = key.to_string().parse().unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn malformed_keys_are_rejected() {
        assert!("no-separator".parse::<CommandKey>().is_err());
        assert!("not-a-uuid:saga".parse::<CommandKey>().is_err());
        assert!(format!("{}:", CommandId::new()).parse::<CommandKey>().is_err());
    }

    #[test]
    fn step_settles_when_all_commands_answer() {
        let now = Instant::now();
        let mut pending = PendingCommands::new(3, Duration::from_secs(1));
        let (a, b) = (CommandId::new(), CommandId::new());
        pending.track(a, request(1), now);
        pending.track(b, request(2), now);

        assert!(matches!(
            pending.on_response(&SpeakerResponse::success(a, SwitchId::new(1)), now),
            ResponseOutcome::Completed
        ));
        assert!(!pending.is_settled());
        pending.on_response(&SpeakerResponse::success(b, SwitchId::new(2)), now);
        assert!(pending.is_settled());
    }

    #[test]
    fn duplicate_response_is_unknown() {
        let now = Instant::now();
        let mut pending = PendingCommands::new(3, Duration::from_secs(1));
        let id = CommandId::new();
        pending.track(id, request(1), now);

        let response = SpeakerResponse::success(id, SwitchId::new(1));
        pending.on_response(&response, now);
        assert!(matches!(
            pending.on_response(&response, now),
            ResponseOutcome::Unknown
        ));
    }

    #[test]
    fn failures_retry_until_budget_is_spent() {
        let now = Instant::now();
        let mut pending = PendingCommands::new(2, Duration::from_secs(1));
        let id = CommandId::new();
        pending.track(id, request(1), now);
        let failure = SpeakerResponse::failure(id, SwitchId::new(1), "table full");

        assert!(matches!(pending.on_response(&failure, now), ResponseOutcome::Retry(_)));
        assert!(matches!(pending.on_response(&failure, now), ResponseOutcome::Retry(_)));
        assert!(matches!(
            pending.on_response(&failure, now),
            ResponseOutcome::Failed(_)
        ));
        assert!(pending.is_settled());
        assert_eq!(pending.failed().len(), 1);
    }

    #[test]
    fn expired_commands_are_reported() {
        let now = Instant::now();
        let mut pending = PendingCommands::new(0, Duration::from_millis(10));
        let id = CommandId::new();
        pending.track(id, request(1), now);

        assert!(pending.expired(now).is_empty());
        assert_eq!(pending.expired(now + Duration::from_millis(10)), vec![id]);
    }
}
