//! One hub shard: a task that owns a [`FlowHub`] and serializes every event
//! for the sagas routed to it.

use std::time::{Duration, Instant};

use common::SagaKey;
use saga::{
    CommandKey, FlowHub, FlowOperationRequest, HubError, SagaSummary, SpeakerResponse,
    YFlowOperationRequest,
};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

/// A flow or y-flow operation submitted to a shard.
#[derive(Debug, Clone)]
pub enum SagaRequest {
    Flow(FlowOperationRequest),
    YFlow(YFlowOperationRequest),
}

/// What a shard reports about itself.
#[derive(Debug, Clone, Serialize)]
pub struct ShardStatus {
    pub shard: usize,
    pub sagas: Vec<SagaSummary>,
    pub cleanup_debt: usize,
}

#[derive(Debug)]
pub enum ShardCommand {
    Start {
        saga_key: SagaKey,
        request: SagaRequest,
        reply: oneshot::Sender<Result<(), HubError>>,
    },
    SpeakerResponse {
        key: CommandKey,
        response: SpeakerResponse,
    },
    Status {
        reply: oneshot::Sender<ShardStatus>,
    },
    Shutdown,
}

pub struct Shard {
    id: usize,
    hub: FlowHub,
    commands: mpsc::Receiver<ShardCommand>,
    tick: Duration,
}

impl Shard {
    /// Creates a shard and the sender feeding it.
    pub fn new(id: usize, hub: FlowHub, tick: Duration) -> (Self, mpsc::Sender<ShardCommand>) {
        let (tx, commands) = mpsc::channel(1024);
        (
            Self {
                id,
                hub,
                commands,
                tick,
            },
            tx,
        )
    }

    /// Processes commands and periodic sweeps until shut down.
    pub async fn run(mut self) {
        tracing::info!(shard = self.id, "hub shard started");
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(ShardCommand::Shutdown) | None => break,
                    Some(command) => self.handle(command),
                },
                _ = ticker.tick() => self.sweep(Instant::now()),
            }
        }
        tracing::info!(shard = self.id, in_flight = self.hub.in_flight(), "hub shard stopped");
    }

    fn handle(&mut self, command: ShardCommand) {
        match command {
            ShardCommand::Start {
                saga_key,
                request,
                reply,
            } => {
                let result = match request {
                    SagaRequest::Flow(request) => self.hub.start_flow(saga_key, request),
                    SagaRequest::YFlow(request) => self.hub.start_multipoint(saga_key, request),
                };
                let _ = reply.send(result);
            }
            ShardCommand::SpeakerResponse { key, response } => {
                if let Err(e) = self.hub.handle_async_response(&key, response) {
                    tracing::debug!(shard = self.id, key = %key, error = %e, "speaker response dropped");
                }
            }
            ShardCommand::Status { reply } => {
                let _ = reply.send(ShardStatus {
                    shard: self.id,
                    sagas: self.hub.snapshot(),
                    cleanup_debt: self.hub.cleanup_debt().len(),
                });
            }
            ShardCommand::Shutdown => {}
        }
    }

    /// Fires saga timeouts, times out overdue commands, expires abandoned
    /// sagas and retries owed deallocations.
    fn sweep(&mut self, now: Instant) {
        for saga_key in self.hub.overdue_sagas(now) {
            if let Err(e) = self.hub.handle_timeout(&saga_key) {
                tracing::debug!(shard = self.id, saga_key = %saga_key, error = %e, "saga timeout not delivered");
            }
        }
        let timed_out = self.hub.sweep_command_deadlines(now);
        let expired = self.hub.expire_abandoned(now);
        let settled = if self.hub.cleanup_debt().is_empty() {
            0
        } else {
            self.hub.retry_cleanup_debt()
        };
        if timed_out + expired + settled > 0 {
            tracing::debug!(shard = self.id, timed_out, expired, settled, "shard sweep");
        }
    }
}
