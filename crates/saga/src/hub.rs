//! Registry of running sagas and the entry points of the orchestrator.
//!
//! The hub owns every in-flight saga instance, keyed by its correlation
//! key, and routes speaker responses, command timeouts and saga timeouts to
//! them. It is single-threaded: one hub serves one shard of keys and every
//! call runs to completion before the next one starts.
//!
//! ```text
//! start_* ──► admit ──► fire(NEXT) ──► settle ──► drain work queue
//!                                         │            │
//!                                         │            ├─ start child sagas
//!                                         │            └─ deliver child outcomes
//!                                         └─ terminal? ──► release flow, report to parent
//! ```

use std::{
    collections::{HashMap, VecDeque},
    time::Instant,
};

use common::{CommandId, FlowId, SagaKey};
use model::FlowRepositoryExt;
use serde::Serialize;

use crate::{
    correlator::{CommandKey, timeout_response},
    error::{ErrorKind, HubError, SagaError},
    event::{ChildOutcome, FlowEvent, Operation, SagaInput, SagaOutcome},
    flow::{
        FlowContext, FlowOperationRequest, FlowRequest, RerouteRequest, create::create_table,
        delete::delete_table, path_swap::path_swap_table, update::reroute_table,
        update::update_table,
    },
    fsm::StateMachine,
    instance::{ChildStart, CleanupEntry, CleanupItem, RunningSaga, SagaCore},
    messages::{NorthboundResponse, SpeakerRequest, SpeakerResponse},
    multipoint::{YFlowContext, YFlowOperationRequest, y_flow_table},
    services::FlowServices,
};

/// Deferred work produced while a saga handled an event.
#[derive(Debug)]
enum Work {
    StartChild {
        parent: SagaKey,
        child: ChildStart,
    },
    DeliverOutcome {
        parent: SagaKey,
        outcome: ChildOutcome,
    },
}

/// Read-only view of one running saga.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SagaSummary {
    pub saga_key: String,
    pub subject: String,
    pub operation: Operation,
    pub state: String,
    pub parent: Option<String>,
    pub age_ms: u64,
}

/// Hosts running sagas and dispatches events to them.
pub struct FlowHub {
    services: FlowServices,
    sagas: HashMap<SagaKey, Box<dyn RunningSaga>>,
    /// Flow or y-flow id to the saga that owns it.
    busy: HashMap<String, SagaKey>,
    work: VecDeque<Work>,
    cleanup_debt: Vec<CleanupEntry>,
}

impl FlowHub {
    pub fn new(services: FlowServices) -> Self {
        Self {
            services,
            sagas: HashMap::new(),
            busy: HashMap::new(),
            work: VecDeque::new(),
            cleanup_debt: Vec::new(),
        }
    }

    pub fn services(&self) -> &FlowServices {
        &self.services
    }

    #[tracing::instrument(skip(self, request), fields(flow_id = %request.flow_id))]
    pub fn start_create(&mut self, saga_key: SagaKey, request: FlowRequest) -> Result<(), HubError> {
        self.start_root(saga_key, FlowOperationRequest::Create(request))
    }

    #[tracing::instrument(skip(self, request), fields(flow_id = %request.flow_id))]
    pub fn start_update(&mut self, saga_key: SagaKey, request: FlowRequest) -> Result<(), HubError> {
        self.start_root(saga_key, FlowOperationRequest::Update(request))
    }

    #[tracing::instrument(skip(self, request), fields(flow_id = %request.flow_id))]
    pub fn start_reroute(
        &mut self,
        saga_key: SagaKey,
        request: RerouteRequest,
    ) -> Result<(), HubError> {
        self.start_root(saga_key, FlowOperationRequest::Reroute(request))
    }

    #[tracing::instrument(skip(self))]
    pub fn start_delete(&mut self, saga_key: SagaKey, flow_id: FlowId) -> Result<(), HubError> {
        self.start_root(saga_key, FlowOperationRequest::Delete(flow_id))
    }

    #[tracing::instrument(skip(self))]
    pub fn start_path_swap(&mut self, saga_key: SagaKey, flow_id: FlowId) -> Result<(), HubError> {
        self.start_root(saga_key, FlowOperationRequest::PathSwap(flow_id))
    }

    /// Starts a saga for any flow operation.
    pub fn start_flow(
        &mut self,
        saga_key: SagaKey,
        request: FlowOperationRequest,
    ) -> Result<(), HubError> {
        self.start_root(saga_key, request)
    }

    /// Starts a y-flow operation; one child saga runs per sub-flow.
    #[tracing::instrument(skip(self, request), fields(y_flow_id = %request.y_flow_id()))]
    pub fn start_multipoint(
        &mut self,
        saga_key: SagaKey,
        request: YFlowOperationRequest,
    ) -> Result<(), HubError> {
        let subject = request.y_flow_id().to_string();
        let operation = request.operation();
        self.admit(&saga_key, &subject, operation, true)?;

        let core = SagaCore::new(
            self.services.clone(),
            saga_key.clone(),
            subject.clone(),
            operation,
            None,
        );
        let machine = StateMachine::new(y_flow_table(), YFlowContext::new(core, request));
        let result = self.launch(saga_key, subject, operation, Box::new(machine));
        self.drain();
        result
    }

    fn start_root(
        &mut self,
        saga_key: SagaKey,
        request: FlowOperationRequest,
    ) -> Result<(), HubError> {
        let result = self.spawn_flow(saga_key, request, None);
        self.drain();
        result
    }

    fn spawn_flow(
        &mut self,
        saga_key: SagaKey,
        request: FlowOperationRequest,
        parent: Option<SagaKey>,
    ) -> Result<(), HubError> {
        let subject = request.flow_id().to_string();
        let operation = request.operation();
        self.admit(&saga_key, &subject, operation, parent.is_none())?;

        let core = SagaCore::new(
            self.services.clone(),
            saga_key.clone(),
            subject.clone(),
            operation,
            parent,
        );
        let context = FlowContext::new(core, request);
        let machine: Box<dyn RunningSaga> = match operation {
            Operation::Create => Box::new(StateMachine::new(create_table(), context)),
            Operation::Update => Box::new(StateMachine::new(update_table(), context)),
            Operation::Reroute => Box::new(StateMachine::new(reroute_table(), context)),
            Operation::Delete => Box::new(StateMachine::new(delete_table(), context)),
            Operation::PathSwap => Box::new(StateMachine::new(path_swap_table(), context)),
        };
        self.launch(saga_key, subject, operation, machine)
    }

    /// Rejects a saga whose key is taken, whose flow is owned by another
    /// saga, or that would overflow the registry.
    fn admit(
        &mut self,
        saga_key: &SagaKey,
        subject: &str,
        operation: Operation,
        root: bool,
    ) -> Result<(), HubError> {
        if self.sagas.contains_key(saga_key) {
            return Err(HubError::DuplicateKey(saga_key.clone()));
        }
        let rejection = if let Some(owner) = self.busy.get(subject) {
            Some(HubError::FlowBusy {
                subject: subject.to_string(),
                saga_key: owner.clone(),
            })
        } else if self.sagas.len() >= self.services.config.max_in_flight_sagas {
            Some(HubError::RegistryFull(self.services.config.max_in_flight_sagas))
        } else {
            None
        };
        let Some(error) = rejection else {
            return Ok(());
        };

        metrics::counter!("saga_rejected_total", "kind" => error.kind().as_str()).increment(1);
        tracing::warn!(saga_key = %saga_key, subject, error = %error, "saga rejected");
        if root {
            self.services.carrier.send_northbound_response(
                saga_key,
                NorthboundResponse::Error {
                    subject: subject.to_string(),
                    operation: operation.to_string(),
                    kind: error.kind(),
                    reason: error.to_string(),
                },
            );
        }
        Err(error)
    }

    fn launch(
        &mut self,
        saga_key: SagaKey,
        subject: String,
        operation: Operation,
        machine: Box<dyn RunningSaga>,
    ) -> Result<(), HubError> {
        machine
            .context()
            .core()
            .record_event(&format!("Flow {operation} operation started"));
        metrics::counter!("saga_started_total", "operation" => operation.as_str()).increment(1);
        tracing::info!(saga_key = %saga_key, subject = %subject, operation = %operation, "saga started");

        self.busy.insert(subject, saga_key.clone());
        self.sagas.insert(saga_key.clone(), machine);
        metrics::gauge!("sagas_in_flight").set(self.sagas.len() as f64);
        self.fire(&saga_key, FlowEvent::Next, &SagaInput::None)
    }

    fn fire(&mut self, saga_key: &SagaKey, event: FlowEvent, input: &SagaInput) -> Result<(), HubError> {
        let Some(machine) = self.sagas.get_mut(saga_key) else {
            return Err(HubError::UnknownKey(saga_key.to_string()));
        };
        let result = machine.fire(event, input);
        if let Err(e) = &result {
            tracing::error!(saga_key = %saga_key, event = ?event, error = %e, "state machine rejected event");
        }
        self.settle(saga_key);
        result.map_err(HubError::from)
    }

    /// Collects children and cleanup debt of a saga after it handled an
    /// event, and retires it once it reached a final state.
    fn settle(&mut self, saga_key: &SagaKey) {
        let Some(machine) = self.sagas.get_mut(saga_key) else {
            return;
        };
        let terminated = machine.is_terminated();
        let core = machine.context_mut().core_mut();
        let children = core.take_children();
        let debt = core.take_cleanup_debt();
        let subject = core.subject.clone();

        self.owe(saga_key, &subject, debt);
        self.work.extend(children.into_iter().map(|child| Work::StartChild {
            parent: saga_key.clone(),
            child,
        }));
        if terminated {
            self.retire(saga_key);
        }
    }

    fn owe(&mut self, saga_key: &SagaKey, subject: &str, items: Vec<CleanupItem>) {
        if items.is_empty() {
            return;
        }
        tracing::warn!(saga_key = %saga_key, subject, items = items.len(), "cleanup debt recorded");
        self.cleanup_debt
            .extend(items.into_iter().map(|item| CleanupEntry {
                saga_key: saga_key.clone(),
                subject: subject.to_string(),
                item,
            }));
        metrics::gauge!("cleanup_debt_items").set(self.cleanup_debt.len() as f64);
    }

    /// Drops a finished saga, frees its flow and reports to its parent.
    fn retire(&mut self, saga_key: &SagaKey) {
        let Some(machine) = self.sagas.remove(saga_key) else {
            return;
        };
        metrics::gauge!("sagas_in_flight").set(self.sagas.len() as f64);

        let core = machine.context().core();
        if self.busy.get(&core.subject) == Some(saga_key) {
            self.busy.remove(&core.subject);
        }
        if let (Some(parent), Some(outcome)) = (&core.parent, core.outcome()) {
            self.work.push_back(Work::DeliverOutcome {
                parent: parent.clone(),
                outcome: ChildOutcome {
                    saga_key: saga_key.clone(),
                    flow_id: FlowId::new(core.subject.as_str()),
                    outcome: outcome.clone(),
                },
            });
        }
    }

    fn drain(&mut self) {
        while let Some(work) = self.work.pop_front() {
            match work {
                Work::StartChild { parent, child } => {
                    let flow_id = child.request.flow_id().clone();
                    let child_key = child.saga_key.clone();
                    let started = self.spawn_flow(child.saga_key, child.request, Some(parent.clone()));
                    if let Err(e) = started {
                        if matches!(e, HubError::Engine(_)) {
                            // The child was admitted and reports on its own.
                            continue;
                        }
                        self.work.push_back(Work::DeliverOutcome {
                            parent,
                            outcome: ChildOutcome {
                                saga_key: child_key,
                                flow_id,
                                outcome: SagaOutcome::Failed {
                                    kind: e.kind(),
                                    reason: e.to_string(),
                                },
                            },
                        });
                    }
                }
                Work::DeliverOutcome { parent, outcome } => {
                    if !self.sagas.contains_key(&parent) {
                        tracing::debug!(parent = %parent, child = %outcome.saga_key, "parent saga is gone");
                        continue;
                    }
                    let event = if outcome.outcome.is_success() {
                        FlowEvent::ResponseReceived
                    } else {
                        FlowEvent::ErrorReceived
                    };
                    let child = outcome.saga_key.clone();
                    if let Err(e) = self.fire(&parent, event, &SagaInput::Child(outcome)) {
                        tracing::warn!(parent = %parent, child = %child, error = %e, "child outcome not applied");
                    }
                }
            }
        }
    }

    /// Routes a speaker response to the saga waiting for it.
    #[tracing::instrument(skip(self, response), fields(key = %key))]
    pub fn handle_async_response(
        &mut self,
        key: &CommandKey,
        mut response: SpeakerResponse,
    ) -> Result<(), HubError> {
        self.expect_command(key)?;
        response.command_id = key.command_id;
        let event = if response.outcome.is_success() {
            FlowEvent::ResponseReceived
        } else {
            FlowEvent::ErrorReceived
        };
        let result = self.fire(&key.saga_key, event, &SagaInput::Speaker(response));
        self.drain();
        result
    }

    /// Reports that a command got no response before its deadline. Counts
    /// against the retry budget of the command like any other failure.
    #[tracing::instrument(skip(self), fields(key = %key))]
    pub fn handle_command_timeout(&mut self, key: &CommandKey) -> Result<(), HubError> {
        let request = self.expect_command(key)?;
        metrics::counter!("speaker_command_timeouts_total").increment(1);
        self.handle_async_response(key, timeout_response(key.command_id, &request))
    }

    fn expect_command(&self, key: &CommandKey) -> Result<SpeakerRequest, HubError> {
        let Some(machine) = self.sagas.get(&key.saga_key) else {
            metrics::counter!("saga_unknown_key_total").increment(1);
            tracing::warn!(key = %key, "response for unknown saga ignored");
            return Err(HubError::UnknownKey(key.to_string()));
        };
        match machine.context().pending_command(&key.command_id) {
            Some(pending) => Ok(pending.request.clone()),
            None => {
                metrics::counter!("saga_unknown_key_total").increment(1);
                tracing::warn!(key = %key, "response for a command that is not pending ignored");
                Err(HubError::UnexpectedCommand {
                    saga_key: key.saga_key.clone(),
                    command_id: key.command_id,
                })
            }
        }
    }

    /// Reports that a saga as a whole ran out of time. The saga rolls back
    /// from here on its own command deadlines.
    #[tracing::instrument(skip(self))]
    pub fn handle_timeout(&mut self, saga_key: &SagaKey) -> Result<(), HubError> {
        let Some(machine) = self.sagas.get_mut(saga_key) else {
            metrics::counter!("saga_unknown_key_total").increment(1);
            return Err(HubError::UnknownKey(saga_key.to_string()));
        };
        machine.context_mut().core_mut().mark_timeout_delivered();
        metrics::counter!("saga_timeouts_total").increment(1);
        let result = self.fire(saga_key, FlowEvent::Timeout, &SagaInput::None);
        self.drain();
        result
    }

    /// Sagas running longer than the saga timeout that were not timed out yet.
    pub fn overdue_sagas(&self, now: Instant) -> Vec<SagaKey> {
        let timeout = self.services.config.saga_timeout;
        let mut overdue: Vec<SagaKey> = self
            .sagas
            .iter()
            .filter(|(_, m)| {
                let core = m.context().core();
                !core.timeout_delivered()
                    && now.saturating_duration_since(core.started_at) >= timeout
            })
            .map(|(key, _)| key.clone())
            .collect();
        overdue.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        overdue
    }

    /// Times out every pending command whose deadline passed. Returns the
    /// number of commands reported.
    pub fn sweep_command_deadlines(&mut self, now: Instant) -> usize {
        let mut expired: Vec<CommandKey> = self
            .sagas
            .iter()
            .flat_map(|(saga_key, machine)| {
                machine
                    .context()
                    .expired_commands(now)
                    .into_iter()
                    .map(|command_id: CommandId| CommandKey::new(command_id, saga_key.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        expired.sort_by(|a, b| a.saga_key.as_str().cmp(b.saga_key.as_str()));

        expired
            .iter()
            .filter(|key| self.handle_command_timeout(key).is_ok())
            .count()
    }

    /// Drops sagas older than the abandoned-saga TTL. Each is reported as
    /// failed with a timeout; whatever it still held becomes cleanup debt.
    pub fn expire_abandoned(&mut self, now: Instant) -> usize {
        let ttl = self.services.config.abandoned_saga_ttl;
        let mut expired: Vec<SagaKey> = self
            .sagas
            .iter()
            .filter(|(_, m)| now.saturating_duration_since(m.context().core().started_at) >= ttl)
            .map(|(key, _)| key.clone())
            .collect();
        expired.sort_by(|a, b| a.as_str().cmp(b.as_str()));

        for saga_key in &expired {
            let Some(machine) = self.sagas.get_mut(saga_key) else {
                continue;
            };
            let state = machine.state_name();
            let context = machine.context_mut();
            context
                .core_mut()
                .fail(ErrorKind::Timeout, format!("Saga expired in state {state}"));
            let mut items = context.abandon();
            let core = context.core_mut();
            core.abort();
            items.extend(core.take_cleanup_debt());
            let subject = core.subject.clone();

            metrics::counter!("saga_expired_total").increment(1);
            tracing::warn!(saga_key = %saga_key, subject = %subject, state = %state, "abandoned saga expired");
            self.owe(saga_key, &subject, items);
            self.retire(saga_key);
        }
        self.drain();
        expired.len()
    }

    /// Retries deallocation of leases and removal of path records left
    /// behind by best-effort cleanup. Stale rule entries are only reported.
    /// Returns the number of entries settled.
    pub fn retry_cleanup_debt(&mut self) -> usize {
        let resources = &self.services.resources;
        let repository = &self.services.repository;
        let before = self.cleanup_debt.len();
        self.cleanup_debt.retain(|entry| {
            let result = match &entry.item {
                CleanupItem::Resources(lease) => resources.deallocate(lease),
                CleanupItem::YPoint(lease) => resources.deallocate_y_point(lease),
                CleanupItem::Paths { path_ids, .. } => repository
                    .in_transaction(|tx| {
                        for path_id in path_ids {
                            tx.remove_path(path_id)?;
                        }
                        Ok(())
                    })
                    .map_err(SagaError::from),
                CleanupItem::StaleRules { .. } => return true,
            };
            match result {
                Ok(()) => false,
                Err(e) => {
                    tracing::debug!(saga_key = %entry.saga_key, error = %e, "cleanup retry failed");
                    true
                }
            }
        });
        let settled = before - self.cleanup_debt.len();
        metrics::counter!("cleanup_debt_settled_total").increment(settled as u64);
        metrics::gauge!("cleanup_debt_items").set(self.cleanup_debt.len() as f64);
        settled
    }

    pub fn cleanup_debt(&self) -> &[CleanupEntry] {
        &self.cleanup_debt
    }

    pub fn in_flight(&self) -> usize {
        self.sagas.len()
    }

    pub fn contains(&self, saga_key: &SagaKey) -> bool {
        self.sagas.contains_key(saga_key)
    }

    /// Name of the current state of a running saga.
    pub fn state_of(&self, saga_key: &SagaKey) -> Option<String> {
        self.sagas.get(saga_key).map(|m| m.state_name())
    }

    pub fn snapshot(&self) -> Vec<SagaSummary> {
        let now = Instant::now();
        let mut summaries: Vec<SagaSummary> = self
            .sagas
            .iter()
            .map(|(key, machine)| {
                let core = machine.context().core();
                SagaSummary {
                    saga_key: key.to_string(),
                    subject: core.subject.clone(),
                    operation: core.operation,
                    state: machine.state_name(),
                    parent: core.parent.as_ref().map(ToString::to_string),
                    age_ms: now.saturating_duration_since(core.started_at).as_millis() as u64,
                }
            })
            .collect();
        summaries.sort_by(|a, b| a.saga_key.cmp(&b.saga_key));
        summaries
    }
}

impl std::fmt::Debug for FlowHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowHub")
            .field("in_flight", &self.sagas.len())
            .field("cleanup_debt", &self.cleanup_debt.len())
            .finish_non_exhaustive()
    }
}
