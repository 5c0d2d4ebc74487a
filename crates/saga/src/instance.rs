//! State shared by every saga instance and the type-erased view the hub keeps.

use std::time::Instant;

use common::{CommandId, Cookie, FlowId, PathId, SagaKey, SwitchId};
use history::{HistoryEntry, HistoryKind};
use model::FlowResources;

use crate::{
    config::SagaConfig,
    correlator::PendingCommand,
    error::{EngineError, ErrorKind},
    event::{FlowEvent, Operation, SagaInput, SagaOutcome},
    flow::FlowOperationRequest,
    fsm::{MachineContext, MachineState, StateMachine},
    messages::NorthboundResponse,
    services::{FlowServices, YPointResources},
};

/// Cleanup a saga could not finish on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupItem {
    /// A lease that failed to deallocate.
    Resources(FlowResources),
    YPoint(YPointResources),
    /// Path records an abandoned saga could not remove.
    Paths {
        flow_id: FlowId,
        path_ids: Vec<PathId>,
    },
    /// Rules left on a switch after a removal command failed. Reported only.
    StaleRules {
        switch_id: SwitchId,
        cookies: Vec<Cookie>,
        reason: String,
    },
}

/// A [`CleanupItem`] together with the saga that left it behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupEntry {
    pub saga_key: SagaKey,
    pub subject: String,
    pub item: CleanupItem,
}

/// A child saga requested by a parent.
#[derive(Debug, Clone)]
pub struct ChildStart {
    pub saga_key: SagaKey,
    pub request: FlowOperationRequest,
    pub mandatory: bool,
}

/// Bookkeeping every saga context carries.
pub struct SagaCore {
    pub services: FlowServices,
    pub saga_key: SagaKey,
    /// Flow or y-flow the saga operates on.
    pub subject: String,
    pub operation: Operation,
    pub parent: Option<SagaKey>,
    pub started_at: Instant,
    timeout_delivered: bool,
    error: Option<(ErrorKind, String)>,
    warnings: Vec<String>,
    cleanup_debt: Vec<CleanupItem>,
    children: Vec<ChildStart>,
    outcome: Option<SagaOutcome>,
}

impl SagaCore {
    pub fn new(
        services: FlowServices,
        saga_key: SagaKey,
        subject: impl Into<String>,
        operation: Operation,
        parent: Option<SagaKey>,
    ) -> Self {
        Self {
            services,
            saga_key,
            subject: subject.into(),
            operation,
            parent,
            started_at: Instant::now(),
            timeout_delivered: false,
            error: None,
            warnings: Vec::new(),
            cleanup_debt: Vec::new(),
            children: Vec::new(),
            outcome: None,
        }
    }

    pub fn config(&self) -> &SagaConfig {
        &self.services.config
    }

    fn subject_id(&self) -> FlowId {
        FlowId::new(self.subject.as_str())
    }

    fn write(&self, kind: HistoryKind, action: &str, details: Option<String>) {
        let mut builder = HistoryEntry::builder()
            .saga_key(self.saga_key.clone())
            .flow_id(self.subject_id())
            .kind(kind)
            .action(action);
        if let Some(details) = details {
            builder = builder.details(details);
        }
        if let Some(entry) = builder.try_build() {
            self.services.history.record(entry);
        }
    }

    /// Appends an action to the history trail.
    pub fn record(&self, action: &str) {
        self.write(HistoryKind::Action, action, None);
    }

    pub fn record_details(&self, action: &str, details: impl Into<String>) {
        self.write(HistoryKind::Action, action, Some(details.into()));
    }

    pub fn record_event(&self, action: &str) {
        self.write(HistoryKind::Event, action, None);
    }

    pub fn record_error(&self, action: &str, details: impl Into<String>) {
        self.write(HistoryKind::Error, action, Some(details.into()));
    }

    /// Records the failure reported at the end. The first failure wins.
    pub fn fail(&mut self, kind: ErrorKind, reason: impl Into<String>) {
        let reason = reason.into();
        if self.error.is_none() {
            tracing::warn!(saga_key = %self.saga_key, subject = %self.subject, kind = %kind, %reason, "saga failed");
            self.error = Some((kind, reason));
        }
    }

    /// Notes that the saga timeout fired; it fires once per saga.
    pub fn mark_timeout_delivered(&mut self) {
        self.timeout_delivered = true;
    }

    pub fn timeout_delivered(&self) -> bool {
        self.timeout_delivered
    }

    pub fn error(&self) -> Option<&(ErrorKind, String)> {
        self.error.as_ref()
    }

    /// Reason of the recorded failure, if any.
    pub fn failure_reason(&self) -> Option<&str> {
        self.error.as_ref().map(|(_, reason)| reason.as_str())
    }

    /// Notes a best-effort step that did not succeed.
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(saga_key = %self.saga_key, subject = %self.subject, %message, "cleanup step failed");
        self.record_error("Cleanup step failed", message.clone());
        self.warnings.push(message);
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn owe(&mut self, item: CleanupItem) {
        self.cleanup_debt.push(item);
    }

    pub fn spawn_child(&mut self, child: ChildStart) {
        self.children.push(child);
    }

    pub fn take_children(&mut self) -> Vec<ChildStart> {
        std::mem::take(&mut self.children)
    }

    pub fn take_cleanup_debt(&mut self) -> Vec<CleanupItem> {
        std::mem::take(&mut self.cleanup_debt)
    }

    pub fn outcome(&self) -> Option<&SagaOutcome> {
        self.outcome.as_ref()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Reports success: history, northbound response, listeners and metrics.
    pub fn complete(&mut self) {
        self.outcome = Some(SagaOutcome::Completed {
            warnings: self.warnings.clone(),
        });
        self.record(&format!("Flow {} operation completed", self.operation));

        if self.is_root() {
            self.services.carrier.send_northbound_response(
                &self.saga_key,
                NorthboundResponse::Success {
                    subject: self.subject.clone(),
                    operation: self.operation.to_string(),
                },
            );
        }
        self.services.carrier.cancel_timeout(&self.saga_key);
        let subject = self.subject_id();
        for listener in &self.services.listeners {
            listener.on_completed(&subject);
        }

        metrics::counter!("saga_completed_total", "operation" => self.operation.as_str())
            .increment(1);
        metrics::histogram!(
            "saga_duration_seconds",
            "operation" => self.operation.as_str(),
            "outcome" => "completed"
        )
        .record(self.started_at.elapsed().as_secs_f64());
        tracing::info!(
            saga_key = %self.saga_key,
            subject = %self.subject,
            operation = %self.operation,
            warnings = self.warnings.len(),
            "saga completed"
        );
    }

    /// Reports failure with the recorded error kind and reason.
    pub fn abort(&mut self) {
        let (kind, reason) = self
            .error
            .clone()
            .unwrap_or((ErrorKind::Internal, "unknown failure".to_string()));
        self.outcome = Some(SagaOutcome::Failed {
            kind,
            reason: reason.clone(),
        });
        self.record_error(
            &format!("Flow {} operation failed", self.operation),
            reason.clone(),
        );

        if self.is_root() {
            self.services.carrier.send_northbound_response(
                &self.saga_key,
                NorthboundResponse::Error {
                    subject: self.subject.clone(),
                    operation: self.operation.to_string(),
                    kind,
                    reason: reason.clone(),
                },
            );
        }
        self.services.carrier.cancel_timeout(&self.saga_key);
        let subject = self.subject_id();
        for listener in &self.services.listeners {
            listener.on_failed(&subject, &reason, kind);
        }

        metrics::counter!(
            "saga_failed_total",
            "operation" => self.operation.as_str(),
            "kind" => kind.as_str()
        )
        .increment(1);
        metrics::histogram!(
            "saga_duration_seconds",
            "operation" => self.operation.as_str(),
            "outcome" => "failed"
        )
        .record(self.started_at.elapsed().as_secs_f64());
        tracing::info!(
            saga_key = %self.saga_key,
            subject = %self.subject,
            operation = %self.operation,
            kind = %kind,
            %reason,
            "saga finished with error"
        );
    }
}

impl std::fmt::Debug for SagaCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaCore")
            .field("saga_key", &self.saga_key)
            .field("subject", &self.subject)
            .field("operation", &self.operation)
            .field("parent", &self.parent)
            .field("error", &self.error)
            .field("outcome", &self.outcome)
            .finish_non_exhaustive()
    }
}

/// Context of a saga kept in the hub registry.
pub trait SagaContext: MachineContext + Send + 'static {
    fn core(&self) -> &SagaCore;

    fn core_mut(&mut self) -> &mut SagaCore;

    /// The pending speaker command with this id, if the current step waits for it.
    fn pending_command(&self, _command_id: &CommandId) -> Option<&PendingCommand> {
        None
    }

    /// Pending commands whose deadline passed.
    fn expired_commands(&self, _now: Instant) -> Vec<CommandId> {
        Vec::new()
    }

    /// Drops all in-flight work of an abandoned saga, returning what must
    /// still be cleaned up.
    fn abandon(&mut self) -> Vec<CleanupItem> {
        Vec::new()
    }
}

/// Object-safe view of a running state machine.
pub trait RunningSaga: Send {
    fn fire(&mut self, event: FlowEvent, input: &SagaInput) -> Result<(), EngineError>;

    fn state_name(&self) -> String;

    fn is_terminated(&self) -> bool;

    fn context(&self) -> &dyn SagaContext;

    fn context_mut(&mut self) -> &mut dyn SagaContext;
}

impl<S, C> RunningSaga for StateMachine<S, FlowEvent, C, SagaInput>
where
    S: MachineState,
    C: SagaContext,
{
    fn fire(&mut self, event: FlowEvent, input: &SagaInput) -> Result<(), EngineError> {
        StateMachine::fire(self, event, input).map(|_| ())
    }

    fn state_name(&self) -> String {
        format!("{:?}", self.state())
    }

    fn is_terminated(&self) -> bool {
        StateMachine::is_terminated(self)
    }

    fn context(&self) -> &dyn SagaContext {
        let context: &C = StateMachine::context(self);
        context
    }

    fn context_mut(&mut self) -> &mut dyn SagaContext {
        let context: &mut C = StateMachine::context_mut(self);
        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use history::InMemoryRecorder;
    use model::InMemoryFlowRepository;

    use crate::services::{
        FlowRuleManager, InMemoryPathComputer, InMemoryResourceManager, RecordingCarrier,
        RecordingListener,
    };

    fn core(parent: Option<SagaKey>) -> (SagaCore, RecordingCarrier, RecordingListener, InMemoryRecorder) {
        let carrier = RecordingCarrier::new();
        let listener = RecordingListener::new();
        let history = InMemoryRecorder::new();
        let services = FlowServices::new(
            Arc::new(InMemoryFlowRepository::new()),
            Arc::new(InMemoryResourceManager::new()),
            Arc::new(InMemoryPathComputer::new()),
            Arc::new(FlowRuleManager::new()),
            Arc::new(carrier.clone()),
        )
        .with_history(Arc::new(history.clone()))
        .with_listener(Arc::new(listener.clone()));
        let core = SagaCore::new(services, SagaKey::new("k1"), "F1", Operation::Update, parent);
        (core, carrier, listener, history)
    }

    #[test]
    fn first_failure_wins() {
        let (mut core, ..) = core(None);
        core.fail(ErrorKind::NoPathFound, "no path");
        core.fail(ErrorKind::Internal, "later");
        assert_eq!(core.error(), Some(&(ErrorKind::NoPathFound, "no path".to_string())));
    }

    #[test]
    fn abort_reports_once_to_everyone() {
        let (mut core, carrier, listener, history) = core(None);
        core.fail(ErrorKind::Timeout, "switch 2 did not answer");
        core.abort();

        let response = carrier.response_for(&SagaKey::new("k1")).unwrap();
        assert_eq!(response.error_kind(), Some(ErrorKind::Timeout));
        assert_eq!(carrier.cancelled_timeouts(), vec![SagaKey::new("k1")]);
        assert_eq!(listener.failed().len(), 1);
        assert_eq!(listener.failed()[0].kind, ErrorKind::Timeout);
        assert!(!history.is_empty());
        assert!(matches!(core.outcome(), Some(SagaOutcome::Failed { .. })));
    }

    #[test]
    fn children_do_not_answer_northbound() {
        let (mut core, carrier, listener, _) = core(Some(SagaKey::new("parent")));
        core.warn("old rules left on switch 3");
        core.complete();

        assert!(carrier.northbound_responses().is_empty());
        assert_eq!(listener.completed(), vec![FlowId::new("F1")]);
        assert_eq!(
            core.outcome(),
            Some(&SagaOutcome::Completed {
                warnings: vec!["old rules left on switch 3".to_string()]
            })
        );
    }
}
