use std::{collections::HashMap, time::Instant};

use common::{CommandId, FlowId, PathId};
use model::{Flow, FlowPath, FlowPathIds, FlowRepositoryExt, FlowResources, PathStatus};

use crate::{
    correlator::{PendingCommand, PendingCommands},
    error::SagaError,
    event::FlowEvent,
    fsm::{ActionResult, MachineContext},
    instance::{CleanupItem, SagaContext, SagaCore},
    messages::CommandKind,
};

use super::{
    FlowOperationRequest,
    actions::{revert_flow, revert_flow_status, revert_swap, update_flow_status},
};

/// Working data of one unicast or multi-destination flow saga.
#[derive(Debug)]
pub struct FlowContext {
    pub core: SagaCore,
    pub flow_id: FlowId,
    pub request: FlowOperationRequest,
    /// The flow as it was before the saga marked it in progress.
    pub original_flow: Option<Flow>,
    /// Set once a create saga has stored the new flow record.
    pub flow_created: bool,
    /// The flow as it should look once the saga completes.
    pub target: Option<Flow>,
    pub old_paths: FlowPathIds,
    pub new_paths: FlowPathIds,
    pub old_path_records: Vec<FlowPath>,
    pub new_path_records: Vec<FlowPath>,
    /// Statuses of the old paths right before the swap.
    pub old_path_statuses: HashMap<PathId, PathStatus>,
    pub old_resources: Vec<FlowResources>,
    pub new_resources: Vec<FlowResources>,
    pub pending: PendingCommands,
    pub non_ingress_attempted: bool,
    pub ingress_attempted: bool,
    /// The flow currently points at the new paths.
    pub swapped: bool,
    /// The new paths are installed and active; cleanup only moves forward.
    pub committed: bool,
}

impl FlowContext {
    pub fn new(core: SagaCore, request: FlowOperationRequest) -> Self {
        let config = core.config();
        let pending = PendingCommands::new(config.speaker_command_retries_limit, config.command_timeout);
        Self {
            flow_id: request.flow_id().clone(),
            core,
            request,
            original_flow: None,
            flow_created: false,
            target: None,
            old_paths: FlowPathIds::default(),
            new_paths: FlowPathIds::default(),
            old_path_records: Vec::new(),
            new_path_records: Vec::new(),
            old_path_statuses: HashMap::new(),
            old_resources: Vec::new(),
            new_resources: Vec::new(),
            pending,
            non_ingress_attempted: false,
            ingress_attempted: false,
            swapped: false,
            committed: false,
        }
    }

    pub fn target(&self) -> Result<&Flow, SagaError> {
        self.target
            .as_ref()
            .ok_or_else(|| SagaError::Internal(format!("no target state for flow {}", self.flow_id)))
    }

    /// True once the saga changed persisted state.
    pub fn mutated(&self) -> bool {
        self.original_flow.is_some() || self.flow_created
    }

    /// New records of the primary paths.
    pub fn new_primary_records(&self) -> Vec<FlowPath> {
        records_of(&self.new_path_records, self.new_paths.primary())
    }

    /// Old records of the primary paths.
    pub fn old_primary_records(&self) -> Vec<FlowPath> {
        records_of(&self.old_path_records, self.old_paths.primary())
    }

    pub fn old_record(&self, path_id: &PathId) -> Option<&FlowPath> {
        self.old_path_records.iter().find(|p| &p.path_id == path_id)
    }

    pub fn new_record(&self, path_id: &PathId) -> Option<&FlowPath> {
        self.new_path_records.iter().find(|p| &p.path_id == path_id)
    }

    /// Records the start of a rollback step with the failure that caused it.
    pub(crate) fn note_rollback(&self, step: &str) {
        let reason = self.core.failure_reason().unwrap_or("no failure recorded");
        tracing::info!(saga_key = %self.core.saga_key, step, reason, "rolling back");
        self.core.record_error(step, reason);
    }

    /// Runs a storage step outside the table; a failure is only a warning.
    fn run_cleanup(&mut self, step: fn(&mut FlowContext) -> ActionResult<FlowEvent>) {
        if let Err(e) = step(self) {
            self.core.warn(format!("Cleanup of an abandoned saga failed: {e}"));
        }
    }

    /// Removes path records, owing them when storage refuses.
    fn drop_paths(&mut self, path_ids: Vec<PathId>) -> Option<CleanupItem> {
        if path_ids.is_empty() {
            return None;
        }
        let result = self.core.services.repository.in_transaction(|tx| {
            for path_id in &path_ids {
                tx.remove_path(path_id)?;
            }
            Ok(())
        });
        match result {
            Ok(()) => None,
            Err(e) => {
                self.core.warn(format!("Failed to remove paths of an abandoned saga: {e}"));
                Some(CleanupItem::Paths {
                    flow_id: self.flow_id.clone(),
                    path_ids,
                })
            }
        }
    }

    /// Finishes a saga that already activated its new paths: the old paths
    /// go away and their leases are owed.
    fn finish_commit(&mut self) -> Vec<CleanupItem> {
        let retired: Vec<PathId> = self
            .old_paths
            .all()
            .into_iter()
            .filter(|id| !self.new_paths.contains(id))
            .cloned()
            .collect();
        let mut items: Vec<CleanupItem> = self.drop_paths(retired).into_iter().collect();
        items.extend(
            std::mem::take(&mut self.old_resources)
                .into_iter()
                .map(CleanupItem::Resources),
        );
        self.run_cleanup(update_flow_status);
        items
    }

    /// Puts storage back as it was before the saga: old paths, original
    /// attributes and status. New leases are owed.
    fn roll_back_storage(&mut self) -> Vec<CleanupItem> {
        self.run_cleanup(revert_swap);
        let mut items = Vec::new();
        if !self.swapped {
            let created: Vec<PathId> = self
                .new_path_records
                .iter()
                .map(|p| p.path_id.clone())
                .filter(|id| !self.old_paths.contains(id))
                .collect();
            items.extend(self.drop_paths(created));
        }
        items.extend(
            std::mem::take(&mut self.new_resources)
                .into_iter()
                .map(CleanupItem::Resources),
        );
        self.run_cleanup(revert_flow);
        self.run_cleanup(revert_flow_status);
        items
    }
}

fn records_of(records: &[FlowPath], ids: Vec<&PathId>) -> Vec<FlowPath> {
    ids.into_iter()
        .filter_map(|id| records.iter().find(|p| &p.path_id == id).cloned())
        .collect()
}

impl MachineContext for FlowContext {
    fn on_action_error(&mut self, error: &SagaError) {
        self.core.record_error("Action failed", error.to_string());
        self.core.fail(error.kind(), error.to_string());
    }
}

impl SagaContext for FlowContext {
    fn core(&self) -> &SagaCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SagaCore {
        &mut self.core
    }

    fn pending_command(&self, command_id: &CommandId) -> Option<&PendingCommand> {
        self.pending.get(command_id)
    }

    fn expired_commands(&self, now: Instant) -> Vec<CommandId> {
        self.pending.expired(now)
    }

    fn abandon(&mut self) -> Vec<CleanupItem> {
        let mut items: Vec<CleanupItem> = self
            .pending
            .abandon()
            .into_iter()
            .filter(|(_, pending)| pending.request.kind != CommandKind::Validate)
            .map(|(command_id, pending)| {
                let mut cookies: Vec<_> = pending.request.rules.iter().map(|r| r.cookie).collect();
                cookies.dedup();
                CleanupItem::StaleRules {
                    switch_id: pending.request.switch_id,
                    cookies,
                    reason: format!("command {command_id} abandoned"),
                }
            })
            .collect();

        if self.committed {
            items.extend(self.finish_commit());
        } else {
            items.extend(self.roll_back_storage());
        }
        items
    }
}
