//! Flow update and reroute sagas.
//!
//! Both move an existing flow onto new paths and share one table layout;
//! they differ in the validation step and in what the new paths are
//! computed from. A reroute that finds the current path again skips
//! straight to the status update.

use std::sync::{Arc, LazyLock};

use serde::Serialize;

use crate::{
    event::FlowEvent,
    fsm::TransitionTable,
    wiring::{Builder, Step, always_to, fail_to, go},
};

use super::{
    FlowContext, FlowTable, await_responses, fail_validation,
    actions::{
        StepPolicy, abandon_cleanup_commands, deallocate_old_resources, emit_remove_old,
        remove_old_paths, revert_flow, update_flow_attributes, update_flow_status,
        validate_reroute, validate_update,
    },
    install::{install_states, wire_install},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum UpdateState {
    Initialized,
    FlowValidated,
    FlowUpdated,
    PrimaryResourcesAllocated,
    ProtectedResourcesAllocated,
    ResourceAllocationCompleted,
    InstallingNonIngressRules,
    NonIngressRulesInstalled,
    ValidatingNonIngressRules,
    NonIngressRulesValidated,
    PathsSwapped,
    InstallingIngressRules,
    IngressRulesInstalled,
    ValidatingIngressRules,
    IngressRulesValidated,
    NewPathsInstallationCompleted,
    RemovingOldRules,
    OldRulesRemoved,
    OldPathsRemovalCompleted,
    OldResourcesDeallocated,
    FlowStatusUpdated,
    Finished,
    RevertingPathsSwap,
    RevertingNewRules,
    RevertingAllocatedResources,
    RevertingFlow,
    RevertingFlowStatus,
    FinishedWithError,
}

install_states!(UpdateState);

static UPDATE: LazyLock<Arc<FlowTable<UpdateState>>> = LazyLock::new(|| build(validate_update));
static REROUTE: LazyLock<Arc<FlowTable<UpdateState>>> = LazyLock::new(|| build(validate_reroute));

/// The shared update table.
pub fn update_table() -> Arc<FlowTable<UpdateState>> {
    Arc::clone(&UPDATE)
}

/// The shared reroute table.
pub fn reroute_table() -> Arc<FlowTable<UpdateState>> {
    Arc::clone(&REROUTE)
}

fn build(validate: Step<FlowContext>) -> Arc<FlowTable<UpdateState>> {
    use UpdateState::*;

    let mut b: Builder<UpdateState, FlowContext> = TransitionTable::builder(Initialized);

    go(&mut b, Initialized, FlowEvent::Next, FlowValidated, &[validate]);
    fail_to(&mut b, Initialized, FinishedWithError, &[]);

    go(
        &mut b,
        FlowValidated,
        FlowEvent::Next,
        FlowUpdated,
        &[update_flow_attributes],
    );
    fail_validation(&mut b, FlowValidated, RevertingFlowStatus, FinishedWithError);
    fail_to(&mut b, FlowUpdated, RevertingFlow, &[revert_flow]);

    wire_install(&mut b, FlowUpdated);
    go(
        &mut b,
        PrimaryResourcesAllocated,
        FlowEvent::PathUnchanged,
        OldResourcesDeallocated,
        &[],
    );

    go(
        &mut b,
        NewPathsInstallationCompleted,
        FlowEvent::Next,
        RemovingOldRules,
        &[emit_remove_old],
    );
    await_responses(&mut b, RemovingOldRules, StepPolicy::BestEffort);
    for event in [FlowEvent::Next, FlowEvent::Error] {
        go(&mut b, RemovingOldRules, event, OldRulesRemoved, &[]);
    }
    go(
        &mut b,
        RemovingOldRules,
        FlowEvent::Timeout,
        OldRulesRemoved,
        &[abandon_cleanup_commands],
    );

    always_to(
        &mut b,
        OldRulesRemoved,
        OldPathsRemovalCompleted,
        &[remove_old_paths],
    );
    always_to(
        &mut b,
        OldPathsRemovalCompleted,
        OldResourcesDeallocated,
        &[deallocate_old_resources],
    );
    always_to(
        &mut b,
        OldResourcesDeallocated,
        FlowStatusUpdated,
        &[update_flow_status],
    );
    go(&mut b, FlowStatusUpdated, FlowEvent::Next, Finished, &[]);
    fail_to(&mut b, FlowStatusUpdated, FinishedWithError, &[]);

    b.on_entry(Finished, |c, _| c.core.complete());
    b.on_entry(FinishedWithError, |c, _| c.core.abort());
    b.final_state(Finished).final_state(FinishedWithError);
    b.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_reachable_state_handles_required_events() {
        for table in [update_table(), reroute_table()] {
            let missing = table.missing_transitions(
                &FlowEvent::EVERYWHERE,
                &FlowEvent::RESTING,
                &FlowEvent::RUNNING,
            );
            assert!(missing.is_empty(), "missing transitions: {missing:?}");
            assert!(table.can_terminate());
        }
    }

    #[test]
    fn unchanged_path_skips_installation() {
        let table = update_table();
        assert!(table.has_transition(
            UpdateState::PrimaryResourcesAllocated,
            FlowEvent::PathUnchanged
        ));
    }
}
