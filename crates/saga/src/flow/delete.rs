//! Flow delete saga.
//!
//! Rule removal is best effort: rules a switch refused to remove are kept
//! as cleanup debt and the flow is deleted anyway.

use std::sync::{Arc, LazyLock};

use serde::Serialize;

use crate::{
    event::FlowEvent,
    fsm::TransitionTable,
    wiring::{Builder, always_to, fail_to, go},
};

use super::{
    FlowContext, FlowTable, await_responses, fail_validation,
    actions::{
        StepPolicy, abandon_cleanup_commands, deallocate_old_resources, emit_remove_old,
        remove_flow, revert_flow_status, validate_delete,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeleteState {
    Initialized,
    FlowValidated,
    RemovingRules,
    RulesRemoved,
    PathsRemoved,
    ResourcesDeallocated,
    Finished,
    RevertingFlowStatus,
    FinishedWithError,
}

static TABLE: LazyLock<Arc<FlowTable<DeleteState>>> = LazyLock::new(build);

/// The shared delete table.
pub fn delete_table() -> Arc<FlowTable<DeleteState>> {
    Arc::clone(&TABLE)
}

fn build() -> Arc<FlowTable<DeleteState>> {
    use DeleteState::*;

    let mut b: Builder<DeleteState, FlowContext> = TransitionTable::builder(Initialized);

    go(&mut b, Initialized, FlowEvent::Next, FlowValidated, &[validate_delete]);
    fail_to(&mut b, Initialized, FinishedWithError, &[]);

    go(&mut b, FlowValidated, FlowEvent::Next, RemovingRules, &[emit_remove_old]);
    fail_validation(&mut b, FlowValidated, RevertingFlowStatus, FinishedWithError);

    await_responses(&mut b, RemovingRules, StepPolicy::BestEffort);
    for event in [FlowEvent::Next, FlowEvent::Error] {
        go(&mut b, RemovingRules, event, RulesRemoved, &[]);
    }
    go(
        &mut b,
        RemovingRules,
        FlowEvent::Timeout,
        RulesRemoved,
        &[abandon_cleanup_commands],
    );

    go(&mut b, RulesRemoved, FlowEvent::Next, PathsRemoved, &[remove_flow]);
    fail_to(&mut b, RulesRemoved, RevertingFlowStatus, &[revert_flow_status]);

    go(
        &mut b,
        PathsRemoved,
        FlowEvent::Next,
        ResourcesDeallocated,
        &[deallocate_old_resources],
    );
    fail_to(&mut b, PathsRemoved, RevertingFlowStatus, &[revert_flow_status]);

    always_to(&mut b, ResourcesDeallocated, Finished, &[]);
    always_to(&mut b, RevertingFlowStatus, FinishedWithError, &[]);

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
        let table = delete_table();
        let missing = table.missing_transitions(
            &FlowEvent::EVERYWHERE,
            &FlowEvent::RESTING,
            &FlowEvent::RUNNING,
        );
        assert!(missing.is_empty(), "missing transitions: {missing:?}");
        assert!(table.can_terminate());
    }
}
