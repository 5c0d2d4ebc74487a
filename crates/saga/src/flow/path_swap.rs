//! Path swap saga: the protected paths become primary and vice versa.
//!
//! No resources change hands. The swap itself is one storage transaction;
//! only the ingress rules are reinstalled on the new primary paths.

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
        StepPolicy, abandon_cleanup_commands, abandon_commands, complete_new_paths,
        emit_remove_old, emit_revert_rules, install_ingress_rules, revert_flow_status, revert_swap,
        swap_paths, update_flow_status, validate_ingress_rules, validate_swap,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PathSwapState {
    Initialized,
    FlowValidated,
    PathsSwapped,
    InstallingIngressRules,
    IngressRulesInstalled,
    ValidatingIngressRules,
    IngressRulesValidated,
    RemovingOldRules,
    OldRulesRemoved,
    FlowStatusUpdated,
    Finished,
    RevertingPathsSwap,
    RevertingNewRules,
    RevertingFlowStatus,
    FinishedWithError,
}

static TABLE: LazyLock<Arc<FlowTable<PathSwapState>>> = LazyLock::new(build);

/// The shared path swap table.
pub fn path_swap_table() -> Arc<FlowTable<PathSwapState>> {
    Arc::clone(&TABLE)
}

fn build() -> Arc<FlowTable<PathSwapState>> {
    use PathSwapState::*;

    let mut b: Builder<PathSwapState, FlowContext> = TransitionTable::builder(Initialized);

    go(&mut b, Initialized, FlowEvent::Next, FlowValidated, &[validate_swap]);
    fail_to(&mut b, Initialized, FinishedWithError, &[]);

    go(&mut b, FlowValidated, FlowEvent::Next, PathsSwapped, &[swap_paths]);
    fail_validation(&mut b, FlowValidated, RevertingFlowStatus, FinishedWithError);

    go(
        &mut b,
        PathsSwapped,
        FlowEvent::Next,
        InstallingIngressRules,
        &[install_ingress_rules],
    );
    await_responses(&mut b, InstallingIngressRules, StepPolicy::Strict);
    go(&mut b, InstallingIngressRules, FlowEvent::Next, IngressRulesInstalled, &[]);
    go(
        &mut b,
        IngressRulesInstalled,
        FlowEvent::Next,
        ValidatingIngressRules,
        &[validate_ingress_rules],
    );
    await_responses(&mut b, ValidatingIngressRules, StepPolicy::Strict);
    go(&mut b, ValidatingIngressRules, FlowEvent::Next, IngressRulesValidated, &[]);
    for from in [
        PathsSwapped,
        InstallingIngressRules,
        IngressRulesInstalled,
        ValidatingIngressRules,
        IngressRulesValidated,
    ] {
        go(&mut b, from, FlowEvent::Error, RevertingPathsSwap, &[revert_swap]);
        go(
            &mut b,
            from,
            FlowEvent::Timeout,
            RevertingPathsSwap,
            &[abandon_commands, revert_swap],
        );
    }

    go(
        &mut b,
        IngressRulesValidated,
        FlowEvent::Next,
        RemovingOldRules,
        &[complete_new_paths, emit_remove_old],
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
    always_to(&mut b, OldRulesRemoved, FlowStatusUpdated, &[update_flow_status]);
    go(&mut b, FlowStatusUpdated, FlowEvent::Next, Finished, &[]);
    fail_to(&mut b, FlowStatusUpdated, FinishedWithError, &[]);

    always_to(&mut b, RevertingPathsSwap, RevertingNewRules, &[emit_revert_rules]);
    await_responses(&mut b, RevertingNewRules, StepPolicy::BestEffort);
    for event in [FlowEvent::Next, FlowEvent::Error] {
        go(&mut b, RevertingNewRules, event, RevertingFlowStatus, &[revert_flow_status]);
    }
    go(
        &mut b,
        RevertingNewRules,
        FlowEvent::Timeout,
        RevertingFlowStatus,
        &[abandon_cleanup_commands, revert_flow_status],
    );
    always_to(&mut b, RevertingFlowStatus, FinishedWithError, &[]);

    b.on_entry(RevertingPathsSwap, |c, _| c.note_rollback("Reverting paths swap"));
    b.on_entry(RevertingNewRules, |c, _| c.note_rollback("Reverting new rules"));
    b.on_entry(Finished, |c, _| c.core.complete());
    b.on_entry(FinishedWithError, |c, _| c.core.abort());
    b.final_state(Finished).final_state(FinishedWithError);
    b.build()
}
