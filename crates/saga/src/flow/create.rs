//! Flow create saga.

use std::sync::{Arc, LazyLock};

use serde::Serialize;

use crate::{
    event::FlowEvent,
    fsm::TransitionTable,
    wiring::{Builder, fail_to, go},
};

use super::{
    FlowContext, FlowTable, fail_validation,
    actions::{update_flow_status, validate_create},
    install::{install_states, wire_install},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CreateState {
    Initialized,
    FlowValidated,
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
    FlowStatusUpdated,
    Finished,
    RevertingPathsSwap,
    RevertingNewRules,
    RevertingAllocatedResources,
    RevertingFlow,
    RevertingFlowStatus,
    FinishedWithError,
}

install_states!(CreateState);

static TABLE: LazyLock<Arc<FlowTable<CreateState>>> = LazyLock::new(build);

/// The shared create table.
pub fn create_table() -> Arc<FlowTable<CreateState>> {
    Arc::clone(&TABLE)
}

fn build() -> Arc<FlowTable<CreateState>> {
    use CreateState::*;

    let mut b: Builder<CreateState, FlowContext> = TransitionTable::builder(Initialized);

    go(&mut b, Initialized, FlowEvent::Next, FlowValidated, &[validate_create]);
    fail_to(&mut b, Initialized, FinishedWithError, &[]);

    fail_validation(&mut b, FlowValidated, RevertingFlowStatus, FinishedWithError);

    wire_install(&mut b, FlowValidated);

    go(
        &mut b,
        NewPathsInstallationCompleted,
        FlowEvent::Next,
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
