//! The part of the create, update and reroute tables that allocates new
//! paths, installs them and rolls them back.
//!
//! ```text
//! entry ─► PrimaryResourcesAllocated ─► ProtectedResourcesAllocated ─► ResourceAllocationCompleted
//!   ─► InstallingNonIngressRules ─► NonIngressRulesInstalled ─► ValidatingNonIngressRules
//!   ─► NonIngressRulesValidated ─► PathsSwapped ─► InstallingIngressRules ─► IngressRulesInstalled
//!   ─► ValidatingIngressRules ─► IngressRulesValidated ─► NewPathsInstallationCompleted ─► (operation)
//!
//! failure after the swap:  RevertingPathsSwap ─► RevertingNewRules ─┐
//! failure before the swap:                      RevertingNewRules ─┤
//! failure while allocating:                                        ├► RevertingAllocatedResources
//!   ─► RevertingFlow ─► RevertingFlowStatus ─► FinishedWithError
//! ```
//!
//! The flow points at its new paths only between `PathsSwapped` and the end
//! of the saga, so a failure before that point leaves traffic untouched.

use crate::{
    event::FlowEvent,
    fsm::MachineState,
    wiring::{Builder, Step, always_to, fail_to, go},
};

use super::{
    FlowContext, await_responses,
    actions::{
        StepPolicy, abandon_cleanup_commands, abandon_commands, allocate_primary,
        allocate_protected, complete_new_paths, emit_revert_rules, install_ingress_rules,
        install_non_ingress_rules, revert_allocated_resources, revert_flow, revert_flow_status,
        revert_swap, swap_paths, validate_ingress_rules, validate_non_ingress_rules,
    },
};

/// States a table must have to embed the installation part.
pub trait InstallStates: MachineState {
    const PRIMARY_RESOURCES_ALLOCATED: Self;
    const PROTECTED_RESOURCES_ALLOCATED: Self;
    const RESOURCE_ALLOCATION_COMPLETED: Self;
    const INSTALLING_NON_INGRESS_RULES: Self;
    const NON_INGRESS_RULES_INSTALLED: Self;
    const VALIDATING_NON_INGRESS_RULES: Self;
    const NON_INGRESS_RULES_VALIDATED: Self;
    const PATHS_SWAPPED: Self;
    const INSTALLING_INGRESS_RULES: Self;
    const INGRESS_RULES_INSTALLED: Self;
    const VALIDATING_INGRESS_RULES: Self;
    const INGRESS_RULES_VALIDATED: Self;
    const NEW_PATHS_INSTALLATION_COMPLETED: Self;
    const REVERTING_PATHS_SWAP: Self;
    const REVERTING_NEW_RULES: Self;
    const REVERTING_ALLOCATED_RESOURCES: Self;
    const REVERTING_FLOW: Self;
    const REVERTING_FLOW_STATUS: Self;
    const FINISHED_WITH_ERROR: Self;
}

/// Implements [`InstallStates`] for a state enum with the usual variant names.
macro_rules! install_states {
    ($state:ident) => {
        impl $crate::flow::install::InstallStates for $state {
            const PRIMARY_RESOURCES_ALLOCATED: Self = $state::PrimaryResourcesAllocated;
            const PROTECTED_RESOURCES_ALLOCATED: Self = $state::ProtectedResourcesAllocated;
            const RESOURCE_ALLOCATION_COMPLETED: Self = $state::ResourceAllocationCompleted;
            const INSTALLING_NON_INGRESS_RULES: Self = $state::InstallingNonIngressRules;
            const NON_INGRESS_RULES_INSTALLED: Self = $state::NonIngressRulesInstalled;
            const VALIDATING_NON_INGRESS_RULES: Self = $state::ValidatingNonIngressRules;
            const NON_INGRESS_RULES_VALIDATED: Self = $state::NonIngressRulesValidated;
            const PATHS_SWAPPED: Self = $state::PathsSwapped;
            const INSTALLING_INGRESS_RULES: Self = $state::InstallingIngressRules;
            const INGRESS_RULES_INSTALLED: Self = $state::IngressRulesInstalled;
            const VALIDATING_INGRESS_RULES: Self = $state::ValidatingIngressRules;
            const INGRESS_RULES_VALIDATED: Self = $state::IngressRulesValidated;
            const NEW_PATHS_INSTALLATION_COMPLETED: Self = $state::NewPathsInstallationCompleted;
            const REVERTING_PATHS_SWAP: Self = $state::RevertingPathsSwap;
            const REVERTING_NEW_RULES: Self = $state::RevertingNewRules;
            const REVERTING_ALLOCATED_RESOURCES: Self = $state::RevertingAllocatedResources;
            const REVERTING_FLOW: Self = $state::RevertingFlow;
            const REVERTING_FLOW_STATUS: Self = $state::RevertingFlowStatus;
            const FINISHED_WITH_ERROR: Self = $state::FinishedWithError;
        }
    };
}

pub(crate) use install_states;

/// An awaiting step that moves on to `to` once its commands settle.
fn command_step<S: InstallStates>(
    b: &mut Builder<S, FlowContext>,
    state: S,
    to: S,
    policy: StepPolicy,
) {
    await_responses(b, state, policy);
    go(b, state, FlowEvent::Next, to, &[]);
}

/// Records each entry into the rule rollback states.
fn wire_rollback_notes<S: InstallStates>(b: &mut Builder<S, FlowContext>) {
    b.on_entry(S::REVERTING_PATHS_SWAP, |c, _| c.note_rollback("Reverting paths swap"));
    b.on_entry(S::REVERTING_NEW_RULES, |c, _| c.note_rollback("Reverting new rules"));
}

/// Adds the installation rows. `entry` raises `NEXT` once the flow is
/// validated and, for updates, its new attributes are stored.
///
/// `NewPathsInstallationCompleted --NEXT-->` is left to the caller.
pub fn wire_install<S: InstallStates>(b: &mut Builder<S, FlowContext>, entry: S) {
    let revert_resources: &[Step<FlowContext>] = &[revert_allocated_resources];

    go(b, entry, FlowEvent::Next, S::PRIMARY_RESOURCES_ALLOCATED, &[allocate_primary]);
    go(
        b,
        S::PRIMARY_RESOURCES_ALLOCATED,
        FlowEvent::Next,
        S::PROTECTED_RESOURCES_ALLOCATED,
        &[allocate_protected],
    );
    go(
        b,
        S::PROTECTED_RESOURCES_ALLOCATED,
        FlowEvent::Next,
        S::RESOURCE_ALLOCATION_COMPLETED,
        &[],
    );
    for from in [
        S::PRIMARY_RESOURCES_ALLOCATED,
        S::PROTECTED_RESOURCES_ALLOCATED,
        S::RESOURCE_ALLOCATION_COMPLETED,
    ] {
        go(b, from, FlowEvent::NoPathFound, S::REVERTING_ALLOCATED_RESOURCES, revert_resources);
        fail_to(b, from, S::REVERTING_ALLOCATED_RESOURCES, revert_resources);
    }

    go(
        b,
        S::RESOURCE_ALLOCATION_COMPLETED,
        FlowEvent::Next,
        S::INSTALLING_NON_INGRESS_RULES,
        &[install_non_ingress_rules],
    );
    command_step(
        b,
        S::INSTALLING_NON_INGRESS_RULES,
        S::NON_INGRESS_RULES_INSTALLED,
        StepPolicy::Strict,
    );
    go(
        b,
        S::NON_INGRESS_RULES_INSTALLED,
        FlowEvent::Next,
        S::VALIDATING_NON_INGRESS_RULES,
        &[validate_non_ingress_rules],
    );
    command_step(
        b,
        S::VALIDATING_NON_INGRESS_RULES,
        S::NON_INGRESS_RULES_VALIDATED,
        StepPolicy::Strict,
    );
    go(
        b,
        S::NON_INGRESS_RULES_VALIDATED,
        FlowEvent::Next,
        S::PATHS_SWAPPED,
        &[swap_paths],
    );
    for from in [
        S::INSTALLING_NON_INGRESS_RULES,
        S::NON_INGRESS_RULES_INSTALLED,
        S::VALIDATING_NON_INGRESS_RULES,
        S::NON_INGRESS_RULES_VALIDATED,
    ] {
        go(b, from, FlowEvent::Error, S::REVERTING_NEW_RULES, &[emit_revert_rules]);
        go(
            b,
            from,
            FlowEvent::Timeout,
            S::REVERTING_NEW_RULES,
            &[abandon_commands, emit_revert_rules],
        );
    }

    go(
        b,
        S::PATHS_SWAPPED,
        FlowEvent::Next,
        S::INSTALLING_INGRESS_RULES,
        &[install_ingress_rules],
    );
    command_step(
        b,
        S::INSTALLING_INGRESS_RULES,
        S::INGRESS_RULES_INSTALLED,
        StepPolicy::Strict,
    );
    go(
        b,
        S::INGRESS_RULES_INSTALLED,
        FlowEvent::Next,
        S::VALIDATING_INGRESS_RULES,
        &[validate_ingress_rules],
    );
    command_step(
        b,
        S::VALIDATING_INGRESS_RULES,
        S::INGRESS_RULES_VALIDATED,
        StepPolicy::Strict,
    );
    go(
        b,
        S::INGRESS_RULES_VALIDATED,
        FlowEvent::Next,
        S::NEW_PATHS_INSTALLATION_COMPLETED,
        &[complete_new_paths],
    );
    for from in [
        S::PATHS_SWAPPED,
        S::INSTALLING_INGRESS_RULES,
        S::INGRESS_RULES_INSTALLED,
        S::VALIDATING_INGRESS_RULES,
        S::INGRESS_RULES_VALIDATED,
        S::NEW_PATHS_INSTALLATION_COMPLETED,
    ] {
        go(b, from, FlowEvent::Error, S::REVERTING_PATHS_SWAP, &[revert_swap]);
        go(
            b,
            from,
            FlowEvent::Timeout,
            S::REVERTING_PATHS_SWAP,
            &[abandon_commands, revert_swap],
        );
    }

    wire_rollback_notes(b);
    always_to(
        b,
        S::REVERTING_PATHS_SWAP,
        S::REVERTING_NEW_RULES,
        &[emit_revert_rules],
    );
    await_responses(b, S::REVERTING_NEW_RULES, StepPolicy::BestEffort);
    for event in [FlowEvent::Next, FlowEvent::Error] {
        go(
            b,
            S::REVERTING_NEW_RULES,
            event,
            S::REVERTING_ALLOCATED_RESOURCES,
            revert_resources,
        );
    }
    go(
        b,
        S::REVERTING_NEW_RULES,
        FlowEvent::Timeout,
        S::REVERTING_ALLOCATED_RESOURCES,
        &[abandon_cleanup_commands, revert_allocated_resources],
    );

    always_to(
        b,
        S::REVERTING_ALLOCATED_RESOURCES,
        S::REVERTING_FLOW,
        &[revert_flow],
    );
    always_to(
        b,
        S::REVERTING_FLOW,
        S::REVERTING_FLOW_STATUS,
        &[revert_flow_status],
    );
    always_to(b, S::REVERTING_FLOW_STATUS, S::FINISHED_WITH_ERROR, &[]);
}
