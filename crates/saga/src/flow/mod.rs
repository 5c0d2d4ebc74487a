//! Sagas over a single flow: unicast and multi-destination.
//!
//! Every operation has its own state table; the tables share the context
//! type [`FlowContext`] and the steps in [`actions`]. Create, update and
//! reroute share the installation part of the table (see [`install`]).

pub mod actions;
mod context;
pub mod create;
pub mod delete;
pub mod install;
pub mod path_swap;
mod request;
pub mod update;

#[cfg(test)]
pub(crate) mod testing;

pub use context::FlowContext;
pub use request::{FlowOperationRequest, FlowRequest, RerouteRequest};

use crate::{
    event::{FlowEvent, SagaInput},
    fsm::{MachineState, TransitionTable},
    wiring::{Builder, Step, go, mark_timed_out},
};

use actions::{StepPolicy, handle_response, revert_flow_status};

/// Table of a flow saga over the states `S`.
pub type FlowTable<S> = TransitionTable<S, FlowEvent, FlowContext, SagaInput>;

/// Makes `state` wait for the speaker responses of the commands its entry
/// transition sent.
pub(crate) fn await_responses<S: MachineState>(
    b: &mut Builder<S, FlowContext>,
    state: S,
    policy: StepPolicy,
) {
    b.awaiting(state);
    for event in FlowEvent::RESTING {
        b.internal(state, event)
            .with(move |context, transit| handle_response(context, transit.input, policy));
    }
}

/// Routes failures of the validation state. A saga that already marked the
/// flow in progress goes through `release` to give it back; otherwise it
/// ends in `done` right away.
pub(crate) fn fail_validation<S: MachineState>(
    b: &mut Builder<S, FlowContext>,
    from: S,
    release: S,
    done: S,
) {
    for event in FlowEvent::EVERYWHERE {
        let mut steps: Vec<Step<FlowContext>> = Vec::new();
        if event == FlowEvent::Timeout {
            steps.push(mark_timed_out::<FlowContext>);
        }
        let direct = steps.clone();
        steps.push(revert_flow_status);
        go(b, from, event, release, &steps).when(|c: &FlowContext, _| c.mutated());
        go(b, from, event, done, &direct);
    }
}
