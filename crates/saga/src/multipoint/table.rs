//! State table of the y-flow parent saga.

use std::sync::{Arc, LazyLock};

use serde::Serialize;

use crate::{
    event::{FlowEvent, SagaInput},
    fsm::TransitionTable,
    wiring::{Builder, Step, always_to, fail_to, go, mark_timed_out},
};

use super::{
    YFlowContext,
    actions::{
        allocate_y_point, on_sub_flow_outcome, release_y_point, revert_y_flow,
        revert_y_flow_status, revert_y_point, start_sub_flows, update_y_flow_status,
        validate_y_flow,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum YFlowState {
    Initialized,
    YFlowValidated,
    YPointResourcesAllocated,
    SubFlowsInProgress,
    SubFlowsCompleted,
    YPointResourcesReleased,
    YFlowStatusUpdated,
    Finished,
    RevertingYPointResources,
    RevertingYFlow,
    RevertingYFlowStatus,
    FinishedWithError,
}

pub type YFlowTable = TransitionTable<YFlowState, FlowEvent, YFlowContext, SagaInput>;

static TABLE: LazyLock<Arc<YFlowTable>> = LazyLock::new(build);

/// The shared y-flow table; the operation is picked by the request.
pub fn y_flow_table() -> Arc<YFlowTable> {
    Arc::clone(&TABLE)
}

fn build() -> Arc<YFlowTable> {
    use YFlowState::*;

    let mut b: Builder<YFlowState, YFlowContext> = TransitionTable::builder(Initialized);

    go(&mut b, Initialized, FlowEvent::Next, YFlowValidated, &[validate_y_flow]);
    fail_to(&mut b, Initialized, FinishedWithError, &[]);

    go(
        &mut b,
        YFlowValidated,
        FlowEvent::Next,
        YPointResourcesAllocated,
        &[allocate_y_point],
    );
    for event in FlowEvent::EVERYWHERE {
        let mut steps: Vec<Step<YFlowContext>> = Vec::new();
        if event == FlowEvent::Timeout {
            steps.push(mark_timed_out::<YFlowContext>);
        }
        let direct = steps.clone();
        steps.push(revert_y_flow);
        go(&mut b, YFlowValidated, event, RevertingYFlow, &steps)
            .when(|c: &YFlowContext, _| c.mutated());
        go(&mut b, YFlowValidated, event, FinishedWithError, &direct);
    }

    go(
        &mut b,
        YPointResourcesAllocated,
        FlowEvent::Next,
        SubFlowsInProgress,
        &[start_sub_flows],
    );

    b.awaiting(SubFlowsInProgress);
    for event in FlowEvent::RESTING {
        b.internal(SubFlowsInProgress, event)
            .with(|context, transit| on_sub_flow_outcome(context, transit.input));
    }
    go(&mut b, SubFlowsInProgress, FlowEvent::Next, SubFlowsCompleted, &[]);

    go(
        &mut b,
        SubFlowsCompleted,
        FlowEvent::Next,
        YPointResourcesReleased,
        &[release_y_point],
    );
    go(
        &mut b,
        YPointResourcesReleased,
        FlowEvent::Next,
        YFlowStatusUpdated,
        &[update_y_flow_status],
    );
    go(&mut b, YFlowStatusUpdated, FlowEvent::Next, Finished, &[]);

    for from in [
        YPointResourcesAllocated,
        SubFlowsInProgress,
        SubFlowsCompleted,
        YPointResourcesReleased,
    ] {
        fail_to(&mut b, from, RevertingYPointResources, &[revert_y_point]);
    }
    fail_to(&mut b, YFlowStatusUpdated, FinishedWithError, &[]);

    always_to(&mut b, RevertingYPointResources, RevertingYFlow, &[revert_y_flow]);
    always_to(&mut b, RevertingYFlow, RevertingYFlowStatus, &[revert_y_flow_status]);
    always_to(&mut b, RevertingYFlowStatus, FinishedWithError, &[]);

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
        let table = y_flow_table();
        let missing = table.missing_transitions(
            &FlowEvent::EVERYWHERE,
            &FlowEvent::RESTING,
            &FlowEvent::RUNNING,
        );
        assert!(missing.is_empty(), "missing transitions: {missing:?}");
        assert!(table.can_terminate());
        assert!(table.is_awaiting(YFlowState::SubFlowsInProgress));
    }
}
