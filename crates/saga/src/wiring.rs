//! Shorthands for building saga tables out of plain step functions.

use crate::{
    error::ErrorKind,
    event::{FlowEvent, SagaInput},
    fsm::{ActionResult, MachineState, TableBuilder, Transition},
    instance::SagaContext,
};

/// A step that needs nothing but the saga context.
pub(crate) type Step<C> = fn(&mut C) -> ActionResult<FlowEvent>;

pub(crate) type Builder<S, C> = TableBuilder<S, FlowEvent, C, SagaInput>;

/// Adds `from --event--> to` running `steps` in order.
pub(crate) fn go<'b, S, C>(
    b: &'b mut Builder<S, C>,
    from: S,
    event: FlowEvent,
    to: S,
    steps: &[Step<C>],
) -> &'b mut Transition<S, FlowEvent, C, SagaInput>
where
    S: MachineState,
    C: 'static,
{
    let transition = b.transition(from, event, to);
    for step in steps {
        let step = *step;
        transition.with(move |context, _| step(context));
    }
    transition
}

/// Records the saga timeout as the failure, unless something failed first.
pub(crate) fn mark_timed_out<C: SagaContext>(context: &mut C) -> ActionResult<FlowEvent> {
    context
        .core_mut()
        .fail(ErrorKind::Timeout, "Saga timed out");
    Ok(None)
}

/// Routes `ERROR` and `TIMEOUT` from `from` to `to`.
pub(crate) fn fail_to<S, C>(b: &mut Builder<S, C>, from: S, to: S, steps: &[Step<C>])
where
    S: MachineState,
    C: SagaContext,
{
    go(b, from, FlowEvent::Error, to, steps);
    let mut timed_out: Vec<Step<C>> = vec![mark_timed_out::<C>];
    timed_out.extend_from_slice(steps);
    go(b, from, FlowEvent::Timeout, to, &timed_out);
}

/// Routes `NEXT`, `ERROR` and `TIMEOUT` from `from` to `to`. Used by
/// rollback and cleanup states, which advance whatever happens.
pub(crate) fn always_to<S, C>(b: &mut Builder<S, C>, from: S, to: S, steps: &[Step<C>])
where
    S: MachineState,
    C: SagaContext,
{
    go(b, from, FlowEvent::Next, to, steps);
    fail_to(b, from, to, steps);
}
