use std::sync::Arc;

use crate::error::{EngineError, SagaError};

use super::{MachineContext, MachineEvent, MachineState, TransitionTable};

/// Upper bound on events processed by a single `fire` call.
pub const MAX_CHAIN_LENGTH: usize = 512;

/// What an action sees about the transition it runs in.
pub struct Transit<'a, S, E, I> {
    pub from: S,
    pub to: S,
    pub event: E,
    pub input: &'a I,
}

/// One running instance of a transition table.
///
/// Events are processed to completion, one at a time: `fire` runs exit hooks,
/// actions and entry hooks, then keeps processing whatever the actions
/// raised until the machine rests in an awaiting or final state.
pub struct StateMachine<S, E, C, I> {
    table: Arc<TransitionTable<S, E, C, I>>,
    state: S,
    context: C,
}

impl<S, E, C, I> StateMachine<S, E, C, I>
where
    S: MachineState,
    E: MachineEvent,
    C: MachineContext,
    I: Default,
{
    pub fn new(table: Arc<TransitionTable<S, E, C, I>>, context: C) -> Self {
        let state = table.initial();
        Self {
            table,
            state,
            context,
        }
    }

    pub fn state(&self) -> S {
        self.state
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut C {
        &mut self.context
    }

    pub fn is_terminated(&self) -> bool {
        self.table.is_final(self.state)
    }

    pub fn table(&self) -> &TransitionTable<S, E, C, I> {
        &self.table
    }

    /// Delivers `event` with `input` and processes every raised event.
    ///
    /// Returns the state the machine rests in. Only configuration defects
    /// are reported as errors; action failures become `ERROR` events.
    pub fn fire(&mut self, event: E, input: &I) -> Result<S, EngineError> {
        if self.is_terminated() {
            return Err(EngineError::Terminated {
                state: format!("{:?}", self.state),
            });
        }

        let empty = I::default();
        let mut current = Some((event, input));
        let mut steps = 0usize;

        while let Some((event, input)) = current.take() {
            steps += 1;
            if steps > MAX_CHAIN_LENGTH {
                return Err(EngineError::RunawayChain {
                    state: format!("{:?}", self.state),
                    steps,
                });
            }

            let raised = self.step(event, input)?;
            if self.is_terminated() {
                if let Some(ignored) = raised {
                    tracing::warn!(state = ?self.state, event = ?ignored, "event raised in final state ignored");
                }
                break;
            }
            current = raised.map(|e| (e, &empty));
        }

        Ok(self.state)
    }

    fn step(&mut self, event: E, input: &I) -> Result<Option<E>, EngineError> {
        let from = self.state;
        let table = Arc::clone(&self.table);

        let candidates = table
            .candidates(from, event)
            .ok_or_else(|| EngineError::UndefinedTransition {
                state: format!("{from:?}"),
                event: format!("{event:?}"),
            })?;
        let transition = candidates
            .iter()
            .find(|t| t.allows(&self.context, input))
            .ok_or_else(|| EngineError::NoTransitionAllowed {
                state: format!("{from:?}"),
                event: format!("{event:?}"),
            })?;

        let to = transition.to;
        let transit = Transit {
            from,
            to,
            event,
            input,
        };

        if !transition.internal {
            for hook in table.exit_hooks.get(&from).into_iter().flatten() {
                hook(&mut self.context, &transit);
            }
        }

        let mut raised = None;
        let mut failure: Option<SagaError> = None;
        for action in &transition.actions {
            match action(&mut self.context, &transit) {
                Ok(event) => {
                    if raised.is_none() {
                        raised = event;
                    }
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if !transition.internal {
            self.state = to;
            tracing::debug!(from = ?from, to = ?to, event = ?event, "transition");
            for hook in table.entry_hooks.get(&to).into_iter().flatten() {
                hook(&mut self.context, &transit);
            }
        }

        if let Some(error) = failure {
            tracing::warn!(state = ?self.state, event = ?event, error = %error, "action failed");
            self.context.on_action_error(&error);
            return Ok(Some(E::error()));
        }

        if raised.is_none()
            && !transition.internal
            && !table.is_awaiting(to)
            && !table.is_final(to)
        {
            raised = Some(E::next());
        }
        Ok(raised)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsm::TableBuilder;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum St {
        Start,
        Working,
        Waiting,
        Done,
        Failed,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Ev {
        Next,
        Reply,
        Error,
        Loop,
    }

    impl MachineEvent for Ev {
        fn next() -> Self {
            Ev::Next
        }
        fn error() -> Self {
            Ev::Error
        }
    }

    #[derive(Default)]
    struct Ctx {
        log: Vec<String>,
        replies: u32,
        errors: Vec<String>,
        fail_work: bool,
    }

    impl MachineContext for Ctx {
        fn on_action_error(&mut self, error: &SagaError) {
            self.errors.push(error.to_string());
        }
    }

    type Table = Arc<TransitionTable<St, Ev, Ctx, u32>>;

    fn table() -> Table {
        let mut b: TableBuilder<St, Ev, Ctx, u32> = TransitionTable::builder(St::Start);
        b.transition(St::Start, Ev::Next, St::Working).with(|c, _| {
            c.log.push("work".into());
            if c.fail_work {
                return Err(SagaError::Internal("boom".into()));
            }
            Ok(None)
        });
        b.transition(St::Working, Ev::Next, St::Waiting);
        b.transition(St::Working, Ev::Error, St::Failed);
        b.internal(St::Waiting, Ev::Reply).with(|c, t| {
            c.replies += *t.input;
            Ok((c.replies >= 2).then_some(Ev::Next))
        });
        b.transition(St::Waiting, Ev::Next, St::Done)
            .when(|c, _| c.errors.is_empty());
        b.transition(St::Waiting, Ev::Next, St::Failed);
        b.transition(St::Waiting, Ev::Loop, St::Waiting)
            .with(|_, _| Ok(Some(Ev::Loop)));
        b.on_exit(St::Start, |c, _| c.log.push("exit start".into()));
        b.on_entry(St::Waiting, |c, t| c.log.push(format!("enter waiting via {:?}", t.event)));
        b.awaiting(St::Waiting);
        b.final_state(St::Done).final_state(St::Failed);
        b.build()
    }

    #[test]
    fn runs_until_awaiting_state() {
        let mut m = StateMachine::new(table(), Ctx::default());
        assert_eq!(m.fire(Ev::Next, &0).unwrap(), St::Waiting);
        assert_eq!(
            m.context().log,
            vec!["exit start", "work", "enter waiting via Next"]
        );
    }

    #[test]
    fn internal_transitions_accumulate_then_raise() {
        let mut m = StateMachine::new(table(), Ctx::default());
        m.fire(Ev::Next, &0).unwrap();
        assert_eq!(m.fire(Ev::Reply, &1).unwrap(), St::Waiting);
        // internal transitions do not re-run entry hooks
        assert_eq!(m.context().log.len(), 3);
        assert_eq!(m.fire(Ev::Reply, &1).unwrap(), St::Done);
        assert!(m.is_terminated());
    }

    #[test]
    fn action_error_becomes_error_event() {
        let mut m = StateMachine::new(
            table(),
            Ctx {
                fail_work: true,
                ..Default::default()
            },
        );
        assert_eq!(m.fire(Ev::Next, &0).unwrap(), St::Failed);
        assert_eq!(m.context().errors, vec!["Internal error: boom"]);
    }

    #[test]
    fn undefined_pair_is_reported_not_panicked() {
        let mut m = StateMachine::new(table(), Ctx::default());
        let err = m.fire(Ev::Reply, &0).unwrap_err();
        assert!(matches!(err, EngineError::UndefinedTransition { .. }));
        assert_eq!(m.state(), St::Start);
    }

    #[test]
    fn terminated_machine_rejects_events() {
        let mut m = StateMachine::new(table(), Ctx::default());
        m.fire(Ev::Next, &0).unwrap();
        m.fire(Ev::Reply, &5).unwrap();
        assert!(matches!(
            m.fire(Ev::Next, &0),
            Err(EngineError::Terminated { .. })
        ));
    }

    #[test]
    fn runaway_chain_is_cut() {
        let mut m = StateMachine::new(table(), Ctx::default());
        m.fire(Ev::Next, &0).unwrap();
        assert!(matches!(
            m.fire(Ev::Loop, &0),
            Err(EngineError::RunawayChain { .. })
        ));
    }

    #[test]
    fn guards_pick_first_allowed_row() {
        let mut m = StateMachine::new(table(), Ctx::default());
        m.fire(Ev::Next, &0).unwrap();
        m.context_mut().errors.push("earlier".into());
        assert_eq!(m.fire(Ev::Reply, &2).unwrap(), St::Failed);
    }
}
