//! Declarative transition tables.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use crate::error::SagaError;

use super::{MachineEvent, MachineState, Transit};

/// What an action hands back to the engine: an event to process next, if any.
pub type ActionResult<E> = Result<Option<E>, SagaError>;

/// A transition action.
pub type Action<S, E, C, I> =
    Arc<dyn Fn(&mut C, &Transit<'_, S, E, I>) -> ActionResult<E> + Send + Sync>;

/// An entry or exit hook. Hooks cannot fail and cannot raise events.
pub type Hook<S, E, C, I> = Arc<dyn Fn(&mut C, &Transit<'_, S, E, I>) + Send + Sync>;

/// A transition guard.
pub type Guard<C, I> = Arc<dyn Fn(&C, &I) -> bool + Send + Sync>;

/// One row of the table.
pub struct Transition<S, E, C, I> {
    pub(crate) to: S,
    pub(crate) internal: bool,
    pub(crate) guard: Option<Guard<C, I>>,
    pub(crate) actions: Vec<Action<S, E, C, I>>,
}

impl<S, E, C, I> Transition<S, E, C, I> {
    /// Appends an action; actions run in the order they were added.
    pub fn with<F>(&mut self, action: F) -> &mut Self
    where
        F: Fn(&mut C, &Transit<'_, S, E, I>) -> ActionResult<E> + Send + Sync + 'static,
    {
        self.actions.push(Arc::new(action));
        self
    }

    /// Restricts the transition to contexts accepted by `guard`.
    pub fn when<G>(&mut self, guard: G) -> &mut Self
    where
        G: Fn(&C, &I) -> bool + Send + Sync + 'static,
    {
        self.guard = Some(Arc::new(guard));
        self
    }

    pub(crate) fn allows(&self, context: &C, input: &I) -> bool {
        self.guard.as_ref().is_none_or(|g| g(context, input))
    }
}

/// An immutable {state × event → transitions} table plus hooks.
pub struct TransitionTable<S, E, C, I> {
    pub(crate) initial: S,
    pub(crate) transitions: HashMap<(S, E), Vec<Transition<S, E, C, I>>>,
    pub(crate) entry_hooks: HashMap<S, Vec<Hook<S, E, C, I>>>,
    pub(crate) exit_hooks: HashMap<S, Vec<Hook<S, E, C, I>>>,
    pub(crate) final_states: HashSet<S>,
    pub(crate) awaiting: HashSet<S>,
}

impl<S: MachineState, E: MachineEvent, C, I> TransitionTable<S, E, C, I> {
    pub fn builder(initial: S) -> TableBuilder<S, E, C, I> {
        TableBuilder {
            table: TransitionTable {
                initial,
                transitions: HashMap::new(),
                entry_hooks: HashMap::new(),
                exit_hooks: HashMap::new(),
                final_states: HashSet::new(),
                awaiting: HashSet::new(),
            },
        }
    }

    pub fn initial(&self) -> S {
        self.initial
    }

    pub fn is_final(&self, state: S) -> bool {
        self.final_states.contains(&state)
    }

    /// States that rest until an external event arrives.
    pub fn is_awaiting(&self, state: S) -> bool {
        self.awaiting.contains(&state)
    }

    pub(crate) fn candidates(&self, state: S, event: E) -> Option<&[Transition<S, E, C, I>]> {
        self.transitions.get(&(state, event)).map(Vec::as_slice)
    }

    pub fn has_transition(&self, state: S, event: E) -> bool {
        self.transitions.contains_key(&(state, event))
    }
}

/// Builder for [`TransitionTable`].
pub struct TableBuilder<S, E, C, I> {
    table: TransitionTable<S, E, C, I>,
}

impl<S: MachineState, E: MachineEvent, C, I> TableBuilder<S, E, C, I> {
    /// Adds an external transition. Several rows for one (state, event)
    /// pair are tried in insertion order; the first whose guard passes wins.
    pub fn transition(&mut self, from: S, event: E, to: S) -> &mut Transition<S, E, C, I> {
        self.push(from, event, to, false)
    }

    /// Adds an internal transition: actions run, but the state is neither
    /// exited nor re-entered.
    pub fn internal(&mut self, state: S, event: E) -> &mut Transition<S, E, C, I> {
        self.push(state, event, state, true)
    }

    fn push(&mut self, from: S, event: E, to: S, internal: bool) -> &mut Transition<S, E, C, I> {
        let rows = self.table.transitions.entry((from, event)).or_default();
        rows.push(Transition {
            to,
            internal,
            guard: None,
            actions: Vec::new(),
        });
        let last = rows.len() - 1;
        &mut rows[last]
    }

    pub fn on_entry<F>(&mut self, state: S, hook: F) -> &mut Self
    where
        F: Fn(&mut C, &Transit<'_, S, E, I>) + Send + Sync + 'static,
    {
        self.table
            .entry_hooks
            .entry(state)
            .or_default()
            .push(Arc::new(hook));
        self
    }

    pub fn on_exit<F>(&mut self, state: S, hook: F) -> &mut Self
    where
        F: Fn(&mut C, &Transit<'_, S, E, I>) + Send + Sync + 'static,
    {
        self.table
            .exit_hooks
            .entry(state)
            .or_default()
            .push(Arc::new(hook));
        self
    }

    /// Marks a state as waiting for external events. Every other non-final
    /// state continues with `NEXT` unless an action raised another event.
    pub fn awaiting(&mut self, state: S) -> &mut Self {
        self.table.awaiting.insert(state);
        self
    }

    pub fn final_state(&mut self, state: S) -> &mut Self {
        self.table.final_states.insert(state);
        self
    }

    pub fn build(self) -> Arc<TransitionTable<S, E, C, I>> {
        Arc::new(self.table)
    }
}
