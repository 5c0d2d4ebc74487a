//! Static checks over transition tables.

use std::collections::{HashSet, VecDeque};

use super::{MachineEvent, MachineState, TransitionTable};

/// A reachable `(state, event)` pair with no transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingTransition<S, E> {
    pub state: S,
    pub event: E,
}

impl<S: MachineState, E: MachineEvent, C, I> TransitionTable<S, E, C, I> {
    /// States reachable from the initial state.
    pub fn reachable_states(&self) -> HashSet<S> {
        let mut seen = HashSet::from([self.initial]);
        let mut queue = VecDeque::from([self.initial]);

        while let Some(state) = queue.pop_front() {
            let targets = self
                .transitions
                .iter()
                .filter(|((from, _), _)| *from == state)
                .flat_map(|(_, rows)| rows.iter().map(|t| t.to));
            for target in targets {
                if seen.insert(target) {
                    queue.push_back(target);
                }
            }
        }
        seen
    }

    /// Reports every reachable non-final state lacking a required event.
    ///
    /// `everywhere` must be handled by every non-final state, `resting` by
    /// awaiting states and `running` by the others.
    pub fn missing_transitions(
        &self,
        everywhere: &[E],
        resting: &[E],
        running: &[E],
    ) -> Vec<MissingTransition<S, E>> {
        let mut states: Vec<S> = self.reachable_states().into_iter().collect();
        states.sort_by_key(|s| format!("{s:?}"));

        let mut missing = Vec::new();
        for state in states {
            if self.is_final(state) {
                continue;
            }
            let specific = if self.is_awaiting(state) {
                resting
            } else {
                running
            };
            for event in everywhere.iter().chain(specific) {
                if !self.has_transition(state, *event) {
                    missing.push(MissingTransition {
                        state,
                        event: *event,
                    });
                }
            }
        }
        missing
    }

    /// True when at least one final state is reachable.
    pub fn can_terminate(&self) -> bool {
        self.reachable_states()
            .into_iter()
            .any(|s| self.is_final(s))
    }
}
