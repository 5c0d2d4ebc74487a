//! Generic table-driven state machine engine.
//!
//! A table maps `(state, event)` to an ordered list of guarded transitions,
//! each carrying an ordered action list. Actions may raise the next event
//! synchronously; failures are converted into the table's `ERROR` event.

mod engine;
mod table;
mod validate;

use std::{fmt::Debug, hash::Hash};

pub use engine::{MAX_CHAIN_LENGTH, StateMachine, Transit};
pub use table::{Action, ActionResult, Guard, Hook, TableBuilder, Transition, TransitionTable};
pub use validate::MissingTransition;

use crate::error::SagaError;

/// State enums usable by the engine.
pub trait MachineState: Copy + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T: Copy + Eq + Hash + Debug + Send + Sync + 'static> MachineState for T {}

/// Event enums usable by the engine.
pub trait MachineEvent: Copy + Eq + Hash + Debug + Send + Sync + 'static {
    /// Continue with the next step.
    fn next() -> Self;
    /// An action failed.
    fn error() -> Self;
}

/// Context owned by a machine instance.
pub trait MachineContext {
    /// Called with every error an action returns, before `ERROR` is fired.
    fn on_action_error(&mut self, error: &SagaError);
}
