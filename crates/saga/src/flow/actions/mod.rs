//! Steps of the flow sagas.
//!
//! Every step takes the saga context and either succeeds, raises the next
//! event, or returns an error that the engine turns into `ERROR`.

mod allocate;
mod cleanup;
mod commands;
mod revert;
mod swap;
mod validate;

pub use allocate::{allocate_primary, allocate_protected};
pub use cleanup::{
    complete_new_paths, deallocate_old_resources, remove_flow, remove_old_paths,
    update_flow_status,
};
pub use commands::{
    StepPolicy, abandon_cleanup_commands, abandon_commands, emit_remove_old, emit_revert_rules,
    handle_response, install_ingress_rules, install_non_ingress_rules, validate_ingress_rules,
    validate_non_ingress_rules,
};
pub use revert::{revert_allocated_resources, revert_flow, revert_flow_status};
pub use swap::{revert_swap, swap_paths};
pub use validate::{
    update_flow_attributes, validate_create, validate_delete, validate_reroute, validate_swap,
    validate_update,
};
