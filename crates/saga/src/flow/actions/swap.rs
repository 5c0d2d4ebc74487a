use std::collections::HashMap;

use common::FlowId;
use model::{FlowPathIds, FlowRepositoryExt, FlowTransaction, PathStatus, RepoResult, RepositoryError};

use crate::{event::FlowEvent, flow::FlowContext, fsm::ActionResult};

/// Marks every path of `ids` as primary or protected by its slot.
fn assign_roles(tx: &mut dyn FlowTransaction, ids: &FlowPathIds) -> RepoResult<()> {
    let slots = ids
        .primary()
        .into_iter()
        .map(|id| (id, false))
        .chain(ids.protected().into_iter().map(|id| (id, true)));
    for (path_id, protected) in slots {
        let mut path = tx
            .path(path_id)?
            .ok_or_else(|| RepositoryError::path_not_found(path_id))?;
        if path.protected != protected {
            path.protected = protected;
            tx.save_path(path)?;
        }
    }
    Ok(())
}

fn point_flow_at(tx: &mut dyn FlowTransaction, flow_id: &FlowId, ids: &FlowPathIds) -> RepoResult<()> {
    let mut flow = tx
        .flow(flow_id)?
        .ok_or_else(|| RepositoryError::flow_not_found(flow_id))?;
    flow.paths = ids.clone();
    tx.save_flow(flow)
}

/// Points the flow at its new paths in one transaction.
///
/// Old paths leaving the flow are marked in progress; their statuses are
/// kept so a rollback can restore them.
pub fn swap_paths(ctx: &mut FlowContext) -> ActionResult<FlowEvent> {
    let flow_id = ctx.flow_id.clone();
    let old = ctx.old_paths.clone();
    let new = ctx.new_paths.clone();

    let statuses = ctx.core.services.repository.in_transaction(|tx| {
        let mut statuses = HashMap::new();
        for path_id in old.all() {
            let Some(path) = tx.path(path_id)? else {
                continue;
            };
            statuses.insert(path_id.clone(), path.status);
            if !new.contains(path_id) {
                tx.update_path_status(path_id, PathStatus::InProgress)?;
            }
        }
        assign_roles(tx, &new)?;
        point_flow_at(tx, &flow_id, &new)?;
        Ok(statuses)
    })?;

    ctx.old_path_statuses = statuses;
    if let Some(target) = ctx.target.as_mut() {
        target.paths = new;
    }
    ctx.swapped = true;
    ctx.core.record("The flow paths were swapped");
    Ok(None)
}

/// Points the flow back at its old paths.
///
/// Failures are logged as warnings; the rollback keeps going.
pub fn revert_swap(ctx: &mut FlowContext) -> ActionResult<FlowEvent> {
    if !ctx.swapped {
        return Ok(None);
    }
    let flow_id = ctx.flow_id.clone();
    let old = ctx.old_paths.clone();
    let new = ctx.new_paths.clone();
    let statuses = ctx.old_path_statuses.clone();

    let result = ctx.core.services.repository.in_transaction(|tx| {
        point_flow_at(tx, &flow_id, &old)?;
        assign_roles(tx, &old)?;
        for (path_id, status) in &statuses {
            let current = tx.path(path_id)?.map(|p| p.status);
            if current.is_some_and(|s| s != PathStatus::Active) {
                tx.update_path_status(path_id, *status)?;
            }
        }
        for path_id in new.all() {
            if !old.contains(path_id) && tx.path(path_id)?.is_some() {
                tx.update_path_status(path_id, PathStatus::Inactive)?;
            }
        }
        Ok(())
    });

    match result {
        Ok(()) => {
            ctx.swapped = false;
            if let Some(target) = ctx.target.as_mut() {
                target.paths = old;
            }
            ctx.core.record("The flow paths were reverted");
        }
        Err(e) => ctx
            .core
            .warn(format!("Failed to revert the flow paths swap: {e}")),
    }
    Ok(None)
}
