use common::{FlowId, PathId};
use model::{
    FlowRepositoryExt, FlowStatus, FlowTransaction, PathStatus, RepoResult, RepositoryError,
};

use crate::{event::FlowEvent, flow::FlowContext, fsm::ActionResult, instance::CleanupItem};

/// Marks the new paths active once their rules are in place.
pub fn complete_new_paths(ctx: &mut FlowContext) -> ActionResult<FlowEvent> {
    let new = ctx.new_paths.clone();
    ctx.core.services.repository.in_transaction(|tx| {
        for path_id in new.all() {
            tx.update_path_status(path_id, PathStatus::Active)?;
        }
        Ok(())
    })?;
    ctx.committed = true;
    ctx.core.record("New paths were installed");
    Ok(None)
}

/// Old paths that are not part of the flow anymore.
fn retired_paths(ctx: &FlowContext) -> Vec<PathId> {
    ctx.old_paths
        .all()
        .into_iter()
        .filter(|id| !ctx.new_paths.contains(id))
        .cloned()
        .collect()
}

pub fn remove_old_paths(ctx: &mut FlowContext) -> ActionResult<FlowEvent> {
    let retired = retired_paths(ctx);
    if retired.is_empty() {
        return Ok(None);
    }
    let result = ctx.core.services.repository.in_transaction(|tx| {
        for path_id in &retired {
            tx.remove_path(path_id)?;
        }
        Ok(())
    });
    match result {
        Ok(()) => ctx.core.record_details(
            "Old paths were removed",
            retired
                .iter()
                .map(PathId::as_str)
                .collect::<Vec<_>>()
                .join(", "),
        ),
        Err(e) => ctx.core.warn(format!("Failed to remove old paths: {e}")),
    }
    Ok(None)
}

/// Returns the leases of the old paths. A lease that could not be returned
/// becomes cleanup debt.
pub fn deallocate_old_resources(ctx: &mut FlowContext) -> ActionResult<FlowEvent> {
    for resources in std::mem::take(&mut ctx.old_resources) {
        match ctx.core.services.resources.deallocate(&resources) {
            Ok(()) => ctx.core.record_details(
                "Old resources were deallocated",
                format!("cookie {}", resources.cookie),
            ),
            Err(e) => {
                ctx.core.warn(format!(
                    "Failed to deallocate resources of cookie {}: {e}",
                    resources.cookie
                ));
                ctx.core.owe(CleanupItem::Resources(resources));
            }
        }
    }
    Ok(None)
}

fn statuses(tx: &dyn FlowTransaction, ids: Vec<&PathId>) -> RepoResult<Vec<PathStatus>> {
    ids.into_iter()
        .map(|id| Ok(tx.path(id)?.map_or(PathStatus::Inactive, |p| p.status)))
        .collect()
}

fn derive_in(tx: &dyn FlowTransaction, flow_id: &FlowId) -> RepoResult<FlowStatus> {
    let flow = tx
        .flow(flow_id)?
        .ok_or_else(|| RepositoryError::flow_not_found(flow_id))?;
    let primary = statuses(tx, flow.paths.primary())?;
    let protected = statuses(tx, flow.paths.protected())?;
    Ok(FlowStatus::derive(&primary, &protected))
}

/// Sets the final flow status from the health of its paths.
pub fn update_flow_status(ctx: &mut FlowContext) -> ActionResult<FlowEvent> {
    let flow_id = ctx.flow_id.clone();
    let status = ctx.core.services.repository.in_transaction(|tx| {
        let status = derive_in(&*tx, &flow_id)?;
        let info = match status {
            FlowStatus::Up => None,
            FlowStatus::Degraded => Some("Protected path is not active".to_string()),
            FlowStatus::Down | FlowStatus::InProgress => {
                Some("Primary path is not active".to_string())
            }
        };
        tx.update_flow_status(&flow_id, status, info)?;
        Ok(status)
    })?;
    ctx.core
        .record_details("Flow status was updated", status.as_str());
    Ok(None)
}

/// Removes the flow record together with its paths.
pub fn remove_flow(ctx: &mut FlowContext) -> ActionResult<FlowEvent> {
    let flow_id = ctx.flow_id.clone();
    let old = ctx.old_paths.clone();
    ctx.core.services.repository.in_transaction(|tx| {
        for path_id in old.all() {
            tx.remove_path(path_id)?;
        }
        tx.remove_flow(&flow_id)
    })?;
    ctx.core.record("Flow and its paths were removed");
    Ok(None)
}
