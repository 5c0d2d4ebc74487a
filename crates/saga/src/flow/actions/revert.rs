use common::PathId;
use model::{FlowPathIds, FlowRepositoryExt, FlowStatus, RepositoryError};

use crate::{
    event::FlowEvent,
    flow::{FlowContext, FlowRequest},
    fsm::ActionResult,
    instance::CleanupItem,
};

/// Drops the new path records and returns every lease taken by this saga.
pub fn revert_allocated_resources(ctx: &mut FlowContext) -> ActionResult<FlowEvent> {
    let created: Vec<PathId> = ctx
        .new_path_records
        .iter()
        .map(|p| p.path_id.clone())
        .filter(|id| !ctx.old_paths.contains(id))
        .collect();

    if !created.is_empty() {
        let result = ctx.core.services.repository.in_transaction(|tx| {
            for path_id in &created {
                tx.remove_path(path_id)?;
            }
            Ok(())
        });
        if let Err(e) = result {
            ctx.core
                .warn(format!("Failed to remove new paths: {e}"));
        }
    }

    for resources in std::mem::take(&mut ctx.new_resources) {
        match ctx.core.services.resources.deallocate(&resources) {
            Ok(()) => ctx.core.record_details(
                "Allocated resources were deallocated",
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

/// Restores the attributes an update changed.
pub fn revert_flow(ctx: &mut FlowContext) -> ActionResult<FlowEvent> {
    let Some(original) = ctx.original_flow.clone() else {
        return Ok(None);
    };
    let flow_id = ctx.flow_id.clone();
    let attributes = FlowRequest::from_flow(&original);
    let result = ctx.core.services.repository.in_transaction(|tx| {
        let mut flow = tx
            .flow(&flow_id)?
            .ok_or_else(|| RepositoryError::flow_not_found(&flow_id))?;
        attributes.apply_to(&mut flow);
        tx.save_flow(flow)
    });
    match result {
        Ok(()) => ctx.core.record("Flow was reverted to its original state"),
        Err(e) => ctx.core.warn(format!("Failed to revert flow attributes: {e}")),
    }
    Ok(None)
}

/// Releases the flow after a failure.
///
/// An existing flow gets its previous status and paths back. A flow created
/// by this saga stays in storage as down, with the failure as status info.
pub fn revert_flow_status(ctx: &mut FlowContext) -> ActionResult<FlowEvent> {
    let flow_id = ctx.flow_id.clone();
    let restore = match (&ctx.original_flow, ctx.flow_created) {
        (Some(original), _) => Some((
            original.status,
            original.status_info.clone(),
            original.paths.clone(),
        )),
        (None, true) => Some((
            FlowStatus::Down,
            ctx.core.failure_reason().map(str::to_string),
            FlowPathIds::default(),
        )),
        (None, false) => None,
    };
    let Some((status, info, paths)) = restore else {
        return Ok(None);
    };

    let result = ctx.core.services.repository.in_transaction(|tx| {
        let mut flow = tx
            .flow(&flow_id)?
            .ok_or_else(|| RepositoryError::flow_not_found(&flow_id))?;
        flow.status = status;
        flow.status_info = info;
        flow.paths = paths;
        tx.save_flow(flow)
    });
    match result {
        Ok(()) => ctx
            .core
            .record_details("Flow status was reverted", status.as_str()),
        Err(e) => ctx
            .core
            .warn(format!("Failed to revert flow status: {e}")),
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::flow::{
        FlowOperationRequest,
        actions::{allocate_primary, update_flow_attributes, validate_update},
        testing::Fixture,
    };

    #[test]
    fn rollback_returns_flow_to_its_snapshot() {
        let fixture = Fixture::with_flow_up("F1");
        let before = fixture.flow("F1");
        let mut ctx = fixture.context(FlowOperationRequest::Update(fixture.update_request("F1", 20)));
        validate_update(&mut ctx).unwrap();
        update_flow_attributes(&mut ctx).unwrap();
        allocate_primary(&mut ctx).unwrap();
        ctx.core.fail(ErrorKind::SpeakerFailure, "switch unreachable");

        revert_allocated_resources(&mut ctx).unwrap();
        revert_flow(&mut ctx).unwrap();
        revert_flow_status(&mut ctx).unwrap();

        assert_eq!(fixture.flow("F1"), before);
        assert_eq!(fixture.repo.path_count(), 2);
        assert_eq!(fixture.resources.leased_cookies(), vec![common::Cookie::new(100)]);
        assert!(ctx.core.warnings().is_empty());
    }

    #[test]
    fn created_flow_is_left_down_with_reason() {
        let fixture = Fixture::with_flow_up("F1");
        let request = FlowRequest::unicast(
            common::FlowId::new("F2"),
            crate::flow::testing::endpoint(1, 2),
            crate::flow::testing::endpoint(2, 2),
            10,
        );
        let mut ctx = fixture.context(FlowOperationRequest::Create(request));
        crate::flow::actions::validate_create(&mut ctx).unwrap();
        ctx.core.fail(ErrorKind::NoPathFound, "Not enough bandwidth or no path found.");

        revert_flow_status(&mut ctx).unwrap();
        let flow = fixture.flow("F2");
        assert_eq!(flow.status, FlowStatus::Down);
        assert_eq!(
            flow.status_info.as_deref(),
            Some("Not enough bandwidth or no path found.")
        );
    }
}
