use common::PathId;
use model::{
    Flow, FlowPath, FlowPathIds, FlowRepositoryExt, FlowResources, FlowStatus, FlowTransaction,
    PathResources, PathStatus,
};

use crate::{
    error::{ErrorKind, SagaError},
    event::{FlowEvent, Operation},
    flow::{FlowContext, FlowOperationRequest, FlowRequest},
    fsm::ActionResult,
    services::FlowServices,
};

fn disabled(feature: &str) -> SagaError {
    SagaError::validation(
        ErrorKind::NotPermitted,
        format!("Flow {feature} feature is disabled"),
    )
}

fn invalid(message: String) -> SagaError {
    SagaError::validation(ErrorKind::RequestInvalid, message)
}

/// Marks the flow in progress and returns its previous state.
///
/// `check` runs inside the same transaction, before anything is written.
fn lock_flow<F>(ctx: &FlowContext, check: F) -> Result<Flow, SagaError>
where
    F: FnOnce(&Flow, &dyn FlowTransaction) -> Result<(), SagaError>,
{
    let flow_id = ctx.flow_id.clone();
    let guard_sub_flows = ctx.core.is_root()
        && matches!(ctx.core.operation, Operation::Update | Operation::Delete);

    let locked = ctx.core.services.repository.in_transaction(|tx| {
        let Some(flow) = tx.flow(&flow_id)? else {
            return Ok(Err(SagaError::validation(
                ErrorKind::NotFound,
                format!("Flow {flow_id} not found"),
            )));
        };
        if flow.status == FlowStatus::InProgress {
            return Ok(Err(SagaError::validation(
                ErrorKind::InProgress,
                format!("Flow {flow_id} is in progress now"),
            )));
        }
        if guard_sub_flows && let Some(y_flow_id) = &flow.y_flow_id {
            return Ok(Err(invalid(format!(
                "Flow {flow_id} is a sub-flow of y-flow {y_flow_id}"
            ))));
        }
        if let Err(e) = check(&flow, &*tx) {
            return Ok(Err(e));
        }

        let snapshot = flow.clone();
        tx.save_flow(Flow {
            status: FlowStatus::InProgress,
            ..flow
        })?;
        Ok(Ok(snapshot))
    })?;
    locked
}

/// Reconstructs the leases behind the paths of `flow`.
fn resources_from_paths(
    services: &FlowServices,
    flow: &Flow,
    records: &[FlowPath],
) -> Result<Vec<FlowResources>, SagaError> {
    let find = |id: &Option<PathId>| {
        id.as_ref()
            .and_then(|id| records.iter().find(|p| &p.path_id == id))
    };
    let pairs = [
        (find(&flow.paths.forward), find(&flow.paths.reverse)),
        (
            find(&flow.paths.protected_forward),
            find(&flow.paths.protected_reverse),
        ),
    ];

    let mut leases = Vec::new();
    for (forward, reverse) in pairs {
        let Some(forward) = forward else { continue };
        let encapsulation_id = match forward.encapsulation_id {
            Some(id) => id,
            None => {
                services
                    .resources
                    .get_encapsulation_resources(
                        &forward.path_id,
                        reverse.map(|r| &r.path_id),
                        flow.encapsulation,
                    )?
                    .encapsulation_id
            }
        };
        let path_resources = |path: &FlowPath| PathResources {
            path_id: path.path_id.clone(),
            meter_id: path.meter_id,
            group_id: path.group_id,
        };
        leases.push(FlowResources {
            flow_id: flow.flow_id.clone(),
            cookie: forward.cookie,
            encapsulation_type: flow.encapsulation,
            encapsulation_id,
            forward: path_resources(forward),
            reverse: reverse.map(path_resources),
        });
    }
    Ok(leases)
}

/// Loads the current paths and their leases.
fn load_old_state(ctx: &mut FlowContext, flow: &Flow) -> Result<(), SagaError> {
    let repository = &ctx.core.services.repository;
    let records = flow
        .paths
        .all()
        .into_iter()
        .map(|id| repository.get_path(id))
        .collect::<Result<Vec<_>, _>>()?;

    ctx.old_resources = resources_from_paths(&ctx.core.services, flow, &records)?;
    ctx.old_paths = flow.paths.clone();
    ctx.old_path_records = records;
    Ok(())
}

fn in_progress(flow: &Flow) -> Flow {
    Flow {
        status: FlowStatus::InProgress,
        ..flow.clone()
    }
}

pub fn validate_create(ctx: &mut FlowContext) -> ActionResult<FlowEvent> {
    if !ctx.core.config().create_enabled {
        return Err(disabled("create"));
    }
    let FlowOperationRequest::Create(request) = &ctx.request else {
        return Err(SagaError::Internal("create saga without a create request".into()));
    };
    request.validate()?;
    if request.y_flow_id.is_some() && ctx.core.is_root() {
        return Err(invalid(format!(
            "Flow {} can only be created as part of its y-flow",
            request.flow_id
        )));
    }

    let flow = request.to_flow();
    let record = flow.clone();
    let created = ctx.core.services.repository.in_transaction(|tx| {
        if tx.flow(&record.flow_id)?.is_some() {
            return Ok(Err(SagaError::validation(
                ErrorKind::AlreadyExists,
                format!("Flow {} already exists", record.flow_id),
            )));
        }
        tx.save_flow(record)?;
        Ok(Ok(()))
    })?;
    created?;

    ctx.flow_created = true;
    ctx.target = Some(flow);
    ctx.core.record("Flow was validated successfully");
    Ok(None)
}

pub fn validate_update(ctx: &mut FlowContext) -> ActionResult<FlowEvent> {
    if !ctx.core.config().update_enabled {
        return Err(disabled("update"));
    }
    let FlowOperationRequest::Update(request) = &ctx.request else {
        return Err(SagaError::Internal("update saga without an update request".into()));
    };
    let request: FlowRequest = request.clone();
    request.validate()?;

    let original = lock_flow(ctx, |flow, _| {
        if flow.kind != request.kind {
            return Err(invalid(format!(
                "Changing the kind of flow {} is not supported",
                flow.flow_id
            )));
        }
        Ok(())
    })?;
    ctx.original_flow = Some(original.clone());
    load_old_state(ctx, &original)?;

    let mut target = in_progress(&original);
    request.apply_to(&mut target);
    ctx.target = Some(target);
    ctx.core.record("Flow was validated successfully");
    Ok(None)
}

pub fn validate_reroute(ctx: &mut FlowContext) -> ActionResult<FlowEvent> {
    if !ctx.core.config().reroute_enabled {
        return Err(disabled("reroute"));
    }
    let original = lock_flow(ctx, |_, _| Ok(()))?;
    ctx.original_flow = Some(original.clone());
    load_old_state(ctx, &original)?;

    ctx.target = Some(in_progress(&original));
    if let FlowOperationRequest::Reroute(request) = &ctx.request {
        ctx.core
            .record_details("Flow was validated successfully", request.reason.clone());
    }
    Ok(None)
}

pub fn validate_delete(ctx: &mut FlowContext) -> ActionResult<FlowEvent> {
    if !ctx.core.config().delete_enabled {
        return Err(disabled("delete"));
    }
    let original = lock_flow(ctx, |_, _| Ok(()))?;
    ctx.original_flow = Some(original.clone());
    load_old_state(ctx, &original)?;

    ctx.target = Some(in_progress(&original));
    ctx.core.record("Flow was validated successfully");
    Ok(None)
}

pub fn validate_swap(ctx: &mut FlowContext) -> ActionResult<FlowEvent> {
    if !ctx.core.config().swap_enabled {
        return Err(disabled("path swap"));
    }
    let original = lock_flow(ctx, |flow, tx| {
        let protected = flow.paths.protected();
        if !flow.allocate_protected_path || protected.is_empty() {
            return Err(invalid(format!(
                "Could not swap paths: flow {} doesn't have protected path",
                flow.flow_id
            )));
        }
        for id in flow.paths.all() {
            let active = tx.path(id)?.is_some_and(|p| p.status == PathStatus::Active);
            if !active {
                return Err(invalid(format!(
                    "Could not swap paths: path {id} of flow {} is not active",
                    flow.flow_id
                )));
            }
        }
        Ok(())
    })?;
    ctx.original_flow = Some(original.clone());
    load_old_state(ctx, &original)?;
    // Leases stay with their paths; only the roles change.
    ctx.old_resources.clear();

    let old = &original.paths;
    ctx.new_paths = FlowPathIds {
        forward: old.protected_forward.clone(),
        reverse: old.protected_reverse.clone(),
        protected_forward: old.forward.clone(),
        protected_reverse: old.reverse.clone(),
    };
    ctx.new_path_records = ctx.old_path_records.clone();

    let mut target = in_progress(&original);
    target.paths = ctx.new_paths.clone();
    ctx.target = Some(target);
    ctx.core.record("Flow was validated successfully");
    Ok(None)
}

/// Persists the requested attributes of an update. No-op for other operations.
pub fn update_flow_attributes(ctx: &mut FlowContext) -> ActionResult<FlowEvent> {
    let FlowOperationRequest::Update(request) = &ctx.request else {
        return Ok(None);
    };
    let request = request.clone();
    let flow_id = ctx.flow_id.clone();
    ctx.core.services.repository.in_transaction(|tx| {
        let mut flow = tx
            .flow(&flow_id)?
            .ok_or_else(|| model::RepositoryError::flow_not_found(&flow_id))?;
        request.apply_to(&mut flow);
        tx.save_flow(flow)
    })?;
    ctx.core.record("Flow properties were updated");
    Ok(None)
}
