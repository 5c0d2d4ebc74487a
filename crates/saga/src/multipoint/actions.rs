use std::collections::HashSet;

use common::FlowId;
use model::{
    FlowRepositoryExt, FlowStatus, FlowTransaction, RepoResult, RepositoryError, YFlow,
};

use crate::{
    error::{ErrorKind, SagaError},
    event::{FlowEvent, Operation, SagaInput, SagaOutcome},
    flow::{FlowOperationRequest, FlowRequest, RerouteRequest},
    fsm::ActionResult,
    instance::{ChildStart, CleanupItem},
    services::YPointResources,
};

use super::{YFlowContext, YFlowOperationRequest, YFlowRequest};

fn invalid(message: String) -> SagaError {
    SagaError::validation(ErrorKind::RequestInvalid, message)
}

fn enabled(ctx: &YFlowContext) -> bool {
    let config = ctx.core.config();
    match ctx.core.operation {
        Operation::Create => config.create_enabled,
        Operation::Update => config.update_enabled,
        Operation::Reroute => config.reroute_enabled,
        Operation::Delete => config.delete_enabled,
        Operation::PathSwap => config.swap_enabled,
    }
}

fn check_request(request: &YFlowRequest) -> Result<(), SagaError> {
    if request.sub_flows.len() < 2 {
        return Err(invalid(format!(
            "Y-flow {} must have at least two sub-flows",
            request.y_flow_id
        )));
    }
    let mut seen = HashSet::new();
    for sub_flow in &request.sub_flows {
        if !seen.insert(&sub_flow.flow_id) {
            return Err(invalid(format!(
                "Sub-flow {} is listed twice in y-flow {}",
                sub_flow.flow_id, request.y_flow_id
            )));
        }
        request.sub_flow_request(sub_flow).validate()?;
    }
    Ok(())
}

/// Marks the y-flow in progress and returns its previous state.
///
/// `check` runs inside the same transaction and may change the record
/// before it is written back.
fn lock_y_flow<F>(ctx: &YFlowContext, check: F) -> Result<YFlow, SagaError>
where
    F: FnOnce(&mut YFlow, &dyn FlowTransaction) -> Result<(), SagaError>,
{
    let y_flow_id = ctx.y_flow_id.clone();
    let locked = ctx.core.services.repository.in_transaction(|tx| {
        let Some(y_flow) = tx.y_flow(&y_flow_id)? else {
            return Ok(Err(SagaError::validation(
                ErrorKind::NotFound,
                format!("Y-flow {y_flow_id} not found"),
            )));
        };
        if y_flow.status == FlowStatus::InProgress {
            return Ok(Err(SagaError::validation(
                ErrorKind::InProgress,
                format!("Y-flow {y_flow_id} is in progress now"),
            )));
        }

        let snapshot = y_flow.clone();
        let mut updated = y_flow;
        if let Err(e) = check(&mut updated, &*tx) {
            return Ok(Err(e));
        }
        updated.status = FlowStatus::InProgress;
        tx.save_y_flow(updated)?;
        Ok(Ok(snapshot))
    })?;
    locked
}

fn plan<I>(ctx: &mut YFlowContext, children: I)
where
    I: IntoIterator<Item = (bool, FlowOperationRequest)>,
{
    for (mandatory, request) in children {
        let flow_id = request.flow_id().clone();
        ctx.expected.insert(flow_id.clone());
        ctx.planned.push(ChildStart {
            saga_key: ctx.core.saga_key.fork(flow_id.as_str()),
            request,
            mandatory,
        });
    }
}

/// One child request per member of `y_flow`.
fn plan_members<F>(ctx: &mut YFlowContext, y_flow: &YFlow, request: F)
where
    F: Fn(&FlowId) -> FlowOperationRequest,
{
    let children: Vec<_> = y_flow
        .sub_flows
        .iter()
        .map(|s| (s.mandatory, request(&s.flow_id)))
        .collect();
    plan(ctx, children);
}

fn validate_new(ctx: &mut YFlowContext, request: &YFlowRequest) -> Result<(), SagaError> {
    check_request(request)?;
    let mut y_flow = YFlow::new(
        request.y_flow_id.clone(),
        request.shared_endpoint,
        request.bandwidth,
    );
    request.apply_to(&mut y_flow);
    y_flow.status = FlowStatus::InProgress;

    let record = y_flow.clone();
    let created = ctx.core.services.repository.in_transaction(|tx| {
        if tx.y_flow(&record.y_flow_id)?.is_some() {
            return Ok(Err(SagaError::validation(
                ErrorKind::AlreadyExists,
                format!("Y-flow {} already exists", record.y_flow_id),
            )));
        }
        for sub_flow in &record.sub_flows {
            if tx.flow(&sub_flow.flow_id)?.is_some() {
                return Ok(Err(SagaError::validation(
                    ErrorKind::AlreadyExists,
                    format!("Flow {} already exists", sub_flow.flow_id),
                )));
            }
        }
        tx.save_y_flow(record)?;
        Ok(Ok(()))
    })?;
    created?;
    ctx.created = true;

    plan(
        ctx,
        request.sub_flows.iter().map(|s| {
            (s.mandatory, FlowOperationRequest::Create(request.sub_flow_request(s)))
        }),
    );
    Ok(())
}

fn validate_changed(ctx: &mut YFlowContext, request: &YFlowRequest) -> Result<(), SagaError> {
    check_request(request)?;
    let mut updates = Vec::new();
    let original = lock_y_flow(ctx, |y_flow, tx| {
        let current: HashSet<_> = y_flow.sub_flows.iter().map(|s| &s.flow_id).collect();
        let requested: HashSet<_> = request.sub_flows.iter().map(|s| &s.flow_id).collect();
        if current != requested {
            return Err(invalid(format!(
                "Changing the sub-flows of y-flow {} is not supported",
                y_flow.y_flow_id
            )));
        }
        for sub_flow in &request.sub_flows {
            let flow = tx
                .flow(&sub_flow.flow_id)?
                .ok_or_else(|| RepositoryError::flow_not_found(&sub_flow.flow_id))?;
            let mut update = FlowRequest::from_flow(&flow);
            update.bandwidth = request.bandwidth;
            update.source = request.shared_endpoint;
            update.destinations = vec![sub_flow.endpoint];
            updates.push((sub_flow.mandatory, update));
        }
        request.apply_to(y_flow);
        Ok(())
    })?;
    ctx.original = Some(original);
    plan(
        ctx,
        updates
            .into_iter()
            .map(|(mandatory, update)| (mandatory, FlowOperationRequest::Update(update))),
    );
    Ok(())
}

fn y_point_of(y_flow: &YFlow) -> Option<YPointResources> {
    Some(YPointResources {
        y_flow_id: y_flow.y_flow_id.clone(),
        switch_id: y_flow.y_point?,
        meter_id: y_flow.shared_meter_id?,
        group_id: y_flow.y_point_group_id?,
    })
}

/// Checks the request, marks the y-flow in progress and plans one child
/// saga per sub-flow.
pub fn validate_y_flow(ctx: &mut YFlowContext) -> ActionResult<FlowEvent> {
    if !enabled(ctx) {
        return Err(SagaError::validation(
            ErrorKind::NotPermitted,
            format!("Y-flow {} feature is disabled", ctx.core.operation),
        ));
    }

    match ctx.request.clone() {
        YFlowOperationRequest::Create(request) => validate_new(ctx, &request)?,
        YFlowOperationRequest::Update(request) => validate_changed(ctx, &request)?,
        YFlowOperationRequest::Reroute { reason, .. } => {
            let original = lock_y_flow(ctx, |_, _| Ok(()))?;
            ctx.original = Some(original.clone());
            plan_members(ctx, &original, |flow_id| {
                FlowOperationRequest::Reroute(RerouteRequest::new(flow_id.clone(), reason.clone()))
            });
        }
        YFlowOperationRequest::Delete(_) => {
            let original = lock_y_flow(ctx, |_, _| Ok(()))?;
            ctx.original = Some(original.clone());
            ctx.y_point = y_point_of(&original);
            plan_members(ctx, &original, |flow_id| FlowOperationRequest::Delete(flow_id.clone()));
        }
        YFlowOperationRequest::PathSwap(_) => {
            let original = lock_y_flow(ctx, |_, _| Ok(()))?;
            ctx.original = Some(original.clone());
            plan_members(ctx, &original, |flow_id| FlowOperationRequest::PathSwap(flow_id.clone()));
        }
    }

    ctx.core.record("Y-flow was validated successfully");
    Ok(None)
}

/// Leases the shared meter and group of a new y-flow at its shared endpoint.
pub fn allocate_y_point(ctx: &mut YFlowContext) -> ActionResult<FlowEvent> {
    let YFlowOperationRequest::Create(request) = &ctx.request else {
        return Ok(None);
    };
    let switch_id = request.shared_endpoint.switch_id;
    let resources = ctx
        .core
        .services
        .resources
        .allocate_y_point(&ctx.y_flow_id, switch_id)?;
    ctx.y_point = Some(resources.clone());

    let stored = resources.clone();
    ctx.core.services.repository.in_transaction(|tx| {
        let mut y_flow = tx
            .y_flow(&stored.y_flow_id)?
            .ok_or_else(|| RepositoryError::y_flow_not_found(&stored.y_flow_id))?;
        y_flow.y_point = Some(stored.switch_id);
        y_flow.shared_meter_id = Some(stored.meter_id);
        y_flow.y_point_group_id = Some(stored.group_id);
        tx.save_y_flow(y_flow)
    })?;

    ctx.core.record_details(
        "Y-point resources were allocated",
        format!(
            "switch {}, meter {}, group {}",
            resources.switch_id,
            resources.meter_id.value(),
            resources.group_id.value()
        ),
    );
    Ok(None)
}

/// Starts the planned child sagas.
pub fn start_sub_flows(ctx: &mut YFlowContext) -> ActionResult<FlowEvent> {
    if ctx.planned.is_empty() {
        return Ok(Some(FlowEvent::Next));
    }
    for child in ctx.planned.clone() {
        tracing::debug!(
            saga_key = %ctx.core.saga_key,
            child = %child.saga_key,
            mandatory = child.mandatory,
            "starting sub-flow saga"
        );
        ctx.core.spawn_child(child);
    }
    ctx.core
        .record_details("Sub-flow sagas started", format!("{} sub-flows", ctx.planned.len()));
    Ok(None)
}

/// Collects one child outcome. Once every child reported, a failed
/// mandatory sub-flow fails the y-flow operation.
pub fn on_sub_flow_outcome(ctx: &mut YFlowContext, input: &SagaInput) -> ActionResult<FlowEvent> {
    let SagaInput::Child(child) = input else {
        return Err(SagaError::UnexpectedInput(
            "sub-flow outcome expected".into(),
        ));
    };
    if !ctx.expected.contains(&child.flow_id) {
        ctx.core
            .warn(format!("Outcome of unexpected sub-flow {} was ignored", child.flow_id));
        return Ok(None);
    }

    match &child.outcome {
        SagaOutcome::Completed { .. } => ctx
            .core
            .record_details("Sub-flow completed", child.flow_id.to_string()),
        SagaOutcome::Failed { reason, .. } => ctx
            .core
            .record_error("Sub-flow failed", format!("{}: {}", child.flow_id, reason)),
    }
    ctx.outcomes.insert(child.flow_id.clone(), child.outcome.clone());
    if ctx.outcomes.len() < ctx.expected.len() {
        return Ok(None);
    }

    let mut failed_mandatory = None;
    for planned in &ctx.planned {
        let flow_id = planned.request.flow_id();
        let Some(SagaOutcome::Failed { kind, reason }) = ctx.outcomes.get(flow_id) else {
            continue;
        };
        if planned.mandatory {
            if failed_mandatory.is_none() {
                failed_mandatory = Some((*kind, format!("Sub-flow {flow_id} failed: {reason}")));
            }
        } else {
            metrics::counter!("y_flow_optional_failures_total").increment(1);
            ctx.core
                .warn(format!("Optional sub-flow {flow_id} failed: {reason}"));
        }
    }

    match failed_mandatory {
        Some((kind, reason)) => {
            ctx.core.fail(kind, reason);
            Ok(Some(FlowEvent::Error))
        }
        None => Ok(Some(FlowEvent::Next)),
    }
}

fn existing_members(tx: &dyn FlowTransaction, y_flow: &YFlow) -> RepoResult<Vec<FlowStatus>> {
    let mut statuses = Vec::new();
    for sub_flow in &y_flow.sub_flows {
        if let Some(flow) = tx.flow(&sub_flow.flow_id)? {
            statuses.push(flow.status);
        }
    }
    Ok(statuses)
}

fn prune_members(tx: &dyn FlowTransaction, y_flow: &mut YFlow) -> RepoResult<()> {
    let mut kept = Vec::with_capacity(y_flow.sub_flows.len());
    for sub_flow in y_flow.sub_flows.drain(..) {
        if tx.flow(&sub_flow.flow_id)?.is_some() {
            kept.push(sub_flow);
        }
    }
    y_flow.sub_flows = kept;
    Ok(())
}

fn release_lease(ctx: &mut YFlowContext, resources: YPointResources) {
    match ctx.core.services.resources.deallocate_y_point(&resources) {
        Ok(()) => ctx.core.record("Y-point resources were deallocated"),
        Err(e) => {
            ctx.core
                .warn(format!("Failed to deallocate y-point resources: {e}"));
            ctx.core.owe(CleanupItem::YPoint(resources));
        }
    }
}

/// After a delete: frees the y-point and drops the y-flow once no sub-flow
/// is left. Sub-flows that could not be deleted keep both.
pub fn release_y_point(ctx: &mut YFlowContext) -> ActionResult<FlowEvent> {
    if ctx.core.operation != Operation::Delete {
        return Ok(None);
    }
    let y_flow_id = ctx.y_flow_id.clone();
    let emptied = ctx.core.services.repository.in_transaction(|tx| {
        let Some(mut y_flow) = tx.y_flow(&y_flow_id)? else {
            return Ok(true);
        };
        prune_members(&*tx, &mut y_flow)?;
        if y_flow.sub_flows.is_empty() {
            tx.remove_y_flow(&y_flow_id)?;
            return Ok(true);
        }
        tx.save_y_flow(y_flow)?;
        Ok(false)
    })?;

    if emptied {
        if let Some(resources) = ctx.y_point.take() {
            release_lease(ctx, resources);
        }
        ctx.core.record("Y-flow was removed");
    }
    Ok(None)
}

fn status_info(status: FlowStatus) -> Option<String> {
    match status {
        FlowStatus::Up => None,
        FlowStatus::Degraded => Some("Some sub-flows are degraded".to_string()),
        _ => Some("Some sub-flows are not active".to_string()),
    }
}

/// Aggregates the statuses of the sub-flows into the y-flow status.
pub fn update_y_flow_status(ctx: &mut YFlowContext) -> ActionResult<FlowEvent> {
    let y_flow_id = ctx.y_flow_id.clone();
    let status = ctx.core.services.repository.in_transaction(|tx| {
        let Some(mut y_flow) = tx.y_flow(&y_flow_id)? else {
            return Ok(None);
        };
        prune_members(&*tx, &mut y_flow)?;
        let status = FlowStatus::aggregate(&existing_members(&*tx, &y_flow)?);
        y_flow.status = status;
        y_flow.status_info = status_info(status);
        tx.save_y_flow(y_flow)?;
        Ok(Some(status))
    })?;

    if let Some(status) = status {
        ctx.core
            .record_details("Y-flow status was updated", status.as_str());
    }
    Ok(None)
}

/// Frees the y-point a failed create leased, unless a sub-flow exists that
/// still uses it.
pub fn revert_y_point(ctx: &mut YFlowContext) -> ActionResult<FlowEvent> {
    if !ctx.created {
        return Ok(None);
    }
    let Some(resources) = ctx.y_point.clone() else {
        return Ok(None);
    };

    let y_flow_id = ctx.y_flow_id.clone();
    let in_use = ctx.core.services.repository.in_transaction(|tx| {
        let Some(y_flow) = tx.y_flow(&y_flow_id)? else {
            return Ok(false);
        };
        Ok(!existing_members(&*tx, &y_flow)?.is_empty())
    });
    match in_use {
        Ok(false) => {
            ctx.y_point = None;
            release_lease(ctx, resources);
        }
        Ok(true) => ctx
            .core
            .record("Y-point resources are kept for the remaining sub-flows"),
        Err(e) => ctx
            .core
            .warn(format!("Failed to check y-point usage: {e}")),
    }
    Ok(None)
}

/// Restores the y-flow record: a created one without sub-flows is removed,
/// an untouched one gets its previous attributes back.
pub fn revert_y_flow(ctx: &mut YFlowContext) -> ActionResult<FlowEvent> {
    let y_flow_id = ctx.y_flow_id.clone();
    let created = ctx.created;
    let restore = if ctx.any_child_succeeded() {
        None
    } else {
        ctx.original.clone()
    };

    let result = ctx.core.services.repository.in_transaction(|tx| {
        let Some(mut y_flow) = tx.y_flow(&y_flow_id)? else {
            return Ok(());
        };
        if created && existing_members(&*tx, &y_flow)?.is_empty() {
            return tx.remove_y_flow(&y_flow_id);
        }
        if let Some(original) = restore {
            let status = y_flow.status;
            y_flow = YFlow { status, ..original };
        }
        prune_members(&*tx, &mut y_flow)?;
        tx.save_y_flow(y_flow)
    });
    match result {
        Ok(()) => ctx.core.record("Y-flow was reverted"),
        Err(e) => ctx.core.warn(format!("Failed to revert y-flow: {e}")),
    }
    Ok(None)
}

/// Gives the y-flow a final status after a failure.
pub fn revert_y_flow_status(ctx: &mut YFlowContext) -> ActionResult<FlowEvent> {
    let y_flow_id = ctx.y_flow_id.clone();
    let original_status = if ctx.any_child_succeeded() {
        None
    } else {
        ctx.original.as_ref().map(|o| o.status)
    };
    let reason = ctx.core.failure_reason().map(str::to_string);

    let result = ctx.core.services.repository.in_transaction(|tx| {
        let Some(mut y_flow) = tx.y_flow(&y_flow_id)? else {
            return Ok(());
        };
        y_flow.status = match original_status {
            Some(status) => status,
            None => FlowStatus::aggregate(&existing_members(&*tx, &y_flow)?),
        };
        y_flow.status_info = reason;
        tx.save_y_flow(y_flow)
    });
    match result {
        Ok(()) => ctx.core.record("Y-flow status was reverted"),
        Err(e) => ctx
            .core
            .warn(format!("Failed to revert y-flow status: {e}")),
    }
    Ok(None)
}
