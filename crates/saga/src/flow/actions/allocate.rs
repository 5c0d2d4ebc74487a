use std::collections::HashSet;

use common::PathId;
use model::{Flow, FlowPath, FlowRepositoryExt, FlowResources, PathDirection, PathResources, PathStatus};

use crate::{
    error::{ErrorKind, SagaError},
    event::FlowEvent,
    flow::{FlowContext, FlowOperationRequest},
    fsm::ActionResult,
    services::{ComputedPath, LinkKey, PathRequest, ResourceRequest},
};

/// Runs `attempt` again while it fails with a retryable error, at most
/// `limit` extra times.
fn retrying<T>(
    limit: u32,
    what: &str,
    mut attempt: impl FnMut() -> Result<T, SagaError>,
) -> Result<T, SagaError> {
    let mut retries = 0;
    loop {
        match attempt() {
            Err(e) if e.is_retryable() && retries < limit => {
                retries += 1;
                tracing::debug!(error = %e, retries, "{what} conflict, retrying");
            }
            other => return other,
        }
    }
}

fn path_request(flow: &Flow, avoid_links: HashSet<LinkKey>) -> PathRequest {
    let mut request = PathRequest::new(
        flow.flow_id.clone(),
        flow.source.switch_id,
        flow.destinations.iter().map(|d| d.switch_id).collect(),
        flow.bandwidth,
    );
    request.ignore_bandwidth = flow.ignore_bandwidth;
    request.avoid_links = avoid_links;
    request
}

fn find_path(ctx: &FlowContext, request: &PathRequest) -> Result<ComputedPath, SagaError> {
    let paths = &ctx.core.services.paths;
    retrying(ctx.core.config().path_allocation_retries_limit, "path", || {
        paths.find_path(request)
    })
}

fn matches_route(path: &FlowPath, computed: &ComputedPath) -> bool {
    path.src_switch == computed.src_switch
        && path.dst_switch == computed.dst_switch
        && path.segments == computed.segments
        && path.branches == computed.branches
}

/// A forward path record, or the reverse one built from the reversed route.
fn build_path(
    flow: &Flow,
    resources: &FlowResources,
    path: &PathResources,
    direction: PathDirection,
    protected: bool,
    route: &ComputedPath,
) -> FlowPath {
    FlowPath {
        path_id: path.path_id.clone(),
        flow_id: flow.flow_id.clone(),
        direction,
        protected,
        src_switch: route.src_switch,
        dst_switch: route.dst_switch,
        segments: route.segments.clone(),
        branches: route.branches.clone(),
        cookie: resources.cookie,
        meter_id: path.meter_id,
        group_id: path.group_id,
        encapsulation_id: Some(resources.encapsulation_id),
        bandwidth: flow.bandwidth,
        status: PathStatus::InProgress,
    }
}

/// Leases resources for a computed route and stores its path records.
fn allocate_pair(
    ctx: &mut FlowContext,
    flow: &Flow,
    route: &ComputedPath,
    protected: bool,
) -> Result<(PathId, Option<PathId>), SagaError> {
    let tag = |direction: &str| {
        if protected {
            format!("protected_{direction}")
        } else {
            direction.to_string()
        }
    };
    let request = ResourceRequest {
        flow_id: flow.flow_id.clone(),
        forward_path_id: PathId::generate(&flow.flow_id, &tag("forward")),
        reverse_path_id: flow
            .has_reverse_direction()
            .then(|| PathId::generate(&flow.flow_id, &tag("reverse"))),
        encapsulation: flow.encapsulation,
        metered: flow.bandwidth > 0 && !flow.ignore_bandwidth,
        needs_group: flow.is_multi_destination(),
    };

    let manager = &ctx.core.services.resources;
    let resources = retrying(
        ctx.core.config().resource_allocation_retries_limit,
        "resource",
        || manager.allocate(&request),
    )?;
    ctx.new_resources.push(resources.clone());

    let mut records = vec![build_path(
        flow,
        &resources,
        &resources.forward,
        PathDirection::Forward,
        protected,
        route,
    )];
    if let Some(reverse) = &resources.reverse {
        records.push(build_path(
            flow,
            &resources,
            reverse,
            PathDirection::Reverse,
            protected,
            &route.reversed(),
        ));
    }
    for record in &records {
        record.validate()?;
    }
    ctx.new_path_records.extend(records.iter().cloned());

    ctx.core.services.repository.in_transaction(|tx| {
        for record in records {
            tx.save_path(record)?;
        }
        Ok(())
    })?;

    Ok((
        resources.forward.path_id.clone(),
        resources.reverse.as_ref().map(|r| r.path_id.clone()),
    ))
}

fn no_path(ctx: &mut FlowContext, what: &str, reason: &str) -> ActionResult<FlowEvent> {
    ctx.core
        .record_error(&format!("Failed to find {what} path"), reason);
    ctx.core.fail(
        ErrorKind::NoPathFound,
        format!("Not enough bandwidth or no path found. {reason}"),
    );
    Ok(Some(FlowEvent::NoPathFound))
}

/// True for a reroute that would land on the paths the flow already has.
fn route_unchanged(
    ctx: &FlowContext,
    flow: &Flow,
    primary: &ComputedPath,
) -> Result<bool, SagaError> {
    let FlowOperationRequest::Reroute(request) = &ctx.request else {
        return Ok(false);
    };
    if request.force {
        return Ok(false);
    }
    let same = |id: &Option<PathId>, route: &ComputedPath| {
        id.as_ref()
            .and_then(|id| ctx.old_record(id))
            .is_some_and(|old| matches_route(old, route))
    };
    if !same(&ctx.old_paths.forward, primary) {
        return Ok(false);
    }
    if !flow.allocate_protected_path {
        return Ok(true);
    }
    let protected = match find_path(ctx, &path_request(flow, primary.links())) {
        Ok(route) => route,
        Err(SagaError::NoPathFound(_)) => return Ok(false),
        Err(e) => return Err(e),
    };
    Ok(same(&ctx.old_paths.protected_forward, &protected))
}

pub fn allocate_primary(ctx: &mut FlowContext) -> ActionResult<FlowEvent> {
    let flow = ctx.target()?.clone();
    let route = match find_path(ctx, &path_request(&flow, HashSet::new())) {
        Ok(route) => route,
        Err(SagaError::NoPathFound(reason)) => return no_path(ctx, "primary", &reason),
        Err(e) => return Err(e),
    };

    if route_unchanged(ctx, &flow, &route)? {
        ctx.core
            .record("Found the same primary path. Skipped creating of it");
        return Ok(Some(FlowEvent::PathUnchanged));
    }

    let (forward, reverse) = allocate_pair(ctx, &flow, &route, false)?;
    ctx.core.record_details(
        "New primary paths were created",
        format!("forward {forward}, reverse {}", display_optional(&reverse)),
    );
    ctx.new_paths.forward = Some(forward);
    ctx.new_paths.reverse = reverse;
    Ok(None)
}

pub fn allocate_protected(ctx: &mut FlowContext) -> ActionResult<FlowEvent> {
    let flow = ctx.target()?.clone();
    if !flow.allocate_protected_path {
        return Ok(None);
    }

    let primary = ctx
        .new_primary_records()
        .into_iter()
        .find(|p| p.direction == PathDirection::Forward)
        .ok_or_else(|| SagaError::Internal("protected path requested before primary".into()))?;
    let avoid = primary.all_segments().map(|s| s.link_key()).collect();

    let route = match find_path(ctx, &path_request(&flow, avoid)) {
        Ok(route) => route,
        Err(SagaError::NoPathFound(_)) => {
            return no_path(
                ctx,
                "protected",
                "Couldn't find non overlapping protected path",
            );
        }
        Err(e) => return Err(e),
    };

    let (forward, reverse) = allocate_pair(ctx, &flow, &route, true)?;
    ctx.core.record_details(
        "New protected paths were created",
        format!("forward {forward}, reverse {}", display_optional(&reverse)),
    );
    ctx.new_paths.protected_forward = Some(forward);
    ctx.new_paths.protected_reverse = reverse;
    Ok(None)
}

fn display_optional(id: &Option<PathId>) -> String {
    id.as_ref()
        .map_or_else(|| "none".to_string(), ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::testing::Fixture;
    use crate::flow::actions::validate_update;

    #[test]
    fn allocation_leases_next_cookie_and_stores_paths() {
        let fixture = Fixture::with_flow_up("F1");
        let mut ctx = fixture.context(FlowOperationRequest::Update(fixture.update_request("F1", 20)));
        validate_update(&mut ctx).unwrap();

        assert!(allocate_primary(&mut ctx).unwrap().is_none());
        assert_eq!(ctx.new_resources.len(), 1);
        assert_eq!(ctx.new_resources[0].cookie.value(), 101);
        assert_eq!(ctx.new_path_records.len(), 2);
        assert!(ctx.new_paths.forward.is_some() && ctx.new_paths.reverse.is_some());
        assert!(
            ctx.new_path_records
                .iter()
                .all(|p| p.status == PathStatus::InProgress)
        );
    }

    #[test]
    fn too_much_bandwidth_raises_no_path_found() {
        let fixture = Fixture::with_flow_up("F1");
        let mut ctx = fixture.context(FlowOperationRequest::Update(
            fixture.update_request("F1", 1_000_000_000),
        ));
        validate_update(&mut ctx).unwrap();

        assert_eq!(allocate_primary(&mut ctx).unwrap(), Some(FlowEvent::NoPathFound));
        assert!(ctx.new_resources.is_empty());
        assert_eq!(ctx.core.error().unwrap().0, ErrorKind::NoPathFound);
    }

    #[test]
    fn transient_conflicts_are_retried() {
        let fixture = Fixture::with_flow_up("F1");
        fixture.resources.fail_next_allocations(2);
        let mut ctx = fixture.context(FlowOperationRequest::Update(fixture.update_request("F1", 20)));
        validate_update(&mut ctx).unwrap();

        assert!(allocate_primary(&mut ctx).unwrap().is_none());
        assert_eq!(ctx.new_resources.len(), 1);
    }
}
