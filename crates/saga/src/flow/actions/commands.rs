use std::time::Instant;

use common::CommandId;
use model::{Flow, FlowPath};

use crate::{
    correlator::{CommandKey, FailedCommand, ResponseOutcome},
    error::ErrorKind,
    event::{FlowEvent, Operation, SagaInput},
    flow::FlowContext,
    fsm::ActionResult,
    instance::CleanupItem,
    messages::SpeakerRequest,
    services::{RuleScope, merge_by_switch},
};

/// How a step treats commands that exhausted their retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPolicy {
    /// Any failure fails the step.
    Strict,
    /// Failures are recorded as cleanup debt and the step still advances.
    BestEffort,
}

/// Sends a new batch of commands and starts tracking them.
///
/// Raises `NEXT` right away when there is nothing to send.
fn dispatch(ctx: &mut FlowContext, commands: Vec<SpeakerRequest>) -> Option<FlowEvent> {
    let leftover = ctx.pending.reset();
    if !leftover.is_empty() {
        tracing::debug!(saga_key = %ctx.core.saga_key, count = leftover.len(), "dropping failures of previous step");
    }
    if commands.is_empty() {
        return Some(FlowEvent::Next);
    }

    let now = Instant::now();
    for command in commands {
        let command_id = CommandId::new();
        tracing::debug!(
            saga_key = %ctx.core.saga_key,
            %command_id,
            switch_id = %command.switch_id,
            kind = command.kind.as_str(),
            rules = command.rules.len(),
            "sending speaker command"
        );
        ctx.core.services.carrier.send_speaker_request(
            CommandKey::new(command_id, ctx.core.saga_key.clone()),
            command.clone(),
        );
        ctx.pending.track(command_id, command, now);
    }
    None
}

fn install_commands(flow: &Flow, records: &[FlowPath], scope: RuleScope, ctx: &FlowContext) -> Vec<SpeakerRequest> {
    let rules = &ctx.core.services.rules;
    merge_by_switch(
        records
            .iter()
            .flat_map(|path| rules.build_install_commands(flow, path, scope)),
    )
}

fn delete_commands(flow: &Flow, records: &[FlowPath], scope: RuleScope, ctx: &FlowContext) -> Vec<SpeakerRequest> {
    let rules = &ctx.core.services.rules;
    merge_by_switch(
        records
            .iter()
            .flat_map(|path| rules.build_delete_commands(flow, path, scope)),
    )
}

/// Records of the new paths the scope touches. Ingress rules exist only on
/// primary paths.
fn scoped_new_records(ctx: &FlowContext, scope: RuleScope) -> Vec<FlowPath> {
    match scope {
        RuleScope::Ingress => ctx.new_primary_records(),
        RuleScope::NonIngress | RuleScope::All => ctx.new_path_records.clone(),
    }
}

fn emit_install(ctx: &mut FlowContext, scope: RuleScope) -> ActionResult<FlowEvent> {
    let flow = ctx.target()?.clone();
    let commands = install_commands(&flow, &scoped_new_records(ctx, scope), scope, ctx);
    match scope {
        RuleScope::Ingress => ctx.ingress_attempted = true,
        RuleScope::NonIngress | RuleScope::All => ctx.non_ingress_attempted = true,
    }
    ctx.core.record_details(
        "Commands for installing new rules have been sent",
        format!("{scope:?} rules on {} switch(es)", commands.len()),
    );
    Ok(dispatch(ctx, commands))
}

fn emit_validate(ctx: &mut FlowContext, scope: RuleScope) -> ActionResult<FlowEvent> {
    let flow = ctx.target()?.clone();
    let commands: Vec<_> = install_commands(&flow, &scoped_new_records(ctx, scope), scope, ctx)
        .iter()
        .map(SpeakerRequest::to_validation)
        .collect();
    ctx.core.record_details(
        "Commands for validating installed rules have been sent",
        format!("{scope:?} rules on {} switch(es)", commands.len()),
    );
    Ok(dispatch(ctx, commands))
}

pub fn install_non_ingress_rules(ctx: &mut FlowContext) -> ActionResult<FlowEvent> {
    emit_install(ctx, RuleScope::NonIngress)
}

pub fn install_ingress_rules(ctx: &mut FlowContext) -> ActionResult<FlowEvent> {
    emit_install(ctx, RuleScope::Ingress)
}

pub fn validate_non_ingress_rules(ctx: &mut FlowContext) -> ActionResult<FlowEvent> {
    emit_validate(ctx, RuleScope::NonIngress)
}

pub fn validate_ingress_rules(ctx: &mut FlowContext) -> ActionResult<FlowEvent> {
    emit_validate(ctx, RuleScope::Ingress)
}

/// Removes the rules of the paths the flow no longer uses.
///
/// A path swap keeps both path pairs, so only the ingress rule of the old
/// primary goes away.
pub fn emit_remove_old(ctx: &mut FlowContext) -> ActionResult<FlowEvent> {
    let Some(flow) = ctx.original_flow.clone() else {
        return Ok(Some(FlowEvent::Next));
    };
    let commands = if ctx.core.operation == Operation::PathSwap {
        delete_commands(&flow, &ctx.old_primary_records(), RuleScope::Ingress, ctx)
    } else {
        delete_commands(&flow, &ctx.old_path_records, RuleScope::All, ctx)
    };
    ctx.core.record_details(
        "Remove commands for old rules have been sent",
        format!("{} switch(es)", commands.len()),
    );
    Ok(dispatch(ctx, commands))
}

/// Removes whatever new rules may have reached the switches and, when the
/// new ingress was attempted, puts the old ingress rules back.
pub fn emit_revert_rules(ctx: &mut FlowContext) -> ActionResult<FlowEvent> {
    let flow = ctx.target()?.clone();
    let scope = if ctx.core.operation == Operation::PathSwap {
        ctx.ingress_attempted.then_some(RuleScope::Ingress)
    } else if ctx.ingress_attempted {
        Some(RuleScope::All)
    } else if ctx.non_ingress_attempted {
        Some(RuleScope::NonIngress)
    } else {
        None
    };

    let mut commands = match scope {
        Some(scope) => delete_commands(&flow, &scoped_new_records(ctx, scope), scope, ctx),
        None => Vec::new(),
    };
    if ctx.ingress_attempted
        && let Some(original) = ctx.original_flow.clone()
    {
        commands.extend(install_commands(
            &original,
            &ctx.old_primary_records(),
            RuleScope::Ingress,
            ctx,
        ));
    }

    ctx.core.record_details(
        "Commands for reverting new rules have been sent",
        format!("{} switch(es)", commands.len()),
    );
    Ok(dispatch(ctx, commands))
}

fn cookies_of(request: &SpeakerRequest) -> Vec<common::Cookie> {
    let mut cookies: Vec<_> = request.rules.iter().map(|r| r.cookie).collect();
    cookies.sort();
    cookies.dedup();
    cookies
}

fn owe_rules(ctx: &mut FlowContext, failed: Vec<FailedCommand>) {
    for command in failed {
        ctx.core.warn(format!(
            "Failed to {} rules on switch {}: {}",
            command.request.kind.as_str(),
            command.request.switch_id,
            command.reason
        ));
        ctx.core.owe(CleanupItem::StaleRules {
            switch_id: command.request.switch_id,
            cookies: cookies_of(&command.request),
            reason: command.reason,
        });
    }
}

/// Accounts for one speaker response of the current step.
///
/// Raises `NEXT` once every command is accounted for; under
/// [`StepPolicy::Strict`] any exhausted command raises `ERROR` instead.
pub fn handle_response(
    ctx: &mut FlowContext,
    input: &SagaInput,
    policy: StepPolicy,
) -> ActionResult<FlowEvent> {
    let SagaInput::Speaker(response) = input else {
        tracing::warn!(saga_key = %ctx.core.saga_key, "non-speaker input ignored");
        return Ok(None);
    };

    match ctx.pending.on_response(response, Instant::now()) {
        ResponseOutcome::Unknown => {
            tracing::debug!(saga_key = %ctx.core.saga_key, command_id = %response.command_id, "response for unknown command");
            return Ok(None);
        }
        ResponseOutcome::Completed => {}
        ResponseOutcome::Retry(request) => {
            metrics::counter!("speaker_command_retries_total").increment(1);
            ctx.core.record_details(
                "Retrying speaker command",
                format!(
                    "{} on switch {}: {}",
                    response.command_id,
                    response.switch_id,
                    response.outcome.describe()
                ),
            );
            ctx.core.services.carrier.send_speaker_request(
                CommandKey::new(response.command_id, ctx.core.saga_key.clone()),
                request,
            );
            return Ok(None);
        }
        ResponseOutcome::Failed(reason) => {
            ctx.core.record_error(
                &format!("Speaker command failed on switch {}", response.switch_id),
                reason,
            );
        }
    }

    if !ctx.pending.is_settled() {
        return Ok(None);
    }
    let failed = ctx.pending.reset();
    if failed.is_empty() {
        return Ok(Some(FlowEvent::Next));
    }

    match policy {
        StepPolicy::Strict => {
            let kind = if failed.iter().all(|f| f.timed_out) {
                ErrorKind::Timeout
            } else {
                ErrorKind::SpeakerFailure
            };
            let first = &failed[0];
            ctx.core.fail(
                kind,
                format!(
                    "Failed to {} rules on {} switch(es); switch {}: {}",
                    first.request.kind.as_str(),
                    failed.len(),
                    first.request.switch_id,
                    first.reason
                ),
            );
            Ok(Some(FlowEvent::Error))
        }
        StepPolicy::BestEffort => {
            owe_rules(ctx, failed);
            Ok(Some(FlowEvent::Next))
        }
    }
}

fn abandon(ctx: &mut FlowContext, policy: StepPolicy) -> ActionResult<FlowEvent> {
    let abandoned = ctx.pending.abandon();
    for (command_id, pending) in &abandoned {
        ctx.core.record_error(
            "Command is not finished yet",
            format!(
                "{command_id}: {} on switch {}",
                pending.request.kind.as_str(),
                pending.request.switch_id
            ),
        );
    }

    match policy {
        StepPolicy::Strict => ctx.core.fail(
            ErrorKind::Timeout,
            format!(
                "Saga timed out with {} command(s) not finished",
                abandoned.len()
            ),
        ),
        StepPolicy::BestEffort => {
            let failed = abandoned
                .into_iter()
                .map(|(command_id, pending)| FailedCommand {
                    command_id,
                    request: pending.request,
                    reason: "no response before saga timeout".to_string(),
                    timed_out: true,
                })
                .collect();
            owe_rules(ctx, failed);
        }
    }
    Ok(None)
}

/// Gives up on the commands of a forward step.
pub fn abandon_commands(ctx: &mut FlowContext) -> ActionResult<FlowEvent> {
    abandon(ctx, StepPolicy::Strict)
}

/// Gives up on the commands of a cleanup or rollback step.
pub fn abandon_cleanup_commands(ctx: &mut FlowContext) -> ActionResult<FlowEvent> {
    abandon(ctx, StepPolicy::BestEffort)
}
