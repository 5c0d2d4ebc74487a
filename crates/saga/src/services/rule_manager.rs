//! Translation of paths into per-switch rule commands.

use common::SwitchId;
use model::{Flow, FlowEndpoint, FlowPath, PathDirection, Segment};

use crate::messages::{CommandKind, FlowRule, RuleKind, SpeakerRequest};

/// Which rules of a path a command set covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleScope {
    /// The rule at the path source that admits customer traffic.
    Ingress,
    /// Transit, egress and group rules.
    NonIngress,
    All,
}

impl RuleScope {
    fn covers(&self, kind: RuleKind) -> bool {
        match self {
            RuleScope::Ingress => kind == RuleKind::Ingress,
            RuleScope::NonIngress => kind != RuleKind::Ingress,
            RuleScope::All => true,
        }
    }
}

/// Builds the commands realizing a path on its switches.
pub trait RuleManager: Send + Sync {
    fn build_install_commands(&self, flow: &Flow, path: &FlowPath, scope: RuleScope)
    -> Vec<SpeakerRequest>;

    fn build_delete_commands(&self, flow: &Flow, path: &FlowPath, scope: RuleScope)
    -> Vec<SpeakerRequest>;
}

/// Rule manager producing one ingress rule, transit rules, egress rules and,
/// for branched paths, a group rule at the split switch.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlowRuleManager;

impl FlowRuleManager {
    pub fn new() -> Self {
        Self
    }

    fn rules(&self, flow: &Flow, path: &FlowPath) -> Vec<(SwitchId, FlowRule)> {
        let (ingress, egress) = endpoints(flow, path);
        let rule = |kind: RuleKind, in_port: u32, out_ports: Vec<u32>| FlowRule {
            kind,
            flow_id: flow.flow_id.clone(),
            path_id: path.path_id.clone(),
            cookie: path.cookie,
            in_port,
            out_ports,
            meter_id: None,
            group_id: None,
            encapsulation_id: path.encapsulation_id,
        };

        let mut rules = Vec::new();

        // Out ports leaving the end of the trunk: one per branch, or the
        // egress endpoint when the path is not branched.
        let trunk_exits: Vec<u32> = if path.branches.is_empty() {
            vec![egress_port(&egress, path.dst_switch)]
        } else {
            path.branches
                .iter()
                .map(|b| {
                    b.segments
                        .first()
                        .map_or_else(|| egress_port(&egress, b.destination), |s| s.src_port)
                })
                .collect()
        };
        let branched = !path.branches.is_empty();

        let ingress_out = match path.segments.first() {
            Some(first) => vec![first.src_port],
            None if branched => Vec::new(),
            None => trunk_exits.clone(),
        };
        let mut ingress_rule = rule(RuleKind::Ingress, ingress.port, ingress_out);
        ingress_rule.meter_id = path.meter_id;
        rules.push((path.src_switch, ingress_rule));

        push_chain(&mut rules, &path.segments, &rule);
        if let Some(last) = path.segments.last()
            && !branched
        {
            rules.push((
                last.dst_switch,
                rule(RuleKind::Egress, last.dst_port, trunk_exits.clone()),
            ));
        }

        if branched {
            let in_port = path.segments.last().map_or(ingress.port, |s| s.dst_port);
            let mut group = rule(RuleKind::Group, in_port, trunk_exits);
            group.group_id = path.group_id;
            rules.push((path.dst_switch, group));

            for branch in &path.branches {
                push_chain(&mut rules, &branch.segments, &rule);
                if let Some(last) = branch.segments.last() {
                    rules.push((
                        last.dst_switch,
                        rule(
                            RuleKind::Egress,
                            last.dst_port,
                            vec![egress_port(&egress, branch.destination)],
                        ),
                    ));
                }
            }
        }
        rules
    }

    fn commands(
        &self,
        flow: &Flow,
        path: &FlowPath,
        scope: RuleScope,
        kind: CommandKind,
    ) -> Vec<SpeakerRequest> {
        let rules = self
            .rules(flow, path)
            .into_iter()
            .filter(|(_, rule)| scope.covers(rule.kind));
        let mut commands: Vec<SpeakerRequest> = Vec::new();
        for (switch_id, rule) in rules {
            match commands.iter_mut().find(|c| c.switch_id == switch_id) {
                Some(command) => command.rules.push(rule),
                None => commands.push(SpeakerRequest {
                    switch_id,
                    kind,
                    rules: vec![rule],
                }),
            }
        }
        commands
    }
}

impl RuleManager for FlowRuleManager {
    fn build_install_commands(
        &self,
        flow: &Flow,
        path: &FlowPath,
        scope: RuleScope,
    ) -> Vec<SpeakerRequest> {
        self.commands(flow, path, scope, CommandKind::Install)
    }

    fn build_delete_commands(
        &self,
        flow: &Flow,
        path: &FlowPath,
        scope: RuleScope,
    ) -> Vec<SpeakerRequest> {
        self.commands(flow, path, scope, CommandKind::Remove)
    }
}

/// Merges commands of several paths into one request per switch.
pub fn merge_by_switch(commands: impl IntoIterator<Item = SpeakerRequest>) -> Vec<SpeakerRequest> {
    let mut merged: Vec<SpeakerRequest> = Vec::new();
    for command in commands {
        match merged
            .iter_mut()
            .find(|m| m.switch_id == command.switch_id && m.kind == command.kind)
        {
            Some(existing) => existing.rules.extend(command.rules),
            None => merged.push(command),
        }
    }
    merged
}

/// Transit rules for every switch strictly inside the chain.
fn push_chain<F>(rules: &mut Vec<(SwitchId, FlowRule)>, segments: &[Segment], rule: &F)
where
    F: Fn(RuleKind, u32, Vec<u32>) -> FlowRule,
{
    for pair in segments.windows(2) {
        rules.push((
            pair[0].dst_switch,
            rule(RuleKind::Transit, pair[0].dst_port, vec![pair[1].src_port]),
        ));
    }
}

/// Ingress endpoint and egress endpoints of a path.
fn endpoints(flow: &Flow, path: &FlowPath) -> (FlowEndpoint, Vec<FlowEndpoint>) {
    match path.direction {
        PathDirection::Forward => (flow.source, flow.destinations.clone()),
        PathDirection::Reverse => {
            let ingress = flow.destination().copied().unwrap_or(flow.source);
            (ingress, vec![flow.source])
        }
    }
}

fn egress_port(egress: &[FlowEndpoint], switch_id: SwitchId) -> u32 {
    egress
        .iter()
        .find(|e| e.switch_id == switch_id)
        .or(egress.first())
        .map_or(0, |e| e.port)
}
