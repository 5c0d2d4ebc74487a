//! Paths: ordered hops plus the resources identifying their rules.

use common::{Cookie, EncapsulationId, FlowId, GroupId, MeterId, PathId, SwitchId};
use serde::{Deserialize, Serialize};

use crate::{PathStatus, RepoResult, RepositoryError};

/// One hop between two switch ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Segment {
    pub src_switch: SwitchId,
    pub src_port: u32,
    pub dst_switch: SwitchId,
    pub dst_port: u32,
}

impl Segment {
    pub fn new(src_switch: SwitchId, src_port: u32, dst_switch: SwitchId, dst_port: u32) -> Self {
        Self {
            src_switch,
            src_port,
            dst_switch,
            dst_port,
        }
    }

    /// The same link traversed the other way.
    pub fn reversed(&self) -> Self {
        Self::new(self.dst_switch, self.dst_port, self.src_switch, self.src_port)
    }

    /// Direction-independent identity of the underlying link.
    pub fn link_key(&self) -> (SwitchId, u32, SwitchId, u32) {
        let a = (self.src_switch, self.src_port);
        let b = (self.dst_switch, self.dst_port);
        if a <= b {
            (a.0, a.1, b.0, b.1)
        } else {
            (b.0, b.1, a.0, a.1)
        }
    }
}

/// Branch of a multi-destination path, leaving the split switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathBranch {
    pub destination: SwitchId,
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathDirection {
    Forward,
    Reverse,
}

impl PathDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            PathDirection::Forward => "forward",
            PathDirection::Reverse => "reverse",
        }
    }
}

/// A concrete directed route owned by a flow.
///
/// For multi-destination flows `dst_switch` is the split switch, where the
/// trunk ends and every branch begins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowPath {
    pub path_id: PathId,
    pub flow_id: FlowId,
    pub direction: PathDirection,
    pub protected: bool,
    pub src_switch: SwitchId,
    pub dst_switch: SwitchId,
    pub segments: Vec<Segment>,
    pub branches: Vec<PathBranch>,
    pub cookie: Cookie,
    pub meter_id: Option<MeterId>,
    pub group_id: Option<GroupId>,
    pub encapsulation_id: Option<EncapsulationId>,
    pub bandwidth: u64,
    pub status: PathStatus,
}

impl FlowPath {
    /// Checks that the trunk and every branch form contiguous chains.
    pub fn validate(&self) -> RepoResult<()> {
        check_chain(&self.path_id, self.src_switch, self.dst_switch, &self.segments)?;
        for branch in &self.branches {
            check_chain(
                &self.path_id,
                self.dst_switch,
                branch.destination,
                &branch.segments,
            )?;
        }
        Ok(())
    }

    pub fn is_one_switch(&self) -> bool {
        self.segments.is_empty() && self.branches.iter().all(|b| b.segments.is_empty())
    }

    /// Every switch the path touches, in traversal order, without repeats.
    pub fn switches(&self) -> Vec<SwitchId> {
        let mut out = vec![self.src_switch];
        let hops = self
            .segments
            .iter()
            .chain(self.branches.iter().flat_map(|b| b.segments.iter()));
        for segment in hops {
            if !out.contains(&segment.dst_switch) {
                out.push(segment.dst_switch);
            }
        }
        for branch in &self.branches {
            if !out.contains(&branch.destination) {
                out.push(branch.destination);
            }
        }
        out
    }

    /// Every segment of the trunk and branches.
    pub fn all_segments(&self) -> impl Iterator<Item = &Segment> {
        self.segments
            .iter()
            .chain(self.branches.iter().flat_map(|b| b.segments.iter()))
    }

    /// True when both paths traverse exactly the same hops.
    pub fn same_route(&self, other: &FlowPath) -> bool {
        self.src_switch == other.src_switch
            && self.dst_switch == other.dst_switch
            && self.segments == other.segments
            && self.branches == other.branches
    }
}

fn check_chain(
    path_id: &PathId,
    from: SwitchId,
    to: SwitchId,
    segments: &[Segment],
) -> RepoResult<()> {
    let broken = |reason: String| RepositoryError::BrokenPathChain {
        path_id: path_id.to_string(),
        reason,
    };

    let Some(first) = segments.first() else {
        if from == to {
            return Ok(());
        }
        return Err(broken(format!("no segments between {from} and {to}")));
    };
    if first.src_switch != from {
        return Err(broken(format!(
            "starts at {} instead of {from}",
            first.src_switch
        )));
    }
    for pair in segments.windows(2) {
        if pair[0].dst_switch != pair[1].src_switch {
            return Err(broken(format!(
                "gap between {} and {}",
                pair[0].dst_switch, pair[1].src_switch
            )));
        }
    }
    if let Some(last) = segments.last()
        && last.dst_switch != to
    {
        return Err(broken(format!("ends at {} instead of {to}", last.dst_switch)));
    }
    Ok(())
}
