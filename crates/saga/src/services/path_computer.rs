//! Path computation over a known topology.

use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    sync::{Arc, PoisonError, RwLock},
};

use common::{FlowId, SwitchId};
use model::{PathBranch, Segment};

use crate::error::SagaError;

/// Undirected identity of an inter-switch link.
pub type LinkKey = (SwitchId, u32, SwitchId, u32);

/// Constraints for one path computation.
#[derive(Debug, Clone)]
pub struct PathRequest {
    pub flow_id: FlowId,
    pub source: SwitchId,
    /// One entry for unicast flows, several for multi-destination flows.
    pub destinations: Vec<SwitchId>,
    pub bandwidth: u64,
    pub ignore_bandwidth: bool,
    /// Links the path must not use (diversity from another path).
    pub avoid_links: HashSet<LinkKey>,
}

impl PathRequest {
    pub fn new(flow_id: FlowId, source: SwitchId, destinations: Vec<SwitchId>, bandwidth: u64) -> Self {
        Self {
            flow_id,
            source,
            destinations,
            bandwidth,
            ignore_bandwidth: false,
            avoid_links: HashSet::new(),
        }
    }
}

/// A computed route in the forward direction.
///
/// For multi-destination requests `dst_switch` is the split switch and each
/// destination is reached through its own branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputedPath {
    pub src_switch: SwitchId,
    pub dst_switch: SwitchId,
    pub segments: Vec<Segment>,
    pub branches: Vec<PathBranch>,
}

impl ComputedPath {
    /// The same route walked from destination to source. Only meaningful for
    /// unbranched paths.
    pub fn reversed(&self) -> Self {
        Self {
            src_switch: self.dst_switch,
            dst_switch: self.src_switch,
            segments: self.segments.iter().rev().map(Segment::reversed).collect(),
            branches: Vec::new(),
        }
    }

    pub fn links(&self) -> HashSet<LinkKey> {
        self.segments
            .iter()
            .chain(self.branches.iter().flat_map(|b| b.segments.iter()))
            .map(Segment::link_key)
            .collect()
    }
}

/// Finds paths through the network.
pub trait PathComputer: Send + Sync {
    /// Returns the best path or [`SagaError::NoPathFound`].
    fn find_path(&self, request: &PathRequest) -> Result<ComputedPath, SagaError>;
}

#[derive(Debug, Clone)]
struct Link {
    segment: Segment,
    available_bandwidth: u64,
}

#[derive(Debug, Default)]
struct TopologyState {
    links: Vec<Link>,
    conflicts_remaining: usize,
    computations: usize,
}

/// Breadth-first path computer over an in-memory topology.
///
/// Every link is bidirectional. Bandwidth is checked against the static
/// capacity of each link and is never consumed.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPathComputer {
    state: Arc<RwLock<TopologyState>>,
}

impl InMemoryPathComputer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a bidirectional link between two switch ports.
    pub fn add_link(&self, src: SwitchId, src_port: u32, dst: SwitchId, dst_port: u32, bandwidth: u64) {
        let segment = Segment::new(src, src_port, dst, dst_port);
        let mut state = self.write();
        state.links.push(Link {
            segment,
            available_bandwidth: bandwidth,
        });
        state.links.push(Link {
            segment: segment.reversed(),
            available_bandwidth: bandwidth,
        });
    }

    /// Removes both directions of a link.
    pub fn remove_link(&self, src: SwitchId, src_port: u32, dst: SwitchId, dst_port: u32) {
        let key = Segment::new(src, src_port, dst, dst_port).link_key();
        self.write().links.retain(|l| l.segment.link_key() != key);
    }

    /// Makes the next `count` computations report a transient conflict.
    pub fn fail_next_computations(&self, count: usize) {
        self.write().conflicts_remaining = count;
    }

    /// Number of `find_path` calls served.
    pub fn computation_count(&self) -> usize {
        self.read().computations
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, TopologyState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, TopologyState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PathComputer for InMemoryPathComputer {
    #[tracing::instrument(skip(self, request), fields(flow_id = %request.flow_id))]
    fn find_path(&self, request: &PathRequest) -> Result<ComputedPath, SagaError> {
        let mut state = self.write();
        state.computations += 1;
        if state.conflicts_remaining > 0 {
            state.conflicts_remaining -= 1;
            return Err(SagaError::PathConflict(format!(
                "links for flow {} changed during computation",
                request.flow_id
            )));
        }

        let Some(first_destination) = request.destinations.first() else {
            return Err(SagaError::NoPathFound(format!(
                "flow {} has no destination",
                request.flow_id
            )));
        };

        let tree = shortest_path_tree(&state.links, request);
        let mut routes = Vec::with_capacity(request.destinations.len());
        for destination in &request.destinations {
            let route = tree.route_to(request.source, *destination).ok_or_else(|| {
                SagaError::NoPathFound(format!(
                    "Not enough bandwidth or no path found between {} and {} for {} kbps",
                    request.source, destination, request.bandwidth
                ))
            })?;
            routes.push((*destination, route));
        }

        if routes.len() == 1 {
            let (_, segments) = routes.remove(0);
            return Ok(ComputedPath {
                src_switch: request.source,
                dst_switch: *first_destination,
                segments,
                branches: Vec::new(),
            });
        }

        Ok(split_routes(request.source, routes))
    }
}

struct SpanningTree {
    parents: HashMap<SwitchId, Segment>,
}

impl SpanningTree {
    fn route_to(&self, source: SwitchId, destination: SwitchId) -> Option<Vec<Segment>> {
        let mut segments = Vec::new();
        let mut current = destination;
        while current != source {
            let segment = self.parents.get(&current)?;
            segments.push(*segment);
            current = segment.src_switch;
        }
        segments.reverse();
        Some(segments)
    }
}

fn shortest_path_tree(links: &[Link], request: &PathRequest) -> SpanningTree {
    let mut adjacency: BTreeMap<SwitchId, Vec<Segment>> = BTreeMap::new();
    for link in links {
        let fits = request.ignore_bandwidth || link.available_bandwidth >= request.bandwidth;
        if fits && !request.avoid_links.contains(&link.segment.link_key()) {
            adjacency
                .entry(link.segment.src_switch)
                .or_default()
                .push(link.segment);
        }
    }
    for segments in adjacency.values_mut() {
        segments.sort_by_key(|s| (s.dst_switch, s.src_port));
    }

    let mut parents = HashMap::new();
    let mut seen = HashSet::from([request.source]);
    let mut queue = VecDeque::from([request.source]);
    while let Some(switch) = queue.pop_front() {
        for segment in adjacency.get(&switch).into_iter().flatten() {
            if seen.insert(segment.dst_switch) {
                parents.insert(segment.dst_switch, *segment);
                queue.push_back(segment.dst_switch);
            }
        }
    }
    SpanningTree { parents }
}

/// Splits tree routes into a shared trunk and one branch per destination.
fn split_routes(source: SwitchId, routes: Vec<(SwitchId, Vec<Segment>)>) -> ComputedPath {
    let shortest = routes.iter().map(|(_, r)| r.len()).min().unwrap_or(0);
    let mut trunk_len = 0;
    while trunk_len < shortest {
        let segment = routes[0].1[trunk_len];
        if routes.iter().all(|(_, r)| r[trunk_len] == segment) {
            trunk_len += 1;
        } else {
            break;
        }
    }

    let trunk: Vec<Segment> = routes[0].1[..trunk_len].to_vec();
    let split = trunk.last().map_or(source, |s| s.dst_switch);
    let branches = routes
        .into_iter()
        .map(|(destination, route)| PathBranch {
            destination,
            segments: route[trunk_len..].to_vec(),
        })
        .collect();

    ComputedPath {
        src_switch: source,
        dst_switch: split,
        segments: trunk,
        branches,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sw(id: u64) -> SwitchId {
        SwitchId::new(id)
    }

    /// 1 - 2 - 3 with a slower detour 1 - 4 - 3.
    fn square() -> InMemoryPathComputer {
        let computer = InMemoryPathComputer::new();
        computer.add_link(sw(1), 1, sw(2), 1, 10_000);
        computer.add_link(sw(2), 2, sw(3), 1, 10_000);
        computer.add_link(sw(1), 2, sw(4), 1, 1_000);
        computer.add_link(sw(4), 2, sw(3), 2, 1_000);
        computer
    }

    #[test]
    fn finds_shortest_path() {
        let path = square()
            .find_path(&PathRequest::new(FlowId::new("f"), sw(1), vec![sw(3)], 500))
            .unwrap();
        assert_eq!(path.segments.len(), 2);
        assert_eq!(path.segments[0].dst_switch, sw(2));
        assert_eq!(path.reversed().segments[0], Segment::new(sw(3), 1, sw(2), 2));
    }

    #[test]
    fn avoided_links_force_diverse_route() {
        let computer = square();
        let request = PathRequest::new(FlowId::new("f"), sw(1), vec![sw(3)], 500);
        let primary = computer.find_path(&request).unwrap();

        let protected = computer
            .find_path(&PathRequest {
                avoid_links: primary.links(),
                ..request
            })
            .unwrap();
        assert!(protected.links().is_disjoint(&primary.links()));
        assert_eq!(protected.segments[0].dst_switch, sw(4));
    }

    #[test]
    fn bandwidth_filters_links() {
        let computer = square();
        let mut request = PathRequest::new(FlowId::new("f"), sw(1), vec![sw(3)], 50_000);
        assert!(matches!(
            computer.find_path(&request),
            Err(SagaError::NoPathFound(_))
        ));

        request.ignore_bandwidth = true;
        assert!(computer.find_path(&request).is_ok());
    }

    #[test]
    fn same_switch_has_no_segments() {
        let path = square()
            .find_path(&PathRequest::new(FlowId::new("f"), sw(2), vec![sw(2)], 0))
            .unwrap();
        assert!(path.segments.is_empty());
    }

    #[test]
    fn multiple_destinations_split_at_common_switch() {
        let computer = InMemoryPathComputer::new();
        computer.add_link(sw(1), 1, sw(2), 1, 10_000);
        computer.add_link(sw(2), 2, sw(3), 1, 10_000);
        computer.add_link(sw(2), 3, sw(4), 1, 10_000);

        let path = computer
            .find_path(&PathRequest::new(
                FlowId::new("md"),
                sw(1),
                vec![sw(3), sw(4)],
                100,
            ))
            .unwrap();
        assert_eq!(path.dst_switch, sw(2));
        assert_eq!(path.segments.len(), 1);
        assert_eq!(path.branches.len(), 2);
        assert_eq!(path.branches[1].segments[0].dst_switch, sw(4));
    }

    #[test]
    fn injected_conflicts_are_retryable() {
        let computer = square();
        computer.fail_next_computations(1);
        let request = PathRequest::new(FlowId::new("f"), sw(1), vec![sw(3)], 1);

        let err = computer.find_path(&request).unwrap_err();
        assert!(err.is_retryable());
        assert!(computer.find_path(&request).is_ok());
        assert_eq!(computer.computation_count(), 2);
    }
}
