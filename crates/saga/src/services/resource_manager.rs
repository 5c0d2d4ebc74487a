//! Leasing of cookies, meters, encapsulation ids and group ids.

use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, PoisonError, RwLock},
};

use common::{Cookie, EncapsulationId, FlowId, GroupId, MeterId, PathId, SwitchId, YFlowId};
use model::{EncapsulationType, FlowResources, PathResources};

use crate::error::SagaError;

/// What a flow path pair needs from the resource pools.
#[derive(Debug, Clone)]
pub struct ResourceRequest {
    pub flow_id: FlowId,
    pub forward_path_id: PathId,
    /// `None` for flows without a reverse direction.
    pub reverse_path_id: Option<PathId>,
    pub encapsulation: EncapsulationType,
    /// Meters are leased only for metered flows.
    pub metered: bool,
    /// Multi-destination flows replicate through a group at the split switch.
    pub needs_group: bool,
}

/// Transit encapsulation leased for a path pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncapsulationResources {
    pub encapsulation_type: EncapsulationType,
    pub encapsulation_id: EncapsulationId,
}

/// Shared resources of a multipoint flow at its split point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YPointResources {
    pub y_flow_id: YFlowId,
    pub switch_id: SwitchId,
    pub meter_id: MeterId,
    pub group_id: GroupId,
}

/// Allocates and releases path resources.
///
/// Deallocation is idempotent: releasing a lease that no longer exists
/// succeeds without effect.
pub trait ResourceManager: Send + Sync {
    fn allocate(&self, request: &ResourceRequest) -> Result<FlowResources, SagaError>;

    fn deallocate(&self, resources: &FlowResources) -> Result<(), SagaError>;

    fn get_encapsulation_resources(
        &self,
        forward_path_id: &PathId,
        reverse_path_id: Option<&PathId>,
        encapsulation: EncapsulationType,
    ) -> Result<EncapsulationResources, SagaError>;

    fn allocate_y_point(
        &self,
        y_flow_id: &YFlowId,
        switch_id: SwitchId,
    ) -> Result<YPointResources, SagaError>;

    fn deallocate_y_point(&self, resources: &YPointResources) -> Result<(), SagaError>;
}

const COOKIE_BASE: u64 = 100;
const METER_BASE: u64 = 32;
const VLAN_BASE: u64 = 2;
const VLAN_MAX: u64 = 4094;
const VNI_BASE: u64 = 4096;
const VNI_MAX: u64 = 16_777_214;
const GROUP_BASE: u64 = 1;
const ID_MAX: u64 = u32::MAX as u64;

#[derive(Debug, Default)]
struct Pool {
    used: BTreeSet<u64>,
}

impl Pool {
    /// Takes the lowest free id in `[base, max]`.
    fn take(&mut self, base: u64, max: u64) -> Option<u64> {
        let mut candidate = base;
        for used in self.used.range(base..=max) {
            if *used != candidate {
                break;
            }
            candidate += 1;
        }
        (candidate <= max && self.used.insert(candidate)).then_some(candidate)
    }

    fn release(&mut self, id: u64) {
        self.used.remove(&id);
    }
}

#[derive(Debug, Default)]
struct ResourceState {
    cookies: Pool,
    meters: Pool,
    vlans: Pool,
    vnis: Pool,
    groups: Pool,
    leases: HashMap<Cookie, FlowResources>,
    y_points: HashMap<YFlowId, YPointResources>,
    allocations: usize,
    deallocations: usize,
    double_frees: usize,
    fail_on_allocate: bool,
    conflicts_remaining: usize,
    fail_on_deallocate: bool,
}

impl ResourceState {
    fn lease(&mut self, request: &ResourceRequest) -> Result<FlowResources, SagaError> {
        let exhausted = |what: &str| SagaError::ResourceAllocation(format!("no free {what} left"));

        let cookie = self
            .cookies
            .take(COOKIE_BASE, u64::MAX >> 1)
            .ok_or_else(|| exhausted("cookie"))?;
        let encapsulation_id = match request.encapsulation {
            EncapsulationType::TransitVlan => self.vlans.take(VLAN_BASE, VLAN_MAX),
            EncapsulationType::Vxlan => self.vnis.take(VNI_BASE, VNI_MAX),
        }
        .ok_or_else(|| exhausted("encapsulation id"))?;

        let mut path = |path_id: &PathId, group: bool| -> Result<PathResources, SagaError> {
            let meter_id = if request.metered {
                let id = self
                    .meters
                    .take(METER_BASE, ID_MAX)
                    .ok_or_else(|| exhausted("meter"))?;
                Some(MeterId::new(id as u32))
            } else {
                None
            };
            let group_id = if group {
                let id = self
                    .groups
                    .take(GROUP_BASE, ID_MAX)
                    .ok_or_else(|| exhausted("group"))?;
                Some(GroupId::new(id as u32))
            } else {
                None
            };
            Ok(PathResources {
                path_id: path_id.clone(),
                meter_id,
                group_id,
            })
        };

        let forward = path(&request.forward_path_id, request.needs_group)?;
        let reverse = request
            .reverse_path_id
            .as_ref()
            .map(|id| path(id, false))
            .transpose()?;

        Ok(FlowResources {
            flow_id: request.flow_id.clone(),
            cookie: Cookie::new(cookie),
            encapsulation_type: request.encapsulation,
            encapsulation_id: EncapsulationId::new(encapsulation_id as u32),
            forward,
            reverse,
        })
    }

    /// Returns every id of `resources` to its pool.
    fn release(&mut self, resources: &FlowResources) {
        self.cookies.release(resources.cookie.value());
        let encapsulation = u64::from(resources.encapsulation_id.value());
        match resources.encapsulation_type {
            EncapsulationType::TransitVlan => self.vlans.release(encapsulation),
            EncapsulationType::Vxlan => self.vnis.release(encapsulation),
        }
        let paths = std::iter::once(&resources.forward).chain(resources.reverse.iter());
        for path in paths {
            if let Some(meter) = path.meter_id {
                self.meters.release(u64::from(meter.value()));
            }
            if let Some(group) = path.group_id {
                self.groups.release(u64::from(group.value()));
            }
        }
    }

    fn reserve(&mut self, resources: &FlowResources) {
        self.cookies.used.insert(resources.cookie.value());
        let encapsulation = u64::from(resources.encapsulation_id.value());
        match resources.encapsulation_type {
            EncapsulationType::TransitVlan => self.vlans.used.insert(encapsulation),
            EncapsulationType::Vxlan => self.vnis.used.insert(encapsulation),
        };
        let paths = std::iter::once(&resources.forward).chain(resources.reverse.iter());
        for path in paths {
            if let Some(meter) = path.meter_id {
                self.meters.used.insert(u64::from(meter.value()));
            }
            if let Some(group) = path.group_id {
                self.groups.used.insert(u64::from(group.value()));
            }
        }
    }
}

/// Resource manager keeping its pools in memory.
///
/// Every id space hands out the lowest free value, so tests can predict
/// cookies (starting at 100), meters (32), VLANs (2) and groups (1).
#[derive(Debug, Clone, Default)]
pub struct InMemoryResourceManager {
    state: Arc<RwLock<ResourceState>>,
}

impl InMemoryResourceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a lease made before this manager existed.
    pub fn seed_lease(&self, resources: FlowResources) {
        let mut state = self.write();
        state.reserve(&resources);
        state.leases.insert(resources.cookie, resources);
    }

    /// Makes every allocation fail until reset.
    pub fn set_fail_on_allocate(&self, fail: bool) {
        self.write().fail_on_allocate = fail;
    }

    /// Makes the next `count` allocations report a transient conflict.
    pub fn fail_next_allocations(&self, count: usize) {
        self.write().conflicts_remaining = count;
    }

    /// Makes every deallocation fail until reset.
    pub fn set_fail_on_deallocate(&self, fail: bool) {
        self.write().fail_on_deallocate = fail;
    }

    /// Number of live flow leases.
    pub fn lease_count(&self) -> usize {
        self.read().leases.len()
    }

    pub fn is_leased(&self, cookie: Cookie) -> bool {
        self.read().leases.contains_key(&cookie)
    }

    pub fn leased_cookies(&self) -> Vec<Cookie> {
        let mut cookies: Vec<Cookie> = self.read().leases.keys().copied().collect();
        cookies.sort();
        cookies
    }

    pub fn y_point_count(&self) -> usize {
        self.read().y_points.len()
    }

    pub fn allocation_count(&self) -> usize {
        self.read().allocations
    }

    pub fn deallocation_count(&self) -> usize {
        self.read().deallocations
    }

    /// Deallocations of leases that were already released.
    pub fn double_free_count(&self) -> usize {
        self.read().double_frees
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ResourceState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ResourceState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ResourceManager for InMemoryResourceManager {
    fn allocate(&self, request: &ResourceRequest) -> Result<FlowResources, SagaError> {
        let mut state = self.write();
        if state.fail_on_allocate {
            return Err(SagaError::ResourceAllocation(format!(
                "resource pools unavailable for flow {}",
                request.flow_id
            )));
        }
        if state.conflicts_remaining > 0 {
            state.conflicts_remaining -= 1;
            return Err(SagaError::ResourceConflict(format!(
                "cookie of flow {} taken concurrently",
                request.flow_id
            )));
        }

        let resources = state.lease(request)?;
        state.allocations += 1;
        state.leases.insert(resources.cookie, resources.clone());
        tracing::debug!(flow_id = %request.flow_id, cookie = %resources.cookie, "resources leased");
        Ok(resources)
    }

    fn deallocate(&self, resources: &FlowResources) -> Result<(), SagaError> {
        let mut state = self.write();
        if state.fail_on_deallocate {
            return Err(SagaError::ResourceDeallocation(format!(
                "cookie {} of flow {}",
                resources.cookie, resources.flow_id
            )));
        }

        match state.leases.remove(&resources.cookie) {
            Some(lease) => {
                state.release(&lease);
                state.deallocations += 1;
                tracing::debug!(flow_id = %resources.flow_id, cookie = %resources.cookie, "resources released");
            }
            None => {
                state.double_frees += 1;
                tracing::debug!(cookie = %resources.cookie, "lease already released");
            }
        }
        Ok(())
    }

    fn get_encapsulation_resources(
        &self,
        forward_path_id: &PathId,
        reverse_path_id: Option<&PathId>,
        encapsulation: EncapsulationType,
    ) -> Result<EncapsulationResources, SagaError> {
        let state = self.read();
        state
            .leases
            .values()
            .find(|lease| {
                lease.forward.path_id == *forward_path_id
                    && lease.reverse.as_ref().map(|r| &r.path_id) == reverse_path_id
                    && lease.encapsulation_type == encapsulation
            })
            .map(|lease| EncapsulationResources {
                encapsulation_type: lease.encapsulation_type,
                encapsulation_id: lease.encapsulation_id,
            })
            .ok_or_else(|| {
                SagaError::ResourceAllocation(format!(
                    "no encapsulation leased for path {forward_path_id}"
                ))
            })
    }

    fn allocate_y_point(
        &self,
        y_flow_id: &YFlowId,
        switch_id: SwitchId,
    ) -> Result<YPointResources, SagaError> {
        let mut state = self.write();
        if state.fail_on_allocate {
            return Err(SagaError::ResourceAllocation(format!(
                "resource pools unavailable for y-flow {y_flow_id}"
            )));
        }
        if let Some(existing) = state.y_points.get(y_flow_id) {
            return Ok(existing.clone());
        }

        let meter = state
            .meters
            .take(METER_BASE, ID_MAX)
            .ok_or_else(|| SagaError::ResourceAllocation("no free meter left".into()))?;
        let group = match state.groups.take(GROUP_BASE, ID_MAX) {
            Some(group) => group,
            None => {
                state.meters.release(meter);
                return Err(SagaError::ResourceAllocation("no free group left".into()));
            }
        };

        let resources = YPointResources {
            y_flow_id: y_flow_id.clone(),
            switch_id,
            meter_id: MeterId::new(meter as u32),
            group_id: GroupId::new(group as u32),
        };
        state.y_points.insert(y_flow_id.clone(), resources.clone());
        state.allocations += 1;
        Ok(resources)
    }

    fn deallocate_y_point(&self, resources: &YPointResources) -> Result<(), SagaError> {
        let mut state = self.write();
        if state.fail_on_deallocate {
            return Err(SagaError::ResourceDeallocation(format!(
                "y-point of {}",
                resources.y_flow_id
            )));
        }
        match state.y_points.remove(&resources.y_flow_id) {
            Some(lease) => {
                state.meters.release(u64::from(lease.meter_id.value()));
                state.groups.release(u64::from(lease.group_id.value()));
                state.deallocations += 1;
            }
            None => state.double_frees += 1,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(flow: &str) -> ResourceRequest {
        ResourceRequest {
            flow_id: FlowId::new(flow),
            forward_path_id: PathId::new(format!("{flow}_fw")),
            reverse_path_id: Some(PathId::new(format!("{flow}_rv"))),
            encapsulation: EncapsulationType::TransitVlan,
            metered: true,
            needs_group: false,
        }
    }

    #[test]
    fn allocates_lowest_free_ids() {
        let manager = InMemoryResourceManager::new();
        let first = manager.allocate(&request("a")).unwrap();
        let second = manager.allocate(&request("b")).unwrap();

        assert_eq!(first.cookie, Cookie::new(100));
        assert_eq!(first.encapsulation_id, EncapsulationId::new(2));
        assert_eq!(first.forward.meter_id, Some(MeterId::new(32)));
        assert_eq!(first.reverse.as_ref().unwrap().meter_id, Some(MeterId::new(33)));
        assert_eq!(second.cookie, Cookie::new(101));

        manager.deallocate(&first).unwrap();
        let third = manager.allocate(&request("c")).unwrap();
        assert_eq!(third.cookie, Cookie::new(100));
    }

    #[test]
    fn deallocation_is_idempotent() {
        let manager = InMemoryResourceManager::new();
        let lease = manager.allocate(&request("a")).unwrap();

        manager.deallocate(&lease).unwrap();
        manager.deallocate(&lease).unwrap();

        assert_eq!(manager.lease_count(), 0);
        assert_eq!(manager.deallocation_count(), 1);
        assert_eq!(manager.double_free_count(), 1);
    }

    #[test]
    fn seeded_leases_are_not_reused() {
        let manager = InMemoryResourceManager::new();
        let mut seeded = request("old");
        seeded.metered = false;
        let lease = InMemoryResourceManager::new().allocate(&seeded).unwrap();
        manager.seed_lease(lease);

        let fresh = manager.allocate(&request("new")).unwrap();
        assert_eq!(fresh.cookie, Cookie::new(101));
        assert_eq!(fresh.encapsulation_id, EncapsulationId::new(3));
        assert!(manager.is_leased(Cookie::new(100)));
    }

    #[test]
    fn group_only_on_forward_path() {
        let manager = InMemoryResourceManager::new();
        let mut md = request("md");
        md.reverse_path_id = None;
        md.needs_group = true;

        let lease = manager.allocate(&md).unwrap();
        assert_eq!(lease.forward.group_id, Some(GroupId::new(1)));
        assert!(lease.reverse.is_none());
    }

    #[test]
    fn encapsulation_lookup_by_path_pair() {
        let manager = InMemoryResourceManager::new();
        let lease = manager.allocate(&request("a")).unwrap();

        let found = manager
            .get_encapsulation_resources(
                &PathId::new("a_fw"),
                Some(&PathId::new("a_rv")),
                EncapsulationType::TransitVlan,
            )
            .unwrap();
        assert_eq!(found.encapsulation_id, lease.encapsulation_id);
        assert!(
            manager
                .get_encapsulation_resources(&PathId::new("a_fw"), None, EncapsulationType::TransitVlan)
                .is_err()
        );
    }

    #[test]
    fn fault_toggles() {
        let manager = InMemoryResourceManager::new();
        manager.fail_next_allocations(1);
        assert!(manager.allocate(&request("a")).unwrap_err().is_retryable());

        manager.set_fail_on_allocate(true);
        assert!(!manager.allocate(&request("a")).unwrap_err().is_retryable());
        manager.set_fail_on_allocate(false);

        let lease = manager.allocate(&request("a")).unwrap();
        manager.set_fail_on_deallocate(true);
        assert!(manager.deallocate(&lease).is_err());
        assert!(manager.is_leased(lease.cookie));
    }

    #[test]
    fn y_point_lease_is_shared_per_y_flow() {
        let manager = InMemoryResourceManager::new();
        let y = YFlowId::new("y1");
        let first = manager.allocate_y_point(&y, SwitchId::new(1)).unwrap();
        let again = manager.allocate_y_point(&y, SwitchId::new(1)).unwrap();
        assert_eq!(first, again);
        assert_eq!(manager.y_point_count(), 1);

        manager.deallocate_y_point(&first).unwrap();
        manager.deallocate_y_point(&first).unwrap();
        assert_eq!(manager.y_point_count(), 0);
        assert_eq!(manager.double_free_count(), 1);
    }
}
