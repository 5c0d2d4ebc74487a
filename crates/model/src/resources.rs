//! Resources leased for a path pair.

use common::{Cookie, EncapsulationId, FlowId, GroupId, MeterId, PathId};
use serde::{Deserialize, Serialize};

use crate::EncapsulationType;

/// Resources bound to one directed path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathResources {
    pub path_id: PathId,
    pub meter_id: Option<MeterId>,
    /// Group used at the split switch of a multi-destination path.
    pub group_id: Option<GroupId>,
}

/// One lease from the resource manager: a cookie and encapsulation id shared
/// by a forward/reverse path pair, plus per-direction meters and groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowResources {
    pub flow_id: FlowId,
    pub cookie: Cookie,
    pub encapsulation_type: EncapsulationType,
    pub encapsulation_id: EncapsulationId,
    pub forward: PathResources,
    pub reverse: Option<PathResources>,
}

impl FlowResources {
    pub fn path_ids(&self) -> Vec<&PathId> {
        std::iter::once(&self.forward.path_id)
            .chain(self.reverse.iter().map(|r| &r.path_id))
            .collect()
    }

    /// Resources of the given path, if it belongs to this lease.
    pub fn for_path(&self, path_id: &PathId) -> Option<&PathResources> {
        if &self.forward.path_id == path_id {
            return Some(&self.forward);
        }
        self.reverse.as_ref().filter(|r| &r.path_id == path_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_path() {
        let resources = FlowResources {
            flow_id: FlowId::new("f"),
            cookie: Cookie::new(100),
            encapsulation_type: EncapsulationType::TransitVlan,
            encapsulation_id: EncapsulationId::new(2),
            forward: PathResources {
                path_id: PathId::new("fw"),
                meter_id: Some(MeterId::new(32)),
                group_id: None,
            },
            reverse: Some(PathResources {
                path_id: PathId::new("rv"),
                meter_id: Some(MeterId::new(33)),
                group_id: None,
            }),
        };

        assert_eq!(resources.path_ids().len(), 2);
        assert_eq!(
            resources.for_path(&PathId::new("rv")).and_then(|r| r.meter_id),
            Some(MeterId::new(33))
        );
        assert!(resources.for_path(&PathId::new("other")).is_none());
    }
}
