//! In-memory repository with all-or-nothing transactions.

use std::{
    collections::HashMap,
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use common::{FlowId, PathId, YFlowId};

use crate::{
    Flow, FlowPath, FlowRepository, FlowTransaction, RepoResult, RepositoryError, YFlow,
};

#[derive(Debug, Clone, Default)]
struct Tables {
    flows: HashMap<FlowId, Flow>,
    paths: HashMap<PathId, FlowPath>,
    y_flows: HashMap<YFlowId, YFlow>,
}

/// Working copy of the tables; committed by swapping it in under the write lock.
struct InMemoryTransaction {
    tables: Tables,
}

impl FlowTransaction for InMemoryTransaction {
    fn flow(&self, flow_id: &FlowId) -> RepoResult<Option<Flow>> {
        Ok(self.tables.flows.get(flow_id).cloned())
    }

    fn path(&self, path_id: &PathId) -> RepoResult<Option<FlowPath>> {
        Ok(self.tables.paths.get(path_id).cloned())
    }

    fn y_flow(&self, y_flow_id: &YFlowId) -> RepoResult<Option<YFlow>> {
        Ok(self.tables.y_flows.get(y_flow_id).cloned())
    }

    fn save_flow(&mut self, flow: Flow) -> RepoResult<()> {
        self.tables.flows.insert(flow.flow_id.clone(), flow);
        Ok(())
    }

    fn remove_flow(&mut self, flow_id: &FlowId) -> RepoResult<()> {
        self.tables.flows.remove(flow_id);
        Ok(())
    }

    fn save_path(&mut self, path: FlowPath) -> RepoResult<()> {
        path.validate()?;
        self.tables.paths.insert(path.path_id.clone(), path);
        Ok(())
    }

    fn remove_path(&mut self, path_id: &PathId) -> RepoResult<()> {
        self.tables.paths.remove(path_id);
        Ok(())
    }

    fn save_y_flow(&mut self, y_flow: YFlow) -> RepoResult<()> {
        self.tables.y_flows.insert(y_flow.y_flow_id.clone(), y_flow);
        Ok(())
    }

    fn remove_y_flow(&mut self, y_flow_id: &YFlowId) -> RepoResult<()> {
        self.tables.y_flows.remove(y_flow_id);
        Ok(())
    }
}

/// In-memory [`FlowRepository`].
///
/// A transaction holds the write lock for its whole duration and works on a
/// copy of the tables, so readers see either the state before or after it.
#[derive(Clone, Default)]
pub struct InMemoryFlowRepository {
    tables: Arc<RwLock<Tables>>,
    fail_on_transaction: Arc<AtomicBool>,
    failures_remaining: Arc<AtomicUsize>,
    commits: Arc<AtomicUsize>,
}

impl InMemoryFlowRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every transaction fail until reset.
    pub fn set_fail_on_transaction(&self, fail: bool) {
        self.fail_on_transaction.store(fail, Ordering::SeqCst);
    }

    /// Makes the next `count` transactions fail.
    pub fn fail_next_transactions(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Number of committed transactions.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn flow_count(&self) -> usize {
        self.read().flows.len()
    }

    pub fn path_count(&self) -> usize {
        self.read().paths.len()
    }

    /// Inserts records directly, bypassing fault injection.
    pub fn seed(&self, flows: Vec<Flow>, paths: Vec<FlowPath>) {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        for flow in flows {
            tables.flows.insert(flow.flow_id.clone(), flow);
        }
        for path in paths {
            tables.paths.insert(path.path_id.clone(), path);
        }
    }

    pub fn seed_y_flow(&self, y_flow: YFlow) {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        tables.y_flows.insert(y_flow.y_flow_id.clone(), y_flow);
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn injected_failure(&self) -> bool {
        if self.fail_on_transaction.load(Ordering::SeqCst) {
            return true;
        }
        self.failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl FlowRepository for InMemoryFlowRepository {
    fn find_flow(&self, flow_id: &FlowId) -> RepoResult<Option<Flow>> {
        Ok(self.read().flows.get(flow_id).cloned())
    }

    fn find_path(&self, path_id: &PathId) -> RepoResult<Option<FlowPath>> {
        Ok(self.read().paths.get(path_id).cloned())
    }

    fn find_paths_by_flow(&self, flow_id: &FlowId) -> RepoResult<Vec<FlowPath>> {
        let mut paths: Vec<_> = self
            .read()
            .paths
            .values()
            .filter(|p| &p.flow_id == flow_id)
            .cloned()
            .collect();
        paths.sort_by(|a, b| a.path_id.cmp(&b.path_id));
        Ok(paths)
    }

    fn find_y_flow(&self, y_flow_id: &YFlowId) -> RepoResult<Option<YFlow>> {
        Ok(self.read().y_flows.get(y_flow_id).cloned())
    }

    fn transaction(
        &self,
        work: &mut dyn FnMut(&mut dyn FlowTransaction) -> RepoResult<()>,
    ) -> RepoResult<()> {
        if self.injected_failure() {
            tracing::debug!("injected transaction failure");
            return Err(RepositoryError::Unavailable(
                "simulated storage failure".into(),
            ));
        }

        let mut guard = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let mut tx = InMemoryTransaction {
            tables: guard.clone(),
        };
        work(&mut tx)?;
        *guard = tx.tables;
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
