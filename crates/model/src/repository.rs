//! Persistence seam for flows, paths and y-flows.

use common::{FlowId, PathId, YFlowId};

use crate::{Flow, FlowPath, FlowStatus, PathStatus, RepoResult, RepositoryError, YFlow};

/// Operations available inside one storage transaction.
///
/// Reads observe the transaction's own writes. Nothing is visible to other
/// readers until the transaction commits.
pub trait FlowTransaction {
    fn flow(&self, flow_id: &FlowId) -> RepoResult<Option<Flow>>;
    fn path(&self, path_id: &PathId) -> RepoResult<Option<FlowPath>>;
    fn y_flow(&self, y_flow_id: &YFlowId) -> RepoResult<Option<YFlow>>;

    fn save_flow(&mut self, flow: Flow) -> RepoResult<()>;
    fn remove_flow(&mut self, flow_id: &FlowId) -> RepoResult<()>;

    /// Stores a path. Broken chains are rejected.
    fn save_path(&mut self, path: FlowPath) -> RepoResult<()>;
    fn remove_path(&mut self, path_id: &PathId) -> RepoResult<()>;

    fn save_y_flow(&mut self, y_flow: YFlow) -> RepoResult<()>;
    fn remove_y_flow(&mut self, y_flow_id: &YFlowId) -> RepoResult<()>;

    fn update_flow_status(
        &mut self,
        flow_id: &FlowId,
        status: FlowStatus,
        status_info: Option<String>,
    ) -> RepoResult<()> {
        let mut flow = self
            .flow(flow_id)?
            .ok_or_else(|| RepositoryError::flow_not_found(flow_id))?;
        flow.status = status;
        flow.status_info = status_info;
        self.save_flow(flow)
    }

    fn update_path_status(&mut self, path_id: &PathId, status: PathStatus) -> RepoResult<()> {
        let mut path = self
            .path(path_id)?
            .ok_or_else(|| RepositoryError::path_not_found(path_id))?;
        path.status = status;
        self.save_path(path)
    }
}

/// Read access plus explicit transactions.
///
/// The trait is object-safe; [`FlowRepositoryExt::in_transaction`] adds a
/// typed closure form on top of [`FlowRepository::transaction`].
pub trait FlowRepository: Send + Sync {
    fn find_flow(&self, flow_id: &FlowId) -> RepoResult<Option<Flow>>;
    fn find_path(&self, path_id: &PathId) -> RepoResult<Option<FlowPath>>;
    fn find_paths_by_flow(&self, flow_id: &FlowId) -> RepoResult<Vec<FlowPath>>;
    fn find_y_flow(&self, y_flow_id: &YFlowId) -> RepoResult<Option<YFlow>>;

    /// Runs `work` atomically. Any error leaves storage untouched.
    fn transaction(
        &self,
        work: &mut dyn FnMut(&mut dyn FlowTransaction) -> RepoResult<()>,
    ) -> RepoResult<()>;
}

/// Convenience methods for flow repositories.
pub trait FlowRepositoryExt: FlowRepository {
    /// Runs `work` in a transaction and returns its value.
    fn in_transaction<T, F>(&self, work: F) -> RepoResult<T>
    where
        F: FnOnce(&mut dyn FlowTransaction) -> RepoResult<T>,
    {
        let mut work = Some(work);
        let mut output = None;
        self.transaction(&mut |tx| {
            let work = work
                .take()
                .ok_or_else(|| RepositoryError::Transaction("work already consumed".into()))?;
            output = Some(work(tx)?);
            Ok(())
        })?;
        output.ok_or_else(|| RepositoryError::Transaction("work did not run".into()))
    }

    fn get_flow(&self, flow_id: &FlowId) -> RepoResult<Flow> {
        self.find_flow(flow_id)?
            .ok_or_else(|| RepositoryError::flow_not_found(flow_id))
    }

    fn get_path(&self, path_id: &PathId) -> RepoResult<FlowPath> {
        self.find_path(path_id)?
            .ok_or_else(|| RepositoryError::path_not_found(path_id))
    }

    fn get_y_flow(&self, y_flow_id: &YFlowId) -> RepoResult<YFlow> {
        self.find_y_flow(y_flow_id)?
            .ok_or_else(|| RepositoryError::y_flow_not_found(y_flow_id))
    }

    /// Derives a flow status from the persisted statuses of its paths.
    fn derive_flow_status(&self, flow: &Flow) -> RepoResult<FlowStatus> {
        let statuses = |ids: Vec<&PathId>| -> RepoResult<Vec<PathStatus>> {
            ids.into_iter()
                .map(|id| {
                    Ok(self
                        .find_path(id)?
                        .map(|p| p.status)
                        .unwrap_or(PathStatus::Inactive))
                })
                .collect()
        };
        let primary = statuses(flow.paths.primary())?;
        let protected = statuses(flow.paths.protected())?;
        Ok(FlowStatus::derive(&primary, &protected))
    }
}

impl<T: FlowRepository + ?Sized> FlowRepositoryExt for T {}
