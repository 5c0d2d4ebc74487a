use std::pin::Pin;

use async_trait::async_trait;
use common::{FlowId, SagaKey};
use futures_core::Stream;

use crate::{HistoryEntry, HistoryQuery, Result};

/// A stream of history entries.
pub type HistoryStream = Pin<Box<dyn Stream<Item = Result<HistoryEntry>> + Send>>;

/// Append-only storage for the operation trail.
///
/// Entries are never updated or deleted. All implementations must be
/// thread-safe (Send + Sync).
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Appends entries atomically, preserving their order.
    async fn append(&self, entries: Vec<HistoryEntry>) -> Result<()>;

    /// Retrieves the entries matching a query in insertion order.
    async fn query(&self, query: HistoryQuery) -> Result<Vec<HistoryEntry>>;

    /// Streams every stored entry in insertion order.
    async fn stream_all(&self) -> Result<HistoryStream>;
}

/// Convenience methods for history stores.
#[async_trait]
pub trait HistoryStoreExt: HistoryStore {
    /// Appends a single entry.
    async fn append_entry(&self, entry: HistoryEntry) -> Result<()> {
        self.append(vec![entry]).await
    }

    /// Returns the full trail of one saga.
    async fn entries_for_saga(&self, saga_key: &SagaKey) -> Result<Vec<HistoryEntry>> {
        self.query(HistoryQuery::for_saga(saga_key.clone())).await
    }

    /// Returns every entry recorded about a flow, across sagas.
    async fn entries_for_flow(&self, flow_id: &FlowId) -> Result<Vec<HistoryEntry>> {
        self.query(HistoryQuery::for_flow(flow_id.clone())).await
    }
}

impl<T: HistoryStore + ?Sized> HistoryStoreExt for T {}
