use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{HistoryEntry, HistoryQuery, HistoryStore, HistoryStream, Result};

/// In-memory history store.
///
/// Provides the same interface as the PostgreSQL implementation.
#[derive(Clone, Default)]
pub struct InMemoryHistoryStore {
    entries: Arc<RwLock<Vec<HistoryEntry>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of entries stored.
    pub async fn entry_count(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Clears all entries.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn append(&self, entries: Vec<HistoryEntry>) -> Result<()> {
        self.entries.write().await.extend(entries);
        Ok(())
    }

    async fn query(&self, query: HistoryQuery) -> Result<Vec<HistoryEntry>> {
        let store = self.entries.read().await;
        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(usize::MAX);

        Ok(store
            .iter()
            .filter(|e| query.matches(e))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn stream_all(&self) -> Result<HistoryStream> {
        use futures_util::stream;

        let entries = self.entries.read().await.clone();
        Ok(Box::pin(stream::iter(entries.into_iter().map(Ok))))
    }
}
