//! Fire-and-forget recording of history entries.
//!
//! Saga actions run synchronously and must never block or fail on history
//! writes, so they talk to a [`HistoryRecorder`] rather than to a store.

use std::sync::{Arc, Mutex};

use common::SagaKey;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{HistoryEntry, HistoryStore};

/// Sink for history entries. Recording never fails from the caller's view.
pub trait HistoryRecorder: Send + Sync {
    fn record(&self, entry: HistoryEntry);
}

/// Discards every entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRecorder;

impl HistoryRecorder for NoopRecorder {
    fn record(&self, _entry: HistoryEntry) {}
}

/// Keeps entries in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRecorder {
    entries: Arc<Mutex<Vec<HistoryEntry>>>,
}

impl InMemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    /// Action texts recorded for one saga, in order.
    pub fn actions_for(&self, saga_key: &SagaKey) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| &e.saga_key == saga_key)
            .map(|e| e.action)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HistoryRecorder for InMemoryRecorder {
    fn record(&self, entry: HistoryEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }
}

/// Forwards entries over a channel to a background writer task.
#[derive(Debug, Clone)]
pub struct ChannelRecorder {
    tx: mpsc::UnboundedSender<HistoryEntry>,
}

impl HistoryRecorder for ChannelRecorder {
    fn record(&self, entry: HistoryEntry) {
        if self.tx.send(entry).is_err() {
            tracing::warn!("history writer is gone, dropping entry");
            metrics::counter!("history_write_failures_total").increment(1);
        }
    }
}

/// Spawns a task draining recorded entries into `store`.
///
/// The task ends once every [`ChannelRecorder`] clone is dropped. Store
/// failures are logged and counted, never propagated.
pub fn spawn_writer(store: Arc<dyn HistoryStore>) -> (ChannelRecorder, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<HistoryEntry>();

    let handle = tokio::spawn(async move {
        while let Some(first) = rx.recv().await {
            let mut batch = vec![first];
            while let Ok(next) = rx.try_recv() {
                batch.push(next);
            }
            let size = batch.len();
            if let Err(e) = store.append(batch).await {
                tracing::warn!(error = %e, entries = size, "failed to persist history entries");
                metrics::counter!("history_write_failures_total").increment(size as u64);
            }
        }
        tracing::debug!("history writer stopped");
    });

    (ChannelRecorder { tx }, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{HistoryStoreExt, InMemoryHistoryStore};

    #[test]
    fn in_memory_recorder_groups_by_saga() {
        let recorder = InMemoryRecorder::new();
        recorder.record(HistoryEntry::action(SagaKey::new("a"), None, "one"));
        recorder.record(HistoryEntry::action(SagaKey::new("b"), None, "other"));
        recorder.record(HistoryEntry::action(SagaKey::new("a"), None, "two"));

        assert_eq!(recorder.actions_for(&SagaKey::new("a")), vec!["one", "two"]);
        assert_eq!(recorder.len(), 3);
    }

    #[tokio::test]
    async fn channel_recorder_persists_through_writer() {
        let store = InMemoryHistoryStore::new();
        let (recorder, handle) = spawn_writer(Arc::new(store.clone()));

        recorder.record(HistoryEntry::action(SagaKey::new("k"), None, "first"));
        recorder.record(HistoryEntry::action(SagaKey::new("k"), None, "second"));
        drop(recorder);
        handle.await.unwrap();

        let trail = store.entries_for_saga(&SagaKey::new("k")).await.unwrap();
        assert_eq!(trail.len(), 2);
        assert_eq!(trail[1].action, "second");
    }

    #[tokio::test]
    async fn recording_after_writer_stops_does_not_panic() {
        let store = InMemoryHistoryStore::new();
        let (recorder, handle) = spawn_writer(Arc::new(store));
        handle.abort();
        let _ = handle.await;

        recorder.record(HistoryEntry::action(SagaKey::new("k"), None, "late"));
    }
}
