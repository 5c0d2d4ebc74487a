use chrono::{DateTime, Utc};
use common::{FlowId, SagaKey};

use crate::{HistoryEntry, HistoryKind};

/// Builder for constructing history queries.
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    /// Filter by saga correlation key.
    pub saga_key: Option<SagaKey>,

    /// Filter by flow id.
    pub flow_id: Option<FlowId>,

    /// Filter by entry kinds (any of these).
    pub kinds: Option<Vec<HistoryKind>>,

    /// Entries at or after this timestamp.
    pub from_timestamp: Option<DateTime<Utc>>,

    /// Entries at or before this timestamp.
    pub to_timestamp: Option<DateTime<Utc>>,

    /// Maximum number of entries to return.
    pub limit: Option<usize>,

    /// Number of entries to skip.
    pub offset: Option<usize>,
}

impl HistoryQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query for one saga.
    pub fn for_saga(saga_key: SagaKey) -> Self {
        Self {
            saga_key: Some(saga_key),
            ..Default::default()
        }
    }

    /// Creates a query for one flow.
    pub fn for_flow(flow_id: FlowId) -> Self {
        Self {
            flow_id: Some(flow_id),
            ..Default::default()
        }
    }

    pub fn kind(mut self, kind: HistoryKind) -> Self {
        self.kinds = Some(vec![kind]);
        self
    }

    pub fn kinds(mut self, kinds: Vec<HistoryKind>) -> Self {
        self.kinds = Some(kinds);
        self
    }

    pub fn from_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.from_timestamp = Some(timestamp);
        self
    }

    pub fn to_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.to_timestamp = Some(timestamp);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Returns true if the entry passes every filter except limit/offset.
    pub fn matches(&self, entry: &HistoryEntry) -> bool {
        if let Some(ref key) = self.saga_key
            && &entry.saga_key != key
        {
            return false;
        }
        if let Some(ref flow_id) = self.flow_id
            && entry.flow_id.as_ref() != Some(flow_id)
        {
            return false;
        }
        if let Some(ref kinds) = self.kinds
            && !kinds.contains(&entry.kind)
        {
            return false;
        }
        if let Some(from) = self.from_timestamp
            && entry.timestamp < from
        {
            return false;
        }
        if let Some(to) = self.to_timestamp
            && entry.timestamp > to
        {
            return false;
        }
        true
    }
}
