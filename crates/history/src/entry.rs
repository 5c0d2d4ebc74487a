use chrono::{DateTime, Utc};
use common::{FlowId, SagaKey};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(Uuid);

impl EntryId {
    /// Creates a new random entry ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an entry ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Category of a history record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HistoryKind {
    /// A new operation was accepted for a flow.
    Event,
    /// A forward or compensating action was performed.
    Action,
    /// Something went wrong; the saga may still continue.
    Error,
}

impl HistoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryKind::Event => "event",
            HistoryKind::Action => "action",
            HistoryKind::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "event" => Some(HistoryKind::Event),
            "action" => Some(HistoryKind::Action),
            "error" => Some(HistoryKind::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for HistoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One record of the append-only operation trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: EntryId,
    /// Correlation key of the saga that produced the entry.
    pub saga_key: SagaKey,
    /// Flow the entry is about, when known.
    pub flow_id: Option<FlowId>,
    pub kind: HistoryKind,
    /// Short, stable description ("Flow was validated successfully").
    pub action: String,
    /// Free-form details.
    pub details: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    /// Creates a builder for a history entry.
    pub fn builder() -> HistoryEntryBuilder {
        HistoryEntryBuilder::default()
    }

    /// Shortcut for an action entry without details.
    pub fn action(saga_key: SagaKey, flow_id: Option<FlowId>, action: impl Into<String>) -> Self {
        Self {
            id: EntryId::new(),
            saga_key,
            flow_id,
            kind: HistoryKind::Action,
            action: action.into(),
            details: None,
            timestamp: Utc::now(),
        }
    }
}

/// Builder for [`HistoryEntry`].
#[derive(Debug, Default)]
pub struct HistoryEntryBuilder {
    id: Option<EntryId>,
    saga_key: Option<SagaKey>,
    flow_id: Option<FlowId>,
    kind: Option<HistoryKind>,
    action: Option<String>,
    details: Option<String>,
    timestamp: Option<DateTime<Utc>>,
}

impl HistoryEntryBuilder {
    pub fn id(mut self, id: EntryId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn saga_key(mut self, key: SagaKey) -> Self {
        self.saga_key = Some(key);
        self
    }

    pub fn flow_id(mut self, flow_id: FlowId) -> Self {
        self.flow_id = Some(flow_id);
        self
    }

    pub fn kind(mut self, kind: HistoryKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Sets the timestamp. If not set, the current time will be used.
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Builds the entry, returning None if the saga key or action is missing.
    pub fn try_build(self) -> Option<HistoryEntry> {
        Some(HistoryEntry {
            id: self.id.unwrap_or_default(),
            saga_key: self.saga_key?,
            flow_id: self.flow_id,
            kind: self.kind.unwrap_or(HistoryKind::Action),
            action: self.action?,
            details: self.details,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_kind_and_timestamp() {
        let entry = HistoryEntry::builder()
            .saga_key(SagaKey::new("k1"))
            .flow_id(FlowId::new("F1"))
            .action("Flow was validated successfully")
            .try_build()
            .unwrap();

        assert_eq!(entry.kind, HistoryKind::Action);
        assert_eq!(entry.flow_id, Some(FlowId::new("F1")));
        assert!(entry.details.is_none());
    }

    #[test]
    fn builder_requires_saga_key_and_action() {
        assert!(HistoryEntry::builder().action("x").try_build().is_none());
        assert!(
            HistoryEntry::builder()
                .saga_key(SagaKey::new("k"))
                .try_build()
                .is_none()
        );
    }

    #[test]
    fn kind_parses_its_string_form() {
        for kind in [HistoryKind::Event, HistoryKind::Action, HistoryKind::Error] {
            assert_eq!(HistoryKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(HistoryKind::parse("bogus"), None);
    }
}
