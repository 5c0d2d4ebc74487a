use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates an identifier from any string-like value.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Identifier of a unicast or multi-destination flow.
    FlowId
);

string_id!(
    /// Identifier of a multipoint (y-shaped) flow that groups several sub-flows.
    YFlowId
);

string_id!(
    /// Identifier of a single directed path owned by a flow.
    PathId
);

impl PathId {
    /// Generates a fresh path id for the given flow and direction tag.
    pub fn generate(flow_id: &FlowId, tag: &str) -> Self {
        Self(format!("{}_{}_{}", flow_id, tag, Uuid::new_v4().simple()))
    }
}

/// Separator between a parent correlation key and a child suffix.
pub const KEY_FORK_SEPARATOR: char = '/';

string_id!(
    /// Correlation key of a saga instance.
    ///
    /// Child sagas started on behalf of a parent get a forked key of the form
    /// `parent/child`, so every key can be routed by its root.
    SagaKey
);

impl SagaKey {
    /// Generates a random correlation key.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Derives a child key from this key.
    pub fn fork(&self, child: &str) -> Self {
        Self(format!("{}{}{}", self.0, KEY_FORK_SEPARATOR, child))
    }

    /// Returns the root key (the part before the first fork separator).
    pub fn root(&self) -> &str {
        self.0
            .split(KEY_FORK_SEPARATOR)
            .next()
            .unwrap_or(self.0.as_str())
    }

    /// Returns the parent key if this key was forked.
    pub fn parent(&self) -> Option<SagaKey> {
        self.0
            .rsplit_once(KEY_FORK_SEPARATOR)
            .map(|(parent, _)| SagaKey(parent.to_string()))
    }
}

/// Unique identifier of one asynchronous command sent to a switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(Uuid);

impl CommandId {
    /// Creates a new random command id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a command id from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for CommandId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CommandId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for CommandId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Datapath id of an OpenFlow switch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct SwitchId(u64);

impl SwitchId {
    pub fn new(dpid: u64) -> Self {
        Self(dpid)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SwitchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bytes = self.0.to_be_bytes();
        for (i, byte) in bytes.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident, $inner:ty) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name($inner);

        impl $name {
            pub fn new(value: $inner) -> Self {
                Self(value)
            }

            pub fn value(&self) -> $inner {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

numeric_id!(
    /// Flow cookie identifying every rule installed for one flow path pair.
    Cookie,
    u64
);

numeric_id!(
    /// OpenFlow meter id.
    MeterId,
    u32
);

numeric_id!(
    /// OpenFlow group id.
    GroupId,
    u32
);

numeric_id!(
    /// Transit encapsulation id (VLAN id or VXLAN VNI).
    EncapsulationId,
    u32
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_id_new_creates_unique_ids() {
        assert_ne!(CommandId::new(), CommandId::new());
    }

    #[test]
    fn command_id_parses_its_display_form() {
        let id = CommandId::new();
        let parsed: CommandId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn saga_key_fork_and_root() {
        let key = SagaKey::new("req-1");
        let child = key.fork("sub-a");
        assert_eq!(child.as_str(), "req-1/sub-a");
        assert_eq!(child.root(), "req-1");
        assert_eq!(child.parent(), Some(key.clone()));
        assert_eq!(key.root(), "req-1");
        assert_eq!(key.parent(), None);
    }

    #[test]
    fn switch_id_displays_as_dpid() {
        assert_eq!(SwitchId::new(1).to_string(), "00:00:00:00:00:00:00:01");
        assert_eq!(SwitchId::new(0xabcd).to_string(), "00:00:00:00:00:00:ab:cd");
    }

    #[test]
    fn path_id_generation_is_unique_per_call() {
        let flow = FlowId::new("F1");
        let a = PathId::generate(&flow, "forward");
        let b = PathId::generate(&flow, "forward");
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("F1_forward_"));
    }

    #[test]
    fn cookie_serializes_transparently() {
        let json = serde_json::to_string(&Cookie::new(100)).unwrap();
        assert_eq!(json, "100");
    }
}
