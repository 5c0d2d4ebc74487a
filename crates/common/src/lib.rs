//! Identifier types shared by the flow control-plane crates.

pub mod types;

pub use types::{
    CommandId, Cookie, EncapsulationId, FlowId, GroupId, KEY_FORK_SEPARATOR, MeterId, PathId,
    SagaKey, SwitchId, YFlowId,
};
