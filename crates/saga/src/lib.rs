//! Flow lifecycle sagas for an SDN controller.
//!
//! This crate turns one flow create, update, reroute, delete or path swap
//! request into an ordered sequence of path computation, resource
//! allocation, rule installation on switches and persistence, with full
//! compensating rollback when any step fails.
//!
//! Every operation is a table-driven state machine ([`fsm`]). Speaker
//! commands are correlated with their responses by compound key
//! ([`correlator`]), and [`FlowHub`] hosts the running sagas and routes
//! external events to them.
//!
//! The unicast and multi-destination tables live in [`flow`]; multipoint
//! (y-shaped) flows run a parent saga in [`multipoint`] that fans out one
//! child saga per sub-flow.

pub mod config;
pub mod correlator;
pub mod error;
pub mod event;
pub mod flow;
pub mod fsm;
pub mod hub;
pub mod instance;
pub mod messages;
pub mod multipoint;
pub mod services;
pub(crate) mod wiring;

pub use config::SagaConfig;
pub use correlator::CommandKey;
pub use error::{EngineError, ErrorKind, HubError, SagaError};
pub use event::{ChildOutcome, FlowEvent, Operation, SagaInput, SagaOutcome};
pub use flow::{FlowOperationRequest, FlowRequest, RerouteRequest};
pub use hub::{FlowHub, SagaSummary};
pub use instance::{CleanupEntry, CleanupItem};
pub use messages::{NorthboundResponse, SpeakerOutcome, SpeakerRequest, SpeakerResponse};
pub use multipoint::{SubFlowRequest, YFlowOperationRequest, YFlowRequest};
pub use services::{
    FlowCarrier, FlowEventListener, FlowRuleManager, FlowServices, InMemoryPathComputer,
    InMemoryResourceManager, PathComputer, RecordingCarrier, RecordingListener, ResourceManager,
    RuleManager,
};
