//! Data model for flows and the persistence seam used by flow sagas.
//!
//! This crate provides:
//! - `Flow`, `FlowPath` and `YFlow` records with their statuses
//! - `FlowResources` leased for a path pair
//! - the transactional `FlowRepository` trait and an in-memory implementation

pub mod error;
pub mod flow;
pub mod memory;
pub mod path;
pub mod repository;
pub mod resources;
pub mod status;
pub mod y_flow;

pub use error::{RepoResult, RepositoryError};
pub use flow::{EncapsulationType, Flow, FlowEndpoint, FlowKind, FlowPathIds};
pub use memory::InMemoryFlowRepository;
pub use path::{FlowPath, PathBranch, PathDirection, Segment};
pub use repository::{FlowRepository, FlowRepositoryExt, FlowTransaction};
pub use resources::{FlowResources, PathResources};
pub use status::{FlowStatus, PathStatus};
pub use y_flow::{YFlow, YSubFlow};
