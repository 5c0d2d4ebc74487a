//! Repository error types.

use thiserror::Error;

/// Errors raised by the persistence layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// The referenced record does not exist.
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    /// A path's segments do not form a contiguous chain.
    #[error("Path '{path_id}' is broken: {reason}")]
    BrokenPathChain { path_id: String, reason: String },

    /// The transaction was aborted; nothing was committed.
    #[error("Transaction aborted: {0}")]
    Transaction(String),

    /// The storage backend is unavailable.
    #[error("Repository unavailable: {0}")]
    Unavailable(String),
}

impl RepositoryError {
    pub fn flow_not_found(id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity: "Flow",
            id: id.to_string(),
        }
    }

    pub fn path_not_found(id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity: "Path",
            id: id.to_string(),
        }
    }

    pub fn y_flow_not_found(id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity: "Y-flow",
            id: id.to_string(),
        }
    }
}

/// Result type for repository operations.
pub type RepoResult<T> = std::result::Result<T, RepositoryError>;
