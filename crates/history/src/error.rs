use thiserror::Error;

/// Errors that can occur when reading or writing the operation history.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored row could not be decoded.
    #[error("Corrupted history row: {0}")]
    Corrupted(String),

    /// The background writer is gone.
    #[error("History writer is closed")]
    Closed,
}

/// Result type for history operations.
pub type Result<T> = std::result::Result<T, HistoryError>;
