//! Error types for snapshot reading and writing.

use thiserror::Error;

/// Result type alias for snapshot operations.
pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Errors that can occur at the snapshot file boundary.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("snapshot rejected: {0}")]
    Invalid(String),
}
