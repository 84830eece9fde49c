//! Engine error types.

use thiserror::Error;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while reconciling a round.
///
/// `Validation` means the round's input was rejected: the round is skipped
/// and prior state is untouched. `Invariant` means the engine's own
/// bookkeeping broke; it can never be caused by input and aborts the
/// round loudly.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid round input: {0}")]
    Validation(String),

    #[error("capacity ledger invariant violated: {0}")]
    Invariant(String),

    #[error("reconciler has no hosts loaded")]
    NotInitialized,
}
