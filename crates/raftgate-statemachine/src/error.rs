//! State machine error types.

use thiserror::Error;

/// Errors that can occur inside a replica's state machine.
#[derive(Debug, Error)]
pub enum StateMachineError {
    /// The read query could not be parsed.
    #[error("invalid query syntax: {0}")]
    InvalidQuerySyntax(String),

    /// The committed log entry could not be parsed.
    #[error("invalid entry syntax: {0}")]
    InvalidEntrySyntax(String),

    /// Reading or writing snapshot bytes failed.
    #[error("snapshot I/O failure: {0}")]
    SnapshotIo(#[from] std::io::Error),

    /// The snapshot stream is not a valid snapshot.
    #[error("corrupt snapshot: {0}")]
    SnapshotCorrupt(String),

    /// The stop signal fired before the snapshot completed.
    #[error("snapshot stopped before completion")]
    SnapshotStopped,

    /// The state machine has been closed.
    #[error("state machine is closed")]
    Closed,
}

impl StateMachineError {
    /// Returns true for failures caused by malformed caller input.
    pub fn is_syntax(&self) -> bool {
        matches!(
            self,
            Self::InvalidQuerySyntax(_) | Self::InvalidEntrySyntax(_)
        )
    }

    /// Returns true for failures of a snapshot attempt.
    pub fn is_snapshot_failure(&self) -> bool {
        matches!(
            self,
            Self::SnapshotIo(_) | Self::SnapshotCorrupt(_) | Self::SnapshotStopped
        )
    }
}
