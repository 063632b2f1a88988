//! Consensus error types.

use raftgate_statemachine::StateMachineError;
use thiserror::Error;

/// Errors that can occur during replicated log operations.
#[derive(Debug, Error)]
pub enum ConsensusError {
    /// The deadline passed before the engine answered.
    #[error("timeout waiting for the replicated log")]
    Timeout,

    /// The engine cannot serve the call right now (no quorum, not leader).
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    /// The engine has been stopped.
    #[error("engine stopped")]
    Stopped,

    /// The call addressed a cluster this engine does not host.
    #[error("unknown cluster: {0}")]
    UnknownCluster(u64),

    /// The session is not registered with the engine.
    #[error("unknown session: owner {0}")]
    UnknownSession(u64),

    /// Invalid peer set or membership change.
    #[error("invalid membership: {0}")]
    InvalidMembership(String),

    /// Invalid engine configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The state machine rejected the call.
    #[error(transparent)]
    StateMachine(#[from] StateMachineError),

    /// Persisted snapshot could not be read or written.
    #[error("snapshot storage error: {0}")]
    SnapshotStore(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A background task failed.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ConsensusError {
    /// Returns true when the engine refused or could not serve the call.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::Stopped | Self::UnknownCluster(_)
        )
    }
}

/// A specialized Result type for consensus operations.
pub type Result<T> = std::result::Result<T, ConsensusError>;
