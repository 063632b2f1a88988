//! State machine traits.
//!
//! Defines the interface the replicated log drives on every replica,
//! enabling pluggable application state.

use crate::Result;
use std::io::{Read, Write};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Result of applying one committed entry.
///
/// Carries no payload: proposal results are not a reliable read channel
/// across engine configurations. Observe post-write state with a follow-up
/// linearizable read instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome;

/// A deterministic state machine replicated by the log.
///
/// Implementations must produce identical state on every replica given the
/// same sequence of `apply` calls. Locking is the implementation's job:
/// `query` and `save_snapshot` take a shared lock, `apply` and
/// `restore_from_snapshot` an exclusive one.
pub trait StateMachine: Send + Sync {
    /// Answers a read query from the current state. Never mutates state.
    fn query(&self, query: &[u8]) -> Result<Vec<u8>>;

    /// Applies one committed log entry. Called once per entry, in commit
    /// order. A failed apply leaves state unchanged.
    fn apply(&self, entry: &[u8]) -> Result<ApplyOutcome>;

    /// Writes a point-in-time copy of the state into `sink`, polling `stop`
    /// so long snapshots can be abandoned.
    fn save_snapshot(&self, sink: &mut dyn Write, stop: &CancellationToken) -> Result<()>;

    /// Replaces the state wholesale with the snapshot read from `source`.
    fn restore_from_snapshot(&self, source: &mut dyn Read, stop: &CancellationToken)
        -> Result<()>;

    /// Releases resources. Idempotent.
    fn close(&self) -> Result<()>;
}

/// Builds the state machine of one replica from its `(cluster_id, node_id)`.
pub type StateMachineFactory = Arc<dyn Fn(u64, u64) -> Box<dyn StateMachine> + Send + Sync>;

// Implement StateMachine for Arc<T> where T: StateMachine
impl<T: StateMachine + ?Sized> StateMachine for Arc<T> {
    fn query(&self, query: &[u8]) -> Result<Vec<u8>> {
        (**self).query(query)
    }

    fn apply(&self, entry: &[u8]) -> Result<ApplyOutcome> {
        (**self).apply(entry)
    }

    fn save_snapshot(&self, sink: &mut dyn Write, stop: &CancellationToken) -> Result<()> {
        (**self).save_snapshot(sink, stop)
    }

    fn restore_from_snapshot(
        &self,
        source: &mut dyn Read,
        stop: &CancellationToken,
    ) -> Result<()> {
        (**self).restore_from_snapshot(source, stop)
    }

    fn close(&self) -> Result<()> {
        (**self).close()
    }
}
