//! Replicated log interface.
//!
//! This module defines what the request gateway consumes from a consensus
//! engine. Any engine that replicates an ordered log of opaque entries and
//! drives a [`StateMachine`](raftgate_statemachine::StateMachine) per replica
//! can sit behind [`ReplicatedLog`].

use crate::error::{ConsensusError, Result};
use crate::session::Session;
use async_trait::async_trait;
use raftgate_statemachine::ApplyOutcome;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Instant;

/// Initial cluster members: node ID to raft address.
pub type Peers = BTreeMap<u64, String>;

/// Client-side view of a replicated log.
///
/// Every call carries an explicit deadline; an engine that misses it fails
/// the call with [`ConsensusError::Timeout`]. A proposal that timed out may
/// still commit later.
#[async_trait]
pub trait ReplicatedLog: Send + Sync {
    /// Linearizable read: reflects every entry committed before the read
    /// was accepted.
    async fn sync_read(&self, cluster_id: u64, query: &[u8], deadline: Instant) -> Result<Vec<u8>>;

    /// Proposes `entry` and waits until it is committed and applied.
    async fn sync_propose(
        &self,
        session: &Session,
        entry: &[u8],
        deadline: Instant,
    ) -> Result<ApplyOutcome>;

    /// Returns the shared no-op session of a cluster.
    fn noop_session(&self, cluster_id: u64) -> Session;

    /// Registers a deduplicating session.
    async fn register_session(&self, cluster_id: u64, deadline: Instant) -> Result<Session>;

    /// Releases a session. Releasing the no-op session is a no-op.
    async fn close_session(&self, session: &Session, deadline: Instant) -> Result<()>;
}

#[async_trait]
impl<T: ReplicatedLog + ?Sized> ReplicatedLog for Arc<T> {
    async fn sync_read(&self, cluster_id: u64, query: &[u8], deadline: Instant) -> Result<Vec<u8>> {
        (**self).sync_read(cluster_id, query, deadline).await
    }

    async fn sync_propose(
        &self,
        session: &Session,
        entry: &[u8],
        deadline: Instant,
    ) -> Result<ApplyOutcome> {
        (**self).sync_propose(session, entry, deadline).await
    }

    fn noop_session(&self, cluster_id: u64) -> Session {
        (**self).noop_session(cluster_id)
    }

    async fn register_session(&self, cluster_id: u64, deadline: Instant) -> Result<Session> {
        (**self).register_session(cluster_id, deadline).await
    }

    async fn close_session(&self, session: &Session, deadline: Instant) -> Result<()> {
        (**self).close_session(session, deadline).await
    }
}

/// Configuration for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Cluster this node belongs to.
    pub cluster_id: u64,

    /// This node's ID, must be non-zero.
    pub node_id: u64,

    /// This node's raft address.
    pub raft_address: String,

    /// Directory holding this node's snapshot. `None` keeps snapshots in
    /// memory only.
    pub node_dir: Option<PathBuf>,

    /// Take a snapshot every this many applied entries. Zero disables
    /// automatic snapshots.
    pub snapshot_entries: u64,

    /// Entries kept in the log behind the latest snapshot.
    pub compaction_overhead: u64,

    /// Capacity of the request queue.
    pub mailbox_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cluster_id: 1,
            node_id: 1,
            raft_address: "127.0.0.1:9000".to_string(),
            node_dir: None,
            snapshot_entries: 10,
            compaction_overhead: 5,
            mailbox_size: 1024,
        }
    }
}

impl EngineConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.node_id == 0 {
            return Err(ConsensusError::InvalidConfig("node_id must be non-zero".into()));
        }
        if self.raft_address.is_empty() {
            return Err(ConsensusError::InvalidConfig("raft_address is empty".into()));
        }
        if self.mailbox_size == 0 {
            return Err(ConsensusError::InvalidConfig(
                "mailbox_size must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// State of one replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaStatus {
    /// Node ID.
    pub node_id: u64,
    /// Raft address.
    pub address: String,
    /// Whether the replica takes part in commits.
    pub available: bool,
    /// Index of the last entry applied to its state machine.
    pub applied_index: u64,
}

/// Snapshot of engine state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStatus {
    /// Cluster ID.
    pub cluster_id: u64,
    /// Local node ID.
    pub node_id: u64,
    /// First index still held in the log.
    pub first_index: u64,
    /// Last committed index.
    pub last_index: u64,
    /// Index covered by the latest snapshot.
    pub snapshot_index: u64,
    /// Number of registered deduplicating sessions.
    pub sessions: usize,
    /// All replicas, local first.
    pub replicas: Vec<ReplicaStatus>,
}
