//! In-process replicated log engine.
//!
//! [`LocalEngine`] hosts every replica of a cluster inside one process. A
//! single driver task owns the log and handles requests in arrival order,
//! which gives reads their linearizable position: a read is answered after
//! every proposal queued before it has been applied.
//!
//! ```text
//!  sync_propose ─┐                      ┌─▶ local replica  (apply first)
//!  sync_read ────┼─▶ mpsc ─▶ driver ────┼─▶ peer replica   (apply in order)
//!  sessions ─────┘          │   │       └─▶ peer replica   (down: catch up later)
//!                           │   └─▶ log (compacted behind snapshots)
//!                           └─▶ snapshot.ndjson
//! ```
//!
//! Entries are committed only while a majority of replicas is available.
//! The local replica applies each entry before it is appended, so an entry
//! the state machine rejects never enters the log.
//!
//! The log itself lives in memory. A clean [`LocalEngine::stop`] writes a
//! final snapshot covering every applied entry, but a crash loses whatever
//! was applied after the last snapshot.

use crate::engine::{EngineConfig, EngineStatus, Peers, ReplicaStatus, ReplicatedLog};
use crate::error::{ConsensusError, Result};
use crate::log::Log;
use crate::session::{Dedup, Session, SessionTable};
use crate::store::SnapshotStore;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use raftgate_statemachine::{ApplyOutcome, StateMachine, StateMachineFactory};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

type Reply<T> = oneshot::Sender<Result<T>>;

enum Request {
    Propose {
        session: Session,
        entry: Bytes,
        reply: Reply<ApplyOutcome>,
    },
    Read {
        cluster_id: u64,
        query: Bytes,
        reply: Reply<Vec<u8>>,
    },
    StaleRead {
        node_id: u64,
        query: Bytes,
        reply: Reply<Vec<u8>>,
    },
    RegisterSession {
        cluster_id: u64,
        reply: Reply<Session>,
    },
    CloseSession {
        session: Session,
        reply: Reply<()>,
    },
    SetAvailable {
        node_id: u64,
        available: bool,
        reply: Reply<()>,
    },
    Snapshot {
        reply: Reply<u64>,
    },
    Status {
        reply: Reply<EngineStatus>,
    },
}

impl Request {
    fn fail(self, error: ConsensusError) {
        match self {
            Request::Propose { reply, .. } => drop(reply.send(Err(error))),
            Request::Read { reply, .. } | Request::StaleRead { reply, .. } => {
                drop(reply.send(Err(error)))
            }
            Request::RegisterSession { reply, .. } => drop(reply.send(Err(error))),
            Request::CloseSession { reply, .. } | Request::SetAvailable { reply, .. } => {
                drop(reply.send(Err(error)))
            }
            Request::Snapshot { reply } => drop(reply.send(Err(error))),
            Request::Status { reply } => drop(reply.send(Err(error))),
        }
    }
}

struct Envelope {
    deadline: Instant,
    request: Request,
}

/// A replicated log whose replicas all live in this process.
pub struct LocalEngine {
    cluster_id: u64,
    node_id: u64,
    requests: mpsc::Sender<Envelope>,
    stop: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl LocalEngine {
    /// Starts the cluster and its driver task.
    ///
    /// Without `join`, one replica is created per entry of `peers` (which
    /// must include this node); an empty map starts a single-node cluster.
    /// With `join`, `peers` must be empty and only the local replica is
    /// created. If the node directory holds a snapshot, every replica is
    /// restored from it.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_cluster(
        config: EngineConfig,
        peers: Peers,
        join: bool,
        factory: StateMachineFactory,
    ) -> Result<Self> {
        config.validate()?;
        let members = resolve_members(&config, peers, join)?;

        let store = config
            .node_dir
            .as_ref()
            .map(SnapshotStore::open)
            .transpose()?;

        let stop = CancellationToken::new();
        let mut driver = Driver::new(&config, members, &factory, store, stop.clone());
        driver.recover()?;

        info!(
            cluster_id = config.cluster_id,
            node_id = config.node_id,
            raft_address = %config.raft_address,
            replicas = driver.peers.len() + 1,
            join,
            applied_index = driver.local.applied,
            "started cluster"
        );

        let (requests, receiver) = mpsc::channel(config.mailbox_size);
        let handle = tokio::spawn(driver.run(receiver));

        Ok(Self {
            cluster_id: config.cluster_id,
            node_id: config.node_id,
            requests,
            stop,
            driver: Mutex::new(Some(handle)),
        })
    }

    /// Cluster hosted by this engine.
    pub fn cluster_id(&self) -> u64 {
        self.cluster_id
    }

    /// Local node ID.
    pub fn node_id(&self) -> u64 {
        self.node_id
    }

    /// Marks an in-process peer replica as down or back up. A replica
    /// coming back catches up from the log, or from a snapshot of the local
    /// replica when the entries it missed were compacted.
    pub async fn set_replica_available(
        &self,
        node_id: u64,
        available: bool,
        deadline: Instant,
    ) -> Result<()> {
        self.call(deadline, |reply| Request::SetAvailable {
            node_id,
            available,
            reply,
        })
        .await
    }

    /// Takes a snapshot now and returns the index it covers.
    pub async fn request_snapshot(&self, deadline: Instant) -> Result<u64> {
        self.call(deadline, |reply| Request::Snapshot { reply }).await
    }

    /// Returns the engine status.
    pub async fn status(&self, deadline: Instant) -> Result<EngineStatus> {
        self.call(deadline, |reply| Request::Status { reply }).await
    }

    /// Queries one replica directly, without quorum.
    pub async fn stale_read(&self, node_id: u64, query: &[u8], deadline: Instant) -> Result<Vec<u8>> {
        let query = Bytes::copy_from_slice(query);
        self.call(deadline, |reply| Request::StaleRead {
            node_id,
            query,
            reply,
        })
        .await
    }

    /// Stops the driver, interrupting any snapshot in progress, snapshots
    /// the entries applied since the last one and closes every state
    /// machine. Idempotent.
    pub async fn stop(&self) {
        self.stop.cancel();
        let handle = self.driver.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "engine driver task failed");
            }
            info!(
                cluster_id = self.cluster_id,
                node_id = self.node_id,
                "stopped cluster"
            );
        }
    }

    async fn call<T>(
        &self,
        deadline: Instant,
        request: impl FnOnce(Reply<T>) -> Request,
    ) -> Result<T> {
        if self.stop.is_cancelled() {
            return Err(ConsensusError::Stopped);
        }

        let (reply, response) = oneshot::channel();
        let envelope = Envelope {
            deadline,
            request: request(reply),
        };

        match timeout_at(deadline, self.requests.send(envelope)).await {
            Err(_) => return Err(ConsensusError::Timeout),
            Ok(Err(_)) => return Err(ConsensusError::Stopped),
            Ok(Ok(())) => {}
        }

        match timeout_at(deadline, response).await {
            Err(_) => Err(ConsensusError::Timeout),
            Ok(Err(_)) => Err(ConsensusError::Stopped),
            Ok(Ok(result)) => result,
        }
    }
}

#[async_trait]
impl ReplicatedLog for LocalEngine {
    async fn sync_read(&self, cluster_id: u64, query: &[u8], deadline: Instant) -> Result<Vec<u8>> {
        let query = Bytes::copy_from_slice(query);
        self.call(deadline, |reply| Request::Read {
            cluster_id,
            query,
            reply,
        })
        .await
    }

    async fn sync_propose(
        &self,
        session: &Session,
        entry: &[u8],
        deadline: Instant,
    ) -> Result<ApplyOutcome> {
        let session = session.clone();
        let entry = Bytes::copy_from_slice(entry);
        self.call(deadline, |reply| Request::Propose {
            session,
            entry,
            reply,
        })
        .await
    }

    fn noop_session(&self, cluster_id: u64) -> Session {
        Session::noop(cluster_id)
    }

    async fn register_session(&self, cluster_id: u64, deadline: Instant) -> Result<Session> {
        self.call(deadline, |reply| Request::RegisterSession { cluster_id, reply })
            .await
    }

    async fn close_session(&self, session: &Session, deadline: Instant) -> Result<()> {
        if session.is_noop() {
            return Ok(());
        }
        let session = session.clone();
        self.call(deadline, |reply| Request::CloseSession { session, reply })
            .await
    }
}

fn resolve_members(config: &EngineConfig, peers: Peers, join: bool) -> Result<Peers> {
    if join {
        if !peers.is_empty() {
            return Err(ConsensusError::InvalidMembership(
                "a joining node must not list initial members".into(),
            ));
        }
        return Ok(Peers::from([(config.node_id, config.raft_address.clone())]));
    }

    if peers.is_empty() {
        return Ok(Peers::from([(config.node_id, config.raft_address.clone())]));
    }

    if !peers.contains_key(&config.node_id) {
        return Err(ConsensusError::InvalidMembership(format!(
            "node {} is not in the initial member list",
            config.node_id
        )));
    }
    Ok(peers)
}

struct Replica {
    node_id: u64,
    address: String,
    state_machine: Arc<dyn StateMachine>,
    applied: u64,
    available: bool,
}

impl Replica {
    fn status(&self) -> ReplicaStatus {
        ReplicaStatus {
            node_id: self.node_id,
            address: self.address.clone(),
            available: self.available,
            applied_index: self.applied,
        }
    }
}

struct Driver {
    cluster_id: u64,
    snapshot_entries: u64,
    compaction_overhead: u64,
    local: Replica,
    peers: BTreeMap<u64, Replica>,
    log: Log,
    sessions: SessionTable,
    snapshot_index: u64,
    store: Option<SnapshotStore>,
    stop: CancellationToken,
}

impl Driver {
    fn new(
        config: &EngineConfig,
        members: Peers,
        factory: &StateMachineFactory,
        store: Option<SnapshotStore>,
        stop: CancellationToken,
    ) -> Self {
        let mut local = None;
        let mut peers = BTreeMap::new();
        for (node_id, address) in members {
            let replica = Replica {
                node_id,
                address,
                state_machine: Arc::from(factory(config.cluster_id, node_id)),
                applied: 0,
                available: true,
            };
            if node_id == config.node_id {
                local = Some(replica);
            } else {
                peers.insert(node_id, replica);
            }
        }

        // resolve_members guarantees the local node is a member
        let local = local.unwrap_or_else(|| Replica {
            node_id: config.node_id,
            address: config.raft_address.clone(),
            state_machine: Arc::from(factory(config.cluster_id, config.node_id)),
            applied: 0,
            available: true,
        });

        Self {
            cluster_id: config.cluster_id,
            snapshot_entries: config.snapshot_entries,
            compaction_overhead: config.compaction_overhead,
            local,
            peers,
            log: Log::new(0),
            sessions: SessionTable::default(),
            snapshot_index: 0,
            store,
            stop,
        }
    }

    fn replicas(&self) -> impl Iterator<Item = &Replica> {
        std::iter::once(&self.local).chain(self.peers.values())
    }

    /// Restores every replica from the persisted snapshot, if any.
    fn recover(&mut self) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let Some((index, data)) = store.load()? else {
            return Ok(());
        };

        for replica in std::iter::once(&mut self.local).chain(self.peers.values_mut()) {
            replica
                .state_machine
                .restore_from_snapshot(&mut &data[..], &self.stop)?;
            replica.applied = index;
        }
        self.snapshot_index = index;
        self.log = Log::new(index);

        info!(
            index,
            path = %store.path().display(),
            "recovered from snapshot"
        );
        Ok(())
    }

    async fn run(mut self, mut requests: mpsc::Receiver<Envelope>) {
        loop {
            tokio::select! {
                biased;

                _ = self.stop.cancelled() => break,

                envelope = requests.recv() => match envelope {
                    Some(envelope) => self.handle(envelope).await,
                    None => break,
                },
            }
        }

        self.flush_snapshot().await;
        self.shutdown();
    }

    async fn handle(&mut self, envelope: Envelope) {
        let Envelope { deadline, request } = envelope;
        if Instant::now() >= deadline {
            request.fail(ConsensusError::Timeout);
            return;
        }

        match request {
            Request::Propose {
                session,
                entry,
                reply,
            } => {
                let result = self.propose(&session, entry).await;
                let _ = reply.send(result);
            }
            Request::Read {
                cluster_id,
                query,
                reply,
            } => {
                if reply.is_closed() {
                    return;
                }
                let _ = reply.send(self.read(cluster_id, &query));
            }
            Request::StaleRead {
                node_id,
                query,
                reply,
            } => {
                let _ = reply.send(self.stale_read(node_id, &query));
            }
            Request::RegisterSession { cluster_id, reply } => {
                let _ = reply.send(self.register_session(cluster_id));
            }
            Request::CloseSession { session, reply } => {
                let _ = reply.send(self.close_session(&session));
            }
            Request::SetAvailable {
                node_id,
                available,
                reply,
            } => {
                let _ = reply.send(self.set_available(node_id, available));
            }
            Request::Snapshot { reply } => {
                let _ = reply.send(self.take_snapshot().await);
            }
            Request::Status { reply } => {
                let _ = reply.send(Ok(self.status()));
            }
        }
    }

    fn check_cluster(&self, cluster_id: u64) -> Result<()> {
        if cluster_id != self.cluster_id {
            return Err(ConsensusError::UnknownCluster(cluster_id));
        }
        Ok(())
    }

    fn check_quorum(&self) -> Result<()> {
        let total = self.peers.len() + 1;
        let available = self.replicas().filter(|r| r.available).count();
        if available * 2 <= total {
            return Err(ConsensusError::Unavailable(format!(
                "no quorum: {} of {} replicas available",
                available, total
            )));
        }
        Ok(())
    }

    async fn propose(&mut self, session: &Session, entry: Bytes) -> Result<ApplyOutcome> {
        self.check_cluster(session.cluster_id())?;

        if !session.is_noop() {
            match self.sessions.check(session.owner_id(), session.sequence()) {
                Dedup::Unknown => {
                    return Err(ConsensusError::UnknownSession(session.owner_id()));
                }
                Dedup::Duplicate => {
                    debug!(
                        owner_id = session.owner_id(),
                        sequence = session.sequence(),
                        "duplicate proposal, already applied"
                    );
                    return Ok(ApplyOutcome);
                }
                Dedup::Fresh => {}
            }
        }

        self.check_quorum()?;

        let outcome = self.local.state_machine.apply(&entry)?;
        let index = self
            .log
            .append(session.owner_id(), session.sequence(), entry.clone());
        self.local.applied = index;

        for replica in self.peers.values_mut().filter(|r| r.available) {
            match replica.state_machine.apply(&entry) {
                Ok(_) => replica.applied = index,
                Err(e) => {
                    warn!(
                        node_id = replica.node_id,
                        index,
                        error = %e,
                        "replica diverged, taking it out of the cluster"
                    );
                    replica.available = false;
                }
            }
        }

        if !session.is_noop() {
            self.sessions.record(session.owner_id(), session.sequence());
        }

        trace!(index, owner_id = session.owner_id(), "committed entry");

        if self.snapshot_entries > 0 && index - self.snapshot_index >= self.snapshot_entries {
            if let Err(e) = self.take_snapshot().await {
                warn!(index, error = %e, "snapshot failed, log not compacted");
            }
        }

        Ok(outcome)
    }

    fn read(&self, cluster_id: u64, query: &[u8]) -> Result<Vec<u8>> {
        self.check_cluster(cluster_id)?;
        self.check_quorum()?;
        Ok(self.local.state_machine.query(query)?)
    }

    fn stale_read(&self, node_id: u64, query: &[u8]) -> Result<Vec<u8>> {
        let replica = self
            .replicas()
            .find(|r| r.node_id == node_id)
            .ok_or_else(|| {
                ConsensusError::InvalidMembership(format!("node {} is not a member", node_id))
            })?;
        Ok(replica.state_machine.query(query)?)
    }

    fn register_session(&mut self, cluster_id: u64) -> Result<Session> {
        self.check_cluster(cluster_id)?;
        self.check_quorum()?;
        let owner_id = self.sessions.register();
        debug!(owner_id, "registered session");
        Ok(Session::tracked(cluster_id, owner_id))
    }

    fn close_session(&mut self, session: &Session) -> Result<()> {
        self.check_cluster(session.cluster_id())?;
        if !self.sessions.close(session.owner_id()) {
            return Err(ConsensusError::UnknownSession(session.owner_id()));
        }
        debug!(owner_id = session.owner_id(), "closed session");
        Ok(())
    }

    fn set_available(&mut self, node_id: u64, available: bool) -> Result<()> {
        if node_id == self.local.node_id {
            return Err(ConsensusError::InvalidMembership(
                "the local replica cannot be taken down".into(),
            ));
        }

        let Self {
            peers,
            local,
            log,
            stop,
            ..
        } = self;
        let replica = peers.get_mut(&node_id).ok_or_else(|| {
            ConsensusError::InvalidMembership(format!("node {} is not a member", node_id))
        })?;

        if !available {
            if replica.available {
                replica.available = false;
                info!(node_id, applied_index = replica.applied, "replica down");
            }
            return Ok(());
        }
        if replica.available {
            return Ok(());
        }

        match log.entries_from(replica.applied + 1) {
            Some(records) => {
                let mut replayed = 0usize;
                for record in records {
                    trace!(
                        node_id,
                        index = record.index,
                        owner_id = record.owner_id,
                        sequence = record.sequence,
                        "replaying entry"
                    );
                    replica.state_machine.apply(&record.entry)?;
                    replica.applied = record.index;
                    replayed += 1;
                }
                info!(node_id, replayed, "replica caught up from log");
            }
            None => {
                let mut data = Vec::new();
                local.state_machine.save_snapshot(&mut data, stop)?;
                replica
                    .state_machine
                    .restore_from_snapshot(&mut &data[..], stop)?;
                replica.applied = local.applied;
                info!(
                    node_id,
                    applied_index = replica.applied,
                    "replica caught up from snapshot"
                );
            }
        }

        replica.available = true;
        Ok(())
    }

    /// Snapshots the local replica off the driver thread, persists it and
    /// compacts the log.
    async fn take_snapshot(&mut self) -> Result<u64> {
        let stop = self.stop.clone();
        self.snapshot_with(stop).await
    }

    /// Persists entries applied since the last snapshot before the state
    /// machines close. Runs after the stop token fired, so it carries its own.
    async fn flush_snapshot(&mut self) {
        if self.store.is_none() || self.local.applied <= self.snapshot_index {
            return;
        }
        match self.snapshot_with(CancellationToken::new()).await {
            Ok(index) => debug!(index, "flushed snapshot on stop"),
            Err(e) => warn!(error = %e, "failed to flush snapshot on stop"),
        }
    }

    async fn snapshot_with(&mut self, stop: CancellationToken) -> Result<u64> {
        let index = self.local.applied;
        let state_machine = self.local.state_machine.clone();
        let store = self.store.clone();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut data = Vec::new();
            state_machine.save_snapshot(&mut data, &stop)?;
            if let Some(store) = store {
                store.save(index, &data)?;
            }
            Ok(())
        })
        .await
        .map_err(|e| ConsensusError::Internal(format!("snapshot task failed: {}", e)))??;

        self.snapshot_index = index;
        let compacted = self
            .log
            .compact(index.saturating_sub(self.compaction_overhead));

        info!(index, compacted, first_index = self.log.first_index(), "took snapshot");
        Ok(index)
    }

    fn status(&self) -> EngineStatus {
        EngineStatus {
            cluster_id: self.cluster_id,
            node_id: self.local.node_id,
            first_index: self.log.first_index(),
            last_index: self.log.last_index(),
            snapshot_index: self.snapshot_index,
            sessions: self.sessions.len(),
            replicas: self.replicas().map(Replica::status).collect(),
        }
    }

    fn shutdown(&mut self) {
        for replica in self.replicas() {
            if let Err(e) = replica.state_machine.close() {
                warn!(node_id = replica.node_id, error = %e, "failed to close state machine");
            }
        }
    }
}
