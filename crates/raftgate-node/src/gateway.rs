//! Request gateway.
//!
//! Turns one inbound call into exactly one replicated log operation, plus
//! an optional read-back after a write. Every engine call is bounded by a
//! deadline; the gateway never retries.
//!
//! A write moves through these states, each logged at `debug`:
//!
//! ```text
//! received ─▶ encoded ─▶ proposed ─┬─▶ committed ─▶ (read back) ─▶ responded
//!                                  ├─▶ timed out ─────────────────▶ responded
//!                                  └─▶ rejected ──────────────────▶ responded
//! ```

use crate::observability::{Outcome, METRICS};
use bytes::Bytes;
use raftgate_consensus::{ConsensusError, ReplicatedLog, Session};
use raftgate_statemachine::{Command, Operation, ReadQuery, StateMachineError, Verb};
use std::sync::Arc;
use std::time::{Duration, Instant as StdInstant};
use thiserror::Error;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

/// Gateway errors, one per HTTP status class.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid query syntax: {0}")]
    InvalidQuerySyntax(String),

    #[error("invalid entry syntax: {0}")]
    InvalidEntrySyntax(String),

    #[error("{0}")]
    OperationTimeout(String),

    #[error("engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("snapshot I/O failure: {0}")]
    SnapshotIo(String),

    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    fn read_timeout(after: Duration) -> Self {
        GatewayError::OperationTimeout(format!("read timed out after {}ms", after.as_millis()))
    }

    fn write_timeout(after: Duration) -> Self {
        GatewayError::OperationTimeout(format!(
            "write timed out after {}ms, it may still be committed",
            after.as_millis()
        ))
    }

    /// Metrics outcome of a call that failed with this error.
    pub fn outcome(&self) -> Outcome {
        match self {
            GatewayError::InvalidQuerySyntax(_)
            | GatewayError::InvalidEntrySyntax(_)
            | GatewayError::MethodNotAllowed(_) => Outcome::Invalid,
            GatewayError::OperationTimeout(_) => Outcome::Timeout,
            GatewayError::EngineUnavailable(_) => Outcome::Unavailable,
            GatewayError::SnapshotIo(_) | GatewayError::Internal(_) => Outcome::Error,
        }
    }
}

impl From<StateMachineError> for GatewayError {
    fn from(e: StateMachineError) -> Self {
        match e {
            StateMachineError::InvalidQuerySyntax(msg) => GatewayError::InvalidQuerySyntax(msg),
            StateMachineError::InvalidEntrySyntax(msg) => GatewayError::InvalidEntrySyntax(msg),
            StateMachineError::Closed => GatewayError::EngineUnavailable(e.to_string()),
            e if e.is_snapshot_failure() => GatewayError::SnapshotIo(e.to_string()),
            e => GatewayError::Internal(e.to_string()),
        }
    }
}

impl From<ConsensusError> for GatewayError {
    fn from(e: ConsensusError) -> Self {
        match e {
            ConsensusError::StateMachine(e) => e.into(),
            ConsensusError::Timeout => GatewayError::OperationTimeout(e.to_string()),
            ConsensusError::UnknownSession(_) => GatewayError::EngineUnavailable(e.to_string()),
            e if e.is_unavailable() => GatewayError::EngineUnavailable(e.to_string()),
            e => GatewayError::Internal(e.to_string()),
        }
    }
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Gateway settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Cluster every call is addressed to.
    pub cluster_id: u64,
    /// Deadline of each read.
    pub read_timeout: Duration,
    /// Deadline of each proposal.
    pub write_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            cluster_id: 1,
            read_timeout: Duration::from_secs(3),
            write_timeout: Duration::from_secs(3),
        }
    }
}

/// Bridges HTTP calls to a replicated log.
///
/// All writes share the cluster's no-op session, so concurrent requests
/// never contend on sequence numbers.
pub struct Gateway {
    engine: Arc<dyn ReplicatedLog>,
    session: Session,
    config: GatewayConfig,
}

impl Gateway {
    pub fn new(engine: Arc<dyn ReplicatedLog>, config: GatewayConfig) -> Self {
        let session = engine.noop_session(config.cluster_id);
        Self {
            engine,
            session,
            config,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Linearizable read of the counter stored under `key`.
    pub async fn read_key(&self, key: &str) -> Result<Vec<u8>> {
        let started = StdInstant::now();
        let result = self.read(key).await;
        record("read", &result, started);
        result
    }

    /// Writes `verb key` through the replicated log.
    ///
    /// With `return_value`, any verb other than `DELETE` is followed by a
    /// read of the same key. That read observes this write but is not
    /// linearized with it: writes from other clients may land in between.
    pub async fn write_key(
        &self,
        verb: Verb,
        key: &str,
        body: Bytes,
        return_value: bool,
    ) -> Result<Option<Vec<u8>>> {
        let started = StdInstant::now();
        let result = self.write(verb, key, body, return_value).await;
        record("write", &result, started);
        result
    }

    /// Releases the gateway's session.
    pub async fn shutdown(&self) -> Result<()> {
        let deadline = Instant::now() + self.config.write_timeout;
        match timeout_at(deadline, self.engine.close_session(&self.session, deadline)).await {
            Err(_) => Err(GatewayError::write_timeout(self.config.write_timeout)),
            Ok(result) => Ok(result?),
        }
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        let query = ReadQuery::new(key)?.encode();
        let deadline = Instant::now() + self.config.read_timeout;

        match timeout_at(
            deadline,
            self.engine
                .sync_read(self.config.cluster_id, &query, deadline),
        )
        .await
        {
            Err(_) | Ok(Err(ConsensusError::Timeout)) => {
                Err(GatewayError::read_timeout(self.config.read_timeout))
            }
            Ok(result) => Ok(result?),
        }
    }

    async fn write(
        &self,
        verb: Verb,
        key: &str,
        body: Bytes,
        return_value: bool,
    ) -> Result<Option<Vec<u8>>> {
        debug!(%verb, key, "write received");

        let operation = verb.operation();
        if operation == Operation::Unknown {
            debug!(%verb, key, "write rejected");
            return Err(GatewayError::MethodNotAllowed(verb.to_string()));
        }

        let entry = Command::new(verb.clone(), key)?.with_body(body).encode();
        debug!(%verb, key, bytes = entry.len(), "write encoded");

        let deadline = Instant::now() + self.config.write_timeout;
        debug!(%verb, key, "write proposed");
        match timeout_at(
            deadline,
            self.engine.sync_propose(&self.session, &entry, deadline),
        )
        .await
        {
            Err(_) | Ok(Err(ConsensusError::Timeout)) => {
                debug!(%verb, key, "write timed out");
                return Err(GatewayError::write_timeout(self.config.write_timeout));
            }
            Ok(Err(e)) => {
                debug!(%verb, key, error = %e, "write rejected");
                return Err(e.into());
            }
            Ok(Ok(_)) => debug!(%verb, key, "write committed"),
        }

        if !return_value || operation == Operation::Delete {
            return Ok(None);
        }

        match self.read(key).await {
            Ok(value) => {
                debug!(%verb, key, "write read back");
                Ok(Some(value))
            }
            Err(e) => {
                warn!(%verb, key, error = %e, "write committed but read-back failed");
                Err(e)
            }
        }
    }
}

fn record<T>(operation: &str, result: &Result<T>, started: StdInstant) {
    let outcome = match result {
        Ok(_) => Outcome::Ok,
        Err(e) => e.outcome(),
    };
    METRICS.record_request(operation, outcome, started.elapsed());
}

#[cfg(test)]
mod tests {
    use super::*;
    use raftgate_consensus::{EngineConfig, LocalEngine, Peers};
    use raftgate_statemachine::CounterStateMachine;

    fn start_engine(peers: &[u64]) -> Arc<LocalEngine> {
        let peers: Peers = peers
            .iter()
            .map(|id| (*id, format!("127.0.0.1:{}", 9000 + id)))
            .collect();
        Arc::new(
            LocalEngine::start_cluster(
                EngineConfig::default(),
                peers,
                false,
                CounterStateMachine::factory(),
            )
            .unwrap(),
        )
    }

    fn gateway(engine: Arc<LocalEngine>) -> Gateway {
        Gateway::new(engine, GatewayConfig::default())
    }

    #[tokio::test]
    async fn test_unwritten_key_reads_zero() {
        let engine = start_engine(&[1]);
        let gateway = gateway(engine.clone());
        assert_eq!(gateway.read_key("/never").await.unwrap(), b"0");
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let engine = start_engine(&[1, 2, 3]);
        let gateway = gateway(engine.clone());

        for verb in [Verb::Post, Verb::Put, Verb::Patch] {
            let value = gateway
                .write_key(verb, "/a", Bytes::new(), false)
                .await
                .unwrap();
            assert!(value.is_none());
        }
        assert_eq!(gateway.read_key("/a").await.unwrap(), b"3");

        gateway
            .write_key(Verb::Delete, "/a", Bytes::new(), false)
            .await
            .unwrap();
        assert_eq!(gateway.read_key("/a").await.unwrap(), b"0");
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_return_value() {
        let engine = start_engine(&[1]);
        let gateway = gateway(engine.clone());

        let value = gateway
            .write_key(Verb::Post, "/a", Bytes::from_static(b"ignored"), true)
            .await
            .unwrap();
        assert_eq!(value.as_deref(), Some(&b"1"[..]));

        // deletes never read back
        let value = gateway
            .write_key(Verb::Delete, "/a", Bytes::new(), true)
            .await
            .unwrap();
        assert!(value.is_none());
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_unknown_verb_is_not_proposed() {
        let engine = start_engine(&[1]);
        let gateway = gateway(engine.clone());

        let err = gateway
            .write_key(Verb::Other("TRACE".into()), "/a", Bytes::new(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::MethodNotAllowed(_)));

        let status = engine.status(Instant::now() + Duration::from_secs(1)).await.unwrap();
        assert_eq!(status.last_index, 0);
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_empty_key() {
        let engine = start_engine(&[1]);
        let gateway = gateway(engine.clone());

        assert!(matches!(
            gateway.read_key("").await,
            Err(GatewayError::InvalidQuerySyntax(_))
        ));
        assert!(matches!(
            gateway.write_key(Verb::Post, "", Bytes::new(), false).await,
            Err(GatewayError::InvalidEntrySyntax(_))
        ));
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_engine_unavailable() {
        let engine = start_engine(&[1, 2, 3]);
        let gateway = gateway(engine.clone());
        let deadline = Instant::now() + Duration::from_secs(1);
        engine.set_replica_available(2, false, deadline).await.unwrap();
        engine.set_replica_available(3, false, deadline).await.unwrap();

        let before = METRICS.requests("write", Outcome::Unavailable);
        let err = gateway
            .write_key(Verb::Post, "/a", Bytes::new(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::EngineUnavailable(_)));
        assert!(METRICS.requests("write", Outcome::Unavailable) > before);

        engine.stop().await;
        assert!(matches!(
            gateway.read_key("/a").await,
            Err(GatewayError::EngineUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_releases_noop_session() {
        let engine = start_engine(&[1]);
        let gateway = gateway(engine.clone());
        gateway.shutdown().await.unwrap();
        engine.stop().await;
    }

    #[test]
    fn test_error_mapping() {
        let err: GatewayError = ConsensusError::Timeout.into();
        assert_eq!(err.outcome(), Outcome::Timeout);

        let err: GatewayError = ConsensusError::Unavailable("no quorum".into()).into();
        assert!(matches!(err, GatewayError::EngineUnavailable(_)));

        let err: GatewayError = ConsensusError::Stopped.into();
        assert!(matches!(err, GatewayError::EngineUnavailable(_)));

        let err: GatewayError =
            ConsensusError::StateMachine(StateMachineError::SnapshotStopped).into();
        assert!(matches!(err, GatewayError::SnapshotIo(_)));

        let err: GatewayError = ConsensusError::Internal("boom".into()).into();
        assert_eq!(err.outcome(), Outcome::Error);
    }
}
