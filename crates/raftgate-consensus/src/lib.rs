//! Raftgate Consensus
//!
//! The replicated log the request gateway writes through, and an in-process
//! engine implementing it.
//!
//! # Components
//!
//! - [`ReplicatedLog`]: linearizable reads, synchronous proposals and
//!   session management, each bounded by a deadline
//! - [`Session`]: deduplicates retried proposals; the no-op session opts out
//! - [`LocalEngine`]: runs every replica of a cluster in this process,
//!   commits while a majority is available, snapshots and compacts the log
//!
//! # Proposal Flow
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │   Gateway    │────▶│   Session    │────▶│    Quorum    │
//! │ sync_propose │     │   (dedup)    │     │    check     │
//! └──────────────┘     └──────────────┘     └──────┬───────┘
//!                                                   │
//!                      ┌────────────────────────────┘
//!                      ▼
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │    Local     │────▶│  Append to   │────▶│ Apply on     │
//! │    apply     │     │     log      │     │ peer replicas│
//! └──────────────┘     └──────────────┘     └──────┬───────┘
//!                                                   │
//!                                                   ▼
//!                      ┌──────────────────────────────────┐
//!                      │ Snapshot every N entries, then   │
//!                      │ compact the log behind it        │
//!                      └──────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use raftgate_consensus::{EngineConfig, LocalEngine, Peers, ReplicatedLog};
//! use raftgate_statemachine::{Command, CounterStateMachine, Verb};
//! use std::time::Duration;
//! use tokio::time::Instant;
//!
//! # async fn run() -> raftgate_consensus::Result<()> {
//! let engine = LocalEngine::start_cluster(
//!     EngineConfig::default(),
//!     Peers::new(),
//!     false,
//!     CounterStateMachine::factory(),
//! )?;
//!
//! let deadline = Instant::now() + Duration::from_secs(3);
//! let session = engine.noop_session(1);
//! let entry = Command::new(Verb::Post, "/hits").unwrap().encode();
//! engine.sync_propose(&session, &entry, deadline).await?;
//!
//! let value = engine.sync_read(1, b"GET /hits", deadline).await?;
//! assert_eq!(value, b"1");
//! engine.stop().await;
//! # Ok(())
//! # }
//! ```

mod engine;
mod error;
mod local;
mod log;
mod session;
mod store;

pub use engine::{EngineConfig, EngineStatus, Peers, ReplicaStatus, ReplicatedLog};
pub use error::{ConsensusError, Result};
pub use local::LocalEngine;
pub use session::{Session, FIRST_SEQUENCE, NOOP_OWNER_ID};
