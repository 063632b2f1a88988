//! # Raftgate State Machine
//!
//! The deterministic state machine contract driven by the replicated log,
//! and the in-memory counter that implements it.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  committed entries  ┌──────────────────────────┐
//! │  Replicated  │────────────────────▶│      StateMachine        │
//! │     Log      │  (apply, in order)  │  ┌────────────────────┐  │
//! │              │                     │  │ RwLock<State>      │  │
//! │              │  linearizable read  │  │  "c:n:key" -> u64  │  │
//! │              │────────────────────▶│  └────────────────────┘  │
//! │              │       (query)       │                          │
//! │              │  snapshot / restore │                          │
//! │              │◀───────────────────▶│                          │
//! └──────────────┘                     └──────────────────────────┘
//! ```
//!
//! Every replica owns exactly one state machine instance, built by a
//! [`StateMachineFactory`] from its `(cluster_id, node_id)` pair. The log
//! layer is the only caller: the request gateway never touches a state
//! machine directly.
//!
//! ## Wire formats
//!
//! - Log entry: `"<VERB> <KEY>\n<BODY>"`, body and newline omitted when empty.
//! - Query: `"GET <KEY>"`.
//! - Snapshot: newline-delimited JSON, see [`snapshot`].
//!
//! ## Example
//!
//! ```rust
//! use raftgate_statemachine::{Command, CounterStateMachine, ReadQuery, StateMachine, Verb};
//!
//! let sm = CounterStateMachine::new(1, 1);
//! sm.apply(&Command::new(Verb::Post, "/hits").unwrap().encode()).unwrap();
//!
//! let value = sm.query(&ReadQuery::new("/hits").unwrap().encode()).unwrap();
//! assert_eq!(value, b"1");
//! ```

mod command;
mod counter;
mod error;
pub mod snapshot;
mod traits;

pub use command::{Command, Operation, ReadQuery, Verb};
pub use counter::{CounterStateMachine, UnknownVerbPolicy};
pub use error::StateMachineError;
pub use traits::{ApplyOutcome, StateMachine, StateMachineFactory};

/// Re-exported so callers can build the stop signal snapshot calls poll.
pub use tokio_util::sync::CancellationToken;

/// Result type for state machine operations.
pub type Result<T> = std::result::Result<T, StateMachineError>;
