//! # Raftgate Node
//!
//! HTTP gateway over a replicated log: every path is the name of a counter
//! held by a deterministic state machine on each replica.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Raftgate Node                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌──────────────────────────────────────────────────────┐  │
//! │  │                    HTTP API Layer                     │  │
//! │  │  • GET reads, POST/PUT/PATCH increment, DELETE       │  │
//! │  │  • x-request-id, tracing, JSON errors                │  │
//! │  └──────────────────────────────────────────────────────┘  │
//! │                              │                              │
//! │  ┌──────────────────────────────────────────────────────┐  │
//! │  │                      Gateway                          │  │
//! │  │  • Encodes queries and log entries                    │  │
//! │  │  • Read and write deadlines, metrics                  │  │
//! │  └──────────────────────────────────────────────────────┘  │
//! │                              │                              │
//! │  ┌──────────────────────────────────────────────────────┐  │
//! │  │                  Replicated Log                       │  │
//! │  │  • Linearizable reads, synchronous proposals          │  │
//! │  │  • Counter state machine per replica, snapshots       │  │
//! │  └──────────────────────────────────────────────────────┘  │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cargo run --bin raftgate-node -- --http-addr 127.0.0.1:8080 --raft-addr 127.0.0.1:9000
//! curl -X POST 'localhost:8080/hits?return_value=1'
//! ```
//!
//! ## Modules
//!
//! - [`api`] - HTTP routing and error responses
//! - [`gateway`] - Read and write paths with deadlines
//! - [`bootstrap`] - Node startup and shutdown
//! - [`config`] - Node configuration
//! - [`observability`] - Structured logging, metrics, and request tracing

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod gateway;
pub mod observability;
