//! Raftgate Node - HTTP gateway over a replicated counter key space.

use anyhow::Context;
use clap::Parser;
use raftgate_node::bootstrap::start_node;
use raftgate_node::config::NodeConfig;
use raftgate_node::observability::{init_logging, LogFormat};
use raftgate_statemachine::CounterStateMachine;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Raftgate Node - replicated counters over HTTP
///
/// Flags override values read from `--config`; anything unset keeps its
/// default.
#[derive(Parser, Debug)]
#[command(name = "raftgate-node")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Raft node ID to use [default: 1]
    #[arg(long = "raft-node-id")]
    node_id: Option<u64>,

    /// Raft cluster ID to use [default: 1]
    #[arg(long = "raft-cluster-id")]
    cluster_id: Option<u64>,

    /// HTTP listen address [default: 127.0.0.1:8080]
    #[arg(long)]
    http_addr: Option<SocketAddr>,

    /// Raft node address, taken from --peers when unset
    #[arg(long)]
    raft_addr: Option<String>,

    /// Raft node data directory [default: ./]
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Raft peers, comma separated nodeID:host:port items
    #[arg(long)]
    peers: Option<String>,

    /// Join an existing cluster
    #[arg(long)]
    join: bool,

    /// Timeout for read operations in milliseconds [default: 3000]
    #[arg(long)]
    read_timeout_ms: Option<u64>,

    /// Timeout for write operations in milliseconds [default: 3000]
    #[arg(long)]
    write_timeout_ms: Option<u64>,

    /// Snapshot every this many entries, 0 disables snapshots [default: 10]
    #[arg(long)]
    snapshot_entries: Option<u64>,

    /// Log entries kept behind each snapshot [default: 5]
    #[arg(long)]
    compaction_overhead: Option<u64>,

    /// Log level (trace, debug, info, warn, error) [default: info]
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (pretty, json) [default: pretty]
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Prometheus metrics listen address
    #[arg(long)]
    metrics_addr: Option<SocketAddr>,
}

impl Args {
    fn into_config(self) -> anyhow::Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::load_yaml(path)?,
            None => NodeConfig::default(),
        };

        if let Some(v) = self.node_id {
            config.node_id = v;
        }
        if let Some(v) = self.cluster_id {
            config.cluster_id = v;
        }
        if let Some(v) = self.http_addr {
            config.http_addr = v;
        }
        if let Some(v) = self.raft_addr {
            config.raft_addr = Some(v);
        }
        if let Some(v) = self.data_dir {
            config.data_dir = v;
        }
        if let Some(v) = self.peers {
            config.peers = v;
        }
        if self.join {
            config.join = true;
        }
        if let Some(v) = self.read_timeout_ms {
            config.read_timeout_ms = v;
        }
        if let Some(v) = self.write_timeout_ms {
            config.write_timeout_ms = v;
        }
        if let Some(v) = self.snapshot_entries {
            config.snapshot_entries = v;
        }
        if let Some(v) = self.compaction_overhead {
            config.compaction_overhead = v;
        }
        if let Some(v) = self.log_level {
            config.log_level = v;
        }
        if let Some(v) = self.log_format {
            config.log_format = v;
        }
        if let Some(v) = self.metrics_addr {
            config.metrics_addr = Some(v);
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Args::parse().into_config()?;

    init_logging(&config.log_level, config.log_format).context("failed to initialize logging")?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting raftgate node");
    tracing::info!(
        node_id = config.node_id,
        cluster_id = config.cluster_id,
        http_addr = %config.http_addr,
        data_dir = %config.data_dir.display(),
        join = config.join,
        "Node configuration"
    );

    let node = start_node(config, CounterStateMachine::factory()).await?;
    tracing::info!("Node is ready. Press Ctrl+C to stop.");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutting down");
    node.shutdown().await;

    Ok(())
}
