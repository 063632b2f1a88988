//! Node configuration types.
//!
//! A [`NodeConfig`] is built from command-line flags, optionally layered on
//! top of a YAML file, and validated once before the node starts.

use crate::observability::LogFormat;
use raftgate_consensus::{EngineConfig, Peers};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Directory under `data_dir` that holds every cluster of this node.
pub const DATA_SUBDIR: &str = "raftgate";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid YAML for [`NodeConfig`].
    #[error("failed to parse config: {0}")]
    Parse(String),

    /// A peer list item is not `id:host:port`.
    #[error("bad syntax for 'peers' param: {0:?}")]
    BadPeersSyntax(String),

    /// No raft address was given and none could be taken from the peers.
    #[error("raft_addr parameter is required")]
    MissingRaftAddress,

    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Configuration for a raftgate node.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    /// Raft node ID.
    pub node_id: u64,
    /// Raft cluster ID.
    pub cluster_id: u64,
    /// HTTP listen address of the key space.
    pub http_addr: SocketAddr,
    /// Raft address of this node. Taken from `peers` when unset.
    pub raft_addr: Option<String>,
    /// Data directory.
    pub data_dir: PathBuf,
    /// Initial members, comma separated `id:host:port` items.
    pub peers: String,
    /// Join an existing cluster instead of starting one.
    pub join: bool,
    /// Read timeout in milliseconds.
    pub read_timeout_ms: u64,
    /// Write timeout in milliseconds.
    pub write_timeout_ms: u64,
    /// Snapshot every this many applied entries, zero disables snapshots.
    pub snapshot_entries: u64,
    /// Log entries kept behind each snapshot.
    pub compaction_overhead: u64,
    /// Log level.
    pub log_level: String,
    /// Log output format.
    pub log_format: LogFormat,
    /// Listen address of the Prometheus endpoint, disabled when unset.
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: 1,
            cluster_id: 1,
            http_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            raft_addr: None,
            data_dir: PathBuf::from("./"),
            peers: String::new(),
            join: false,
            read_timeout_ms: 3000,
            write_timeout_ms: 3000,
            snapshot_entries: 10,
            compaction_overhead: 5,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_addr: None,
        }
    }
}

impl NodeConfig {
    /// Loads a configuration from a YAML file. Missing fields keep their
    /// defaults.
    pub fn load_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Parses a configuration from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.node_id == 0 {
            return Err(ConfigError::Invalid("node_id must be non-zero".into()));
        }
        if self.read_timeout_ms == 0 {
            return Err(ConfigError::Invalid("read_timeout_ms must be non-zero".into()));
        }
        if self.write_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "write_timeout_ms must be non-zero".into(),
            ));
        }

        let peers = self.peer_map()?;
        self.raft_address(&peers)?;
        Ok(())
    }

    /// Read timeout.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Write timeout.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Parsed initial members.
    pub fn peer_map(&self) -> Result<Peers> {
        parse_peers(&self.peers)
    }

    /// Raft address of this node: `raft_addr` if set, else this node's
    /// entry in `peers`.
    pub fn raft_address(&self, peers: &Peers) -> Result<String> {
        match &self.raft_addr {
            Some(addr) if !addr.is_empty() => Ok(addr.clone()),
            _ => peers
                .get(&self.node_id)
                .cloned()
                .ok_or(ConfigError::MissingRaftAddress),
        }
    }

    /// Directory of this node's raft state:
    /// `<data_dir>/raftgate/cluster-<C>/node-<N>`.
    pub fn node_dir(&self) -> PathBuf {
        self.data_dir
            .join(DATA_SUBDIR)
            .join(format!("cluster-{}", self.cluster_id))
            .join(format!("node-{}", self.node_id))
    }

    /// Builds the engine configuration and initial member list.
    pub fn engine_config(&self) -> Result<(EngineConfig, Peers)> {
        let peers = self.peer_map()?;
        let raft_address = self.raft_address(&peers)?;

        let config = EngineConfig {
            cluster_id: self.cluster_id,
            node_id: self.node_id,
            raft_address,
            node_dir: Some(self.node_dir()),
            snapshot_entries: self.snapshot_entries,
            compaction_overhead: self.compaction_overhead,
            ..Default::default()
        };
        Ok((config, peers))
    }
}

/// Parses a comma separated list of `id:host:port` items.
///
/// An empty string yields no peers.
pub fn parse_peers(s: &str) -> Result<Peers> {
    let mut peers = Peers::new();
    if s.is_empty() {
        return Ok(peers);
    }

    for item in s.split(',') {
        let parts: Vec<&str> = item.split(':').collect();
        if parts.len() < 3 || parts[..3].iter().any(|p| p.is_empty()) {
            return Err(ConfigError::BadPeersSyntax(item.to_string()));
        }
        let node_id: u64 = parts[0]
            .parse()
            .map_err(|_| ConfigError::BadPeersSyntax(item.to_string()))?;
        peers.insert(node_id, format!("{}:{}", parts[1], parts[2]));
    }
    Ok(peers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NodeConfig {
            raft_addr: Some("127.0.0.1:9000".into()),
            ..Default::default()
        };
        config.validate().unwrap();
        assert_eq!(config.read_timeout(), Duration::from_secs(3));
        assert_eq!(config.write_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_parse_peers() {
        let peers = parse_peers("1:localhost:9001,2:localhost:9002,3:10.0.0.3:9003").unwrap();
        assert_eq!(peers.len(), 3);
        assert_eq!(peers[&1], "localhost:9001");
        assert_eq!(peers[&3], "10.0.0.3:9003");

        assert!(parse_peers("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_peers_bad_syntax() {
        for bad in [
            "1:localhost",
            ":localhost:9001",
            "1::9001",
            "1:localhost:",
            "x:localhost:9001",
            "1:localhost:9001,",
        ] {
            assert!(
                matches!(parse_peers(bad), Err(ConfigError::BadPeersSyntax(_))),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_raft_address_from_peers() {
        let config = NodeConfig {
            node_id: 2,
            peers: "1:localhost:9001,2:localhost:9002".into(),
            ..Default::default()
        };
        let peers = config.peer_map().unwrap();
        assert_eq!(config.raft_address(&peers).unwrap(), "localhost:9002");

        let explicit = NodeConfig {
            raft_addr: Some("0.0.0.0:7000".into()),
            ..config.clone()
        };
        assert_eq!(explicit.raft_address(&peers).unwrap(), "0.0.0.0:7000");
    }

    #[test]
    fn test_missing_raft_address() {
        let config = NodeConfig {
            node_id: 4,
            peers: "1:localhost:9001".into(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRaftAddress)
        ));
        assert!(matches!(
            NodeConfig::default().validate(),
            Err(ConfigError::MissingRaftAddress)
        ));
    }

    #[test]
    fn test_invalid_values() {
        let base = NodeConfig {
            raft_addr: Some("127.0.0.1:9000".into()),
            ..Default::default()
        };
        let cases = [
            NodeConfig {
                node_id: 0,
                ..base.clone()
            },
            NodeConfig {
                read_timeout_ms: 0,
                ..base.clone()
            },
            NodeConfig {
                write_timeout_ms: 0,
                ..base.clone()
            },
        ];
        for config in cases {
            assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        }
    }

    #[test]
    fn test_node_dir_layout() {
        let config = NodeConfig {
            node_id: 3,
            cluster_id: 128,
            data_dir: PathBuf::from("/var/lib"),
            ..Default::default()
        };
        assert_eq!(
            config.node_dir(),
            PathBuf::from("/var/lib/raftgate/cluster-128/node-3")
        );
    }

    #[test]
    fn test_from_yaml() {
        let config = NodeConfig::from_yaml(
            r#"
node_id: 2
cluster_id: 7
http_addr: "0.0.0.0:8081"
peers: "1:localhost:9001,2:localhost:9002"
write_timeout_ms: 500
log_format: json
"#,
        )
        .unwrap();

        assert_eq!(config.node_id, 2);
        assert_eq!(config.cluster_id, 7);
        assert_eq!(config.write_timeout(), Duration::from_millis(500));
        assert_eq!(config.read_timeout(), Duration::from_secs(3));
        assert_eq!(config.log_format, LogFormat::Json);
        config.validate().unwrap();

        let (engine, peers) = config.engine_config().unwrap();
        assert_eq!(engine.raft_address, "localhost:9002");
        assert_eq!(engine.snapshot_entries, 10);
        assert_eq!(peers.len(), 2);
    }

    #[test]
    fn test_yaml_rejects_unknown_fields() {
        assert!(matches!(
            NodeConfig::from_yaml("node_idd: 2\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.yaml");
        std::fs::write(&path, "node_id: 5\nraft_addr: \"127.0.0.1:9005\"\n").unwrap();

        let config = NodeConfig::load_yaml(&path).unwrap();
        assert_eq!(config.node_id, 5);

        assert!(matches!(
            NodeConfig::load_yaml(dir.path().join("missing.yaml")),
            Err(ConfigError::Read { .. })
        ));
    }
}
