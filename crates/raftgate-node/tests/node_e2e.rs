//! Full node tests over real sockets.
//!
//! These tests start a node with `start_node`, talk HTTP/1.1 to it over
//! TCP and verify:
//! - Reads and writes through the listener
//! - The metrics listener
//! - Recovery from the snapshot in the data directory after a restart

use raftgate_node::bootstrap::{start_node, RunningNode};
use raftgate_node::config::NodeConfig;
use raftgate_statemachine::CounterStateMachine;
use std::net::SocketAddr;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Sends one request and returns the status code and body.
async fn http(addr: SocketAddr, method: &str, path: &str) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "{} {} HTTP/1.1\r\nHost: {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        method, path, addr
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    let status = response
        .split(' ')
        .nth(1)
        .and_then(|code| code.parse().ok())
        .unwrap();
    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, body)| body.to_string())
        .unwrap_or_default();
    (status, body)
}

fn config(data_dir: &Path) -> NodeConfig {
    NodeConfig {
        http_addr: "127.0.0.1:0".parse().unwrap(),
        metrics_addr: Some("127.0.0.1:0".parse().unwrap()),
        peers: "1:127.0.0.1:9001,2:127.0.0.1:9002,3:127.0.0.1:9003".into(),
        data_dir: data_dir.to_path_buf(),
        snapshot_entries: 2,
        compaction_overhead: 1,
        ..Default::default()
    }
}

async fn start(data_dir: &Path) -> RunningNode {
    start_node(config(data_dir), CounterStateMachine::factory())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_serves_key_space() {
    let dir = tempfile::tempdir().unwrap();
    let node = start(dir.path()).await;
    let addr = node.http_addr();

    assert_eq!(http(addr, "GET", "/hits").await, (200, "0".to_string()));
    assert_eq!(http(addr, "POST", "/hits").await, (200, String::new()));
    assert_eq!(
        http(addr, "PUT", "/hits?return_value=1").await,
        (200, "2".to_string())
    );
    assert_eq!(http(addr, "OPTIONS", "/hits").await.0, 405);
    assert_eq!(http(addr, "DELETE", "/hits").await, (200, String::new()));
    assert_eq!(http(addr, "GET", "/hits").await, (200, "0".to_string()));

    let (status, body) = http(node.metrics_addr().unwrap(), "GET", "/metrics").await;
    assert_eq!(status, 200);
    assert!(body.contains("raftgate_requests_total"));

    node.shutdown().await;
}

#[tokio::test]
async fn test_restart_recovers_from_snapshot() {
    let dir = tempfile::tempdir().unwrap();

    let node = start(dir.path()).await;
    for _ in 0..4 {
        http(node.http_addr(), "POST", "/a").await;
    }
    http(node.http_addr(), "POST", "/b").await;
    http(node.http_addr(), "POST", "/b").await;
    node.shutdown().await;

    let snapshot = dir
        .path()
        .join("raftgate")
        .join("cluster-1")
        .join("node-1")
        .join("snapshot.ndjson");
    assert!(snapshot.exists());

    // six entries with a snapshot every two: the last one covers everything
    let node = start(dir.path()).await;
    assert_eq!(http(node.http_addr(), "GET", "/a").await.1, "4");
    assert_eq!(http(node.http_addr(), "GET", "/b").await.1, "2");
    node.shutdown().await;
}

#[tokio::test]
async fn test_restart_keeps_writes_between_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    let config = NodeConfig {
        snapshot_entries: 10,
        ..config(dir.path())
    };

    let node = start_node(config.clone(), CounterStateMachine::factory())
        .await
        .unwrap();
    for _ in 0..3 {
        assert_eq!(http(node.http_addr(), "POST", "/a").await.0, 200);
    }
    node.shutdown().await;

    let node = start_node(config, CounterStateMachine::factory())
        .await
        .unwrap();
    assert_eq!(http(node.http_addr(), "GET", "/a").await, (200, "3".to_string()));
    node.shutdown().await;
}
