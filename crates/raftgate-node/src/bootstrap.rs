//! Node startup and shutdown.

use crate::api::{create_metrics_router, create_router, AppState};
use crate::config::{ConfigError, NodeConfig};
use crate::gateway::{Gateway, GatewayConfig};
use axum::Router;
use raftgate_consensus::{ConsensusError, LocalEngine};
use raftgate_statemachine::StateMachineFactory;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Errors that prevent a node from starting.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to start raft node: {0}")]
    Consensus(#[from] ConsensusError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// A started node: the engine, the gateway and its HTTP listeners.
pub struct RunningNode {
    engine: Arc<LocalEngine>,
    gateway: Arc<Gateway>,
    http_addr: SocketAddr,
    metrics_addr: Option<SocketAddr>,
    shutdown: CancellationToken,
    servers: Vec<JoinHandle<std::io::Result<()>>>,
}

impl RunningNode {
    /// Bound address of the key space listener.
    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    /// Bound address of the metrics listener, if enabled.
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_addr
    }

    pub fn engine(&self) -> &Arc<LocalEngine> {
        &self.engine
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// Stops accepting requests, drains the listeners, releases the
    /// session and stops the engine.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for server in self.servers {
            match server.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "HTTP server failed"),
                Err(e) => warn!(error = %e, "HTTP server task failed"),
            }
        }

        if let Err(e) = self.gateway.shutdown().await {
            warn!(error = %e, "failed to release gateway session");
        }
        self.engine.stop().await;
        info!("node stopped");
    }
}

/// Validates `config`, starts the replicated log with state machines from
/// `factory` and serves the key space over HTTP.
///
/// Listeners are bound before the engine starts, so a taken port leaves
/// nothing running. Port 0 binds an ephemeral port; see
/// [`RunningNode::http_addr`].
pub async fn start_node(
    config: NodeConfig,
    factory: StateMachineFactory,
) -> Result<RunningNode, NodeError> {
    config.validate()?;
    let (engine_config, peers) = config.engine_config()?;

    let http_listener = bind(config.http_addr).await?;
    let metrics_listener = match config.metrics_addr {
        Some(addr) => Some(bind(addr).await?),
        None => None,
    };

    let engine = Arc::new(LocalEngine::start_cluster(
        engine_config,
        peers,
        config.join,
        factory,
    )?);
    let gateway = Arc::new(Gateway::new(
        engine.clone(),
        GatewayConfig {
            cluster_id: config.cluster_id,
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
        },
    ));

    let shutdown = CancellationToken::new();
    let mut servers = Vec::new();

    let http_addr = local_addr(&http_listener, config.http_addr);
    let router = create_router(AppState {
        gateway: gateway.clone(),
    });
    servers.push(serve(http_listener, router, shutdown.clone()));
    info!(addr = %http_addr, "HTTP server listening");

    let metrics_addr = match metrics_listener {
        Some(listener) => {
            let addr = local_addr(&listener, config.metrics_addr.unwrap_or(http_addr));
            servers.push(serve(listener, create_metrics_router(), shutdown.clone()));
            info!(addr = %addr, "metrics server listening");
            Some(addr)
        }
        None => None,
    };

    Ok(RunningNode {
        engine,
        gateway,
        http_addr,
        metrics_addr,
        shutdown,
        servers,
    })
}

async fn bind(addr: SocketAddr) -> Result<TcpListener, NodeError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| NodeError::Bind { addr, source })
}

fn local_addr(listener: &TcpListener, fallback: SocketAddr) -> SocketAddr {
    listener.local_addr().unwrap_or(fallback)
}

fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> JoinHandle<std::io::Result<()>> {
    tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
    })
}
