use super::forward::PendingForwards;
use super::outbound::{OutboundQueue, QUEUE_CAPACITY};
use super::peer::spawn_connector;
use super::types::IdAllocator;
use super::worker::{Connection, WorkerPool};
use crate::commands::handlers::CommandDispatcher;
use crate::config::NodeConfig;
use crate::membership::service::Cluster;
use crate::storage::keyspace::Keyspace;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Everything a connection handler needs, shared by all workers.
pub struct NodeContext {
    pub config: NodeConfig,
    pub keyspace: Arc<Keyspace>,
    pub cluster: Arc<Cluster>,
    pub dispatcher: CommandDispatcher,
    pub outbound: OutboundQueue,
    pub pending: PendingForwards,
    pub pool: WorkerPool<Connection>,
    pub ids: IdAllocator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerKind {
    Client,
    Bus,
}

/// A running node.
pub struct NodeHandle {
    pub ctx: Arc<NodeContext>,
    pub client_addr: SocketAddr,
    pub bus_addr: Option<SocketAddr>,
}

/// Binds the client port (and, in cluster mode, the bus port) and starts serving.
pub async fn start(
    config: NodeConfig,
    cluster: Arc<Cluster>,
    keyspace: Arc<Keyspace>,
) -> Result<NodeHandle> {
    let client = TcpListener::bind(config.client_addr())
        .await
        .with_context(|| format!("binding client port {}", config.client_addr()))?;
    let bus = if config.cluster {
        Some(
            TcpListener::bind(config.bus_addr())
                .await
                .with_context(|| format!("binding bus port {}", config.bus_addr()))?,
        )
    } else {
        None
    };

    start_with_listeners(config, cluster, keyspace, client, bus)
}

pub fn start_with_listeners(
    config: NodeConfig,
    cluster: Arc<Cluster>,
    keyspace: Arc<Keyspace>,
    client: TcpListener,
    bus: Option<TcpListener>,
) -> Result<NodeHandle> {
    let client_addr = client.local_addr()?;
    let bus_addr = bus.as_ref().map(TcpListener::local_addr).transpose()?;

    let outbound = OutboundQueue::start(config.writers, QUEUE_CAPACITY);
    let (pool, workers) = WorkerPool::new(config.workers);
    let cluster_mode = cluster.cluster_mode;

    let ctx = Arc::new(NodeContext {
        config,
        dispatcher: CommandDispatcher::new(keyspace.clone()),
        keyspace,
        cluster,
        outbound,
        pending: PendingForwards::new(),
        pool,
        ids: IdAllocator::new(),
    });

    for worker in workers {
        tokio::spawn(worker.run(ctx.clone()));
    }

    tracing::info!(
        "Node {} serving clients on {} with {} workers",
        ctx.cluster.self_name,
        client_addr,
        ctx.pool.size()
    );
    spawn_listener(client, ListenerKind::Client, ctx.clone());

    if let Some(bus) = bus {
        if let Some(addr) = bus_addr {
            tracing::info!("Bus listening on {}", addr);
        }
        spawn_listener(bus, ListenerKind::Bus, ctx.clone());
    }

    if cluster_mode {
        spawn_connector(ctx.clone());
    }

    Ok(NodeHandle {
        ctx,
        client_addr,
        bus_addr,
    })
}

fn spawn_listener(listener: TcpListener, kind: ListenerKind, ctx: Arc<NodeContext>) {
    tokio::spawn(async move {
        if let Err(e) = run_listener(listener, kind, ctx).await {
            tracing::error!("{:?} listener stopped: {:#}", kind, e);
        }
    });
}

/// Accepts connections and hands them to the worker pool.
pub async fn run_listener(
    listener: TcpListener,
    kind: ListenerKind,
    ctx: Arc<NodeContext>,
) -> Result<()> {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let conn = match kind {
                    ListenerKind::Client => Connection::Client { stream, addr },
                    ListenerKind::Bus => Connection::PeerInbound { stream, addr },
                };
                ctx.pool.assign(conn).await?;
            }
            Err(e) => {
                tracing::warn!("Accept failed on {:?} listener: {}", kind, e);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}
