use anyhow::Context;
use clap::Parser;
use distributed_kv::commands::handlers::CommandDispatcher;
use distributed_kv::config::{NodeArgs, NodeConfig};
use distributed_kv::gateway::service::Gateway;
use distributed_kv::gateway::slave::run_slave;
use distributed_kv::membership::config::{build_nodes, load_nodes, resolve_identity};
use distributed_kv::membership::handlers::status_router;
use distributed_kv::membership::service::Cluster;
use distributed_kv::storage::keyspace::{Keyspace, SWEEP_INTERVAL};
use distributed_kv::transport::peer::FORMATION_BACKOFF;
use distributed_kv::transport::server;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = NodeArgs::parse().into_config()?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .init();

    // 1. Storage layer:
    let keyspace = Arc::new(Keyspace::default());
    keyspace.clone().spawn_expiry_sweeper(SWEEP_INTERVAL);

    if let Some(gateway) = config.slave_of {
        return run_as_slave(gateway, keyspace).await;
    }
    if config.gateway {
        return run_gateway(&config).await;
    }

    // 2. Membership:
    let entries = if config.cluster {
        let entries = load_nodes(&config.node_list)?;
        tracing::info!(
            "Loaded {} nodes from {}",
            entries.len(),
            config.node_list.display()
        );
        entries
    } else {
        Vec::new()
    };
    let self_name = resolve_identity(config.name.as_deref(), &entries);
    let (local, peers) = build_nodes(&self_name, config.bind, config.port, entries);
    tracing::info!("Starting node {} on {}", self_name, config.client_addr());

    let cluster = Cluster::new(local, peers, config.cluster);

    // 3. Client and bus listeners:
    let node = server::start(config.clone(), cluster.clone(), keyspace.clone()).await?;

    // 4. HTTP status server:
    if let Some(status_addr) = config.status_addr() {
        let app = status_router(cluster.clone(), keyspace.clone());
        let listener = tokio::net::TcpListener::bind(status_addr)
            .await
            .with_context(|| format!("binding status port {}", status_addr))?;
        tracing::info!("HTTP status server listening on {}", status_addr);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("Status server stopped: {}", e);
            }
        });
    }

    // 5. Spawn stats reporter:
    let stats_cluster = cluster.clone();
    let stats_keyspace = keyspace.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));

        loop {
            interval.tick().await;
            tracing::info!(
                "Cluster stats: {}/{} nodes reachable, {} local keys{}",
                stats_cluster.reachable_count(),
                stats_cluster.nodes.len(),
                stats_keyspace.len(),
                if stats_cluster.is_forming() { " (forming)" } else { "" }
            );
        }
    });

    tracing::info!(
        "Serving clients on {}, press Ctrl+C to shutdown",
        node.client_addr
    );
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down node {}", self_name);

    Ok(())
}

async fn run_gateway(config: &NodeConfig) -> anyhow::Result<()> {
    let addr = config.gateway_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding gateway port {}", addr))?;
    let handle = Gateway::start(listener, config.workers, config.writers)?;

    tokio::signal::ctrl_c().await?;
    tracing::info!(
        "Shutting down gateway with {} slaves",
        handle.gateway.live_slaves().await
    );
    Ok(())
}

/// Serves the gateway, reconnecting whenever the session ends.
async fn run_as_slave(gateway: SocketAddr, keyspace: Arc<Keyspace>) -> anyhow::Result<()> {
    let dispatcher = CommandDispatcher::new(keyspace);
    tracing::info!("Running as slave of {}", gateway);

    loop {
        tokio::select! {
            result = run_slave(gateway, dispatcher.clone()) => {
                if let Err(e) = result {
                    tracing::warn!("Gateway session ended: {:#}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
        tokio::time::sleep(FORMATION_BACKOFF).await;
    }
}
