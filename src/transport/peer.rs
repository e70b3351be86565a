//! Inter-node connections on the bus port.
//!
//! Every pair of nodes talks over two connections. A node's own outbound
//! *link* to a peer carries the requests it forwards to that peer and the
//! replies coming back; the peer's link in the other direction arrives here as
//! an *inbound* connection, whose requests this node executes and answers.
//! Both directions open with a join handshake from the connecting side.

use super::codec::EnvelopeCodec;
use super::pubsub::{decode_push, deliver, split_relay};
use super::server::NodeContext;
use super::types::{ConnectionId, Message};
use super::worker::Connection;
use crate::commands::parser::parse;
use crate::commands::types::{Parsed, Reply};
use crate::error::KvError;
use crate::membership::types::{ClusterNode, JoinOutcome, JoinRequest, NodeName};
use crate::storage::types::Subscriber;

use anyhow::{Context, Result, anyhow};
use bytes::Bytes;
use futures_util::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio_util::codec::FramedRead;
use tracing::{info, warn};

/// Pause between two rounds of connection attempts.
pub const FORMATION_BACKOFF: Duration = Duration::from_secs(3);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
/// How long an inbound connection may stay silent before its join.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Keeps trying to reach every unreachable peer, and assigns ranges once all
/// of them are up. Runs for the life of the node: peers lost after formation
/// are reconnected, their ranges stay as they are.
pub fn spawn_connector(ctx: Arc<NodeContext>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "Forming cluster of {} nodes as {}",
            ctx.cluster.nodes.len(),
            ctx.cluster.self_name
        );
        let mut ticker = tokio::time::interval(FORMATION_BACKOFF);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = ctx.cluster.wakeup() => {}
            }

            for node in ctx.cluster.unreachable_peers() {
                match connect_peer(&ctx, &node).await {
                    Ok(()) => info!("Linked to {} at {}", node.name, node.bus_addr()),
                    Err(e) => tracing::debug!(
                        "Node {} not reachable yet: {:#}, retrying in {:?}",
                        node.name,
                        e,
                        FORMATION_BACKOFF
                    ),
                }
            }

            ctx.cluster.try_complete_formation();
        }
    })
}

/// Opens our link to `node`, announces ourselves and hands the read side to a worker.
pub async fn connect_peer(ctx: &Arc<NodeContext>, node: &ClusterNode) -> Result<()> {
    let addr = node.bus_addr();
    let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| anyhow!("connect to {} timed out", addr))?
        .with_context(|| format!("connecting to {}", addr))?;
    stream.set_nodelay(true)?;

    let id = ctx.ids.next_connection();
    let (reader, writer) = stream.into_split();
    ctx.outbound.register(id, Box::new(writer)).await?;

    let join = JoinRequest {
        name: ctx.cluster.self_name.clone(),
        addr: ctx.config.bind,
        port: ctx.config.port,
    };
    ctx.outbound
        .send_message(id, Message::new(0, join.encode()?))
        .await?;

    ctx.cluster.mark_reachable(&node.name, id);
    ctx.pool
        .assign(Connection::PeerLink {
            id,
            node: node.name.clone(),
            reader,
        })
        .await
}

/// Reads replies on our link to `node` and wakes the requests waiting on them.
/// Untagged frames are publications for one of our clients.
pub async fn serve_link(
    ctx: Arc<NodeContext>,
    id: ConnectionId,
    node: NodeName,
    reader: OwnedReadHalf,
) {
    let mut frames = FramedRead::new(reader, EnvelopeCodec::new());

    while let Some(frame) = frames.next().await {
        match frame {
            Ok(msg) if msg.origin == 0 => match decode_push(msg.payload) {
                Some((client, line)) => {
                    if let Err(e) = ctx.outbound.send(client, line).await {
                        tracing::debug!("Dropped publication for {}: {}", client, e);
                    }
                }
                None => warn!("Malformed publication from {}", node),
            },
            Ok(msg) => {
                if !ctx.pending.complete(msg.origin, msg.payload) {
                    tracing::debug!("Dropping late reply {} from {}", msg.origin, node);
                }
            }
            Err(e) => {
                warn!("Link to {} failed: {}", node, e);
                break;
            }
        }
    }

    // A newer link may already have replaced this one.
    if ctx.cluster.link_of(&node) == Some(id) {
        ctx.cluster.mark_unreachable(&node);
        let failed = ctx.pending.fail_peer(&node);
        if failed > 0 {
            warn!("Failed {} requests waiting on {}", failed, node);
        }
    }
    ctx.outbound.close(id).await;
}

/// Serves a peer's link to us: join handshake first, then requests.
pub async fn serve_inbound(ctx: Arc<NodeContext>, stream: TcpStream, addr: SocketAddr) {
    let id = ctx.ids.next_connection();
    let _ = stream.set_nodelay(true);
    let (reader, writer) = stream.into_split();
    if let Err(e) = ctx.outbound.register(id, Box::new(writer)).await {
        warn!("Refusing bus connection from {}: {}", addr, e);
        return;
    }

    let mut frames = FramedRead::new(reader, EnvelopeCodec::new());
    let (peer, ingoing) = match read_join(&mut frames).await {
        Ok(join) => match ctx.cluster.handle_join(join, addr.ip()) {
            JoinOutcome::Known(name) => (name, false),
            JoinOutcome::Ingoing(name) => (name, true),
            JoinOutcome::Rejected(reason) => {
                warn!("Rejected join from {}: {}", addr, reason);
                ctx.outbound.close(id).await;
                return;
            }
        },
        Err(e) => {
            warn!("Dropping bus connection from {}: {:#}", addr, e);
            ctx.outbound.close(id).await;
            return;
        }
    };

    while let Some(frame) = frames.next().await {
        let msg = match frame {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Bus connection from {} failed: {}", peer, e);
                break;
            }
        };

        let reply = execute_forwarded(&ctx, id, &msg.payload).await;
        let answer = Message {
            origin: msg.origin,
            payload: reply,
        };
        if let Err(e) = ctx.outbound.send_message(id, answer).await {
            warn!("Could not answer {}: {}", peer, e);
            break;
        }
    }

    if ingoing {
        ctx.cluster.forget_ingoing(&peer);
    }
    ctx.keyspace.drop_subscriber(id);
    ctx.outbound.close(id).await;
    info!("Peer {} disconnected", peer);
}

async fn read_join(frames: &mut FramedRead<OwnedReadHalf, EnvelopeCodec>) -> Result<JoinRequest> {
    let first = tokio::time::timeout(JOIN_TIMEOUT, frames.next())
        .await
        .map_err(|_| anyhow!("no join within {:?}", JOIN_TIMEOUT))?
        .ok_or_else(|| anyhow!("closed before joining"))??;
    JoinRequest::decode(&first.payload)
}

/// Runs a request received from a peer on connection `conn`. It is executed
/// only if this node owns the key; it is never forwarded again. A relayed
/// subscription is registered for the peer's client, behind `conn`.
pub async fn execute_forwarded(ctx: &NodeContext, conn: ConnectionId, payload: &[u8]) -> Bytes {
    let Ok(line) = std::str::from_utf8(payload) else {
        return Reply::from(KvError::Protocol("request is not UTF-8".to_string())).into_bytes();
    };
    let (client, line) = split_relay(line);
    let command = match parse(line) {
        Ok(Parsed::Command(command)) => command,
        Ok(Parsed::Quit | Parsed::Empty) => {
            return Reply::from(KvError::InvalidArgument(
                "not a forwardable command".to_string(),
            ))
            .into_bytes();
        }
        Err(e) => return Reply::from(e).into_bytes(),
    };

    let owned = match command.routing_key() {
        Some(key) => ctx.cluster.owns(key),
        None => Ok(true),
    };
    let reply = match owned {
        Ok(true) => {
            let caller = client.map(|tag| Subscriber::relayed(conn, tag));
            let executed = ctx.dispatcher.execute_for(command, caller);
            if let Some(publication) = executed.publication {
                deliver(ctx, publication).await;
            }
            executed.reply
        }
        Ok(false) => Reply::from(KvError::RoutingUnavailable),
        Err(e) => Reply::from(e),
    };
    reply.into_bytes()
}
