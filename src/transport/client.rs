//! Text client connections.
//!
//! One command per line. A connection handles its lines strictly in order: a
//! forwarded command is answered before the next line is read, so replies
//! arrive in request order even when they come from different nodes.

use super::codec::MAX_PAYLOAD;
use super::forward::forward;
use super::pubsub::{deliver, relay_line};
use super::server::NodeContext;
use super::types::ConnectionId;
use crate::commands::parser::parse;
use crate::commands::types::{Parsed, Reply};
use crate::error::KvError;
use crate::membership::types::Route;
use crate::storage::types::Subscriber;

use bytes::Bytes;
use futures_util::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

pub const MAX_LINE_LENGTH: usize = MAX_PAYLOAD;

pub enum Flow {
    Reply(Bytes),
    Skip,
    Quit,
}

pub async fn serve_client(ctx: Arc<NodeContext>, stream: TcpStream, addr: SocketAddr) {
    let id = ctx.ids.next_connection();
    let _ = stream.set_nodelay(true);
    let (reader, writer) = stream.into_split();
    if let Err(e) = ctx.outbound.register(id, Box::new(writer)).await {
        tracing::warn!("Refusing client {}: {}", addr, e);
        return;
    }
    tracing::debug!("Client {} connected as {}", addr, id);

    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(line) => line,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                let reply = Reply::from(KvError::Protocol("line too long".to_string()));
                let _ = ctx.outbound.send(id, reply.into_bytes()).await;
                break;
            }
            Err(LinesCodecError::Io(e)) => {
                tracing::debug!("Client {} read failed: {}", addr, e);
                break;
            }
        };

        let bytes = match handle_line(&ctx, id, &line).await {
            Flow::Reply(bytes) => bytes,
            Flow::Skip => continue,
            Flow::Quit => break,
        };
        if let Err(e) = ctx.outbound.send(id, bytes).await {
            tracing::warn!("Dropping client {}: {}", addr, e);
            break;
        }
    }

    let dropped = ctx.keyspace.drop_subscriber(id);
    if dropped > 0 {
        tracing::debug!("Dropped {} subscriptions of {}", dropped, id);
    }
    ctx.outbound.close(id).await;
    tracing::debug!("Client {} disconnected", addr);
}

/// Parses, routes and runs one client line.
pub async fn handle_line(ctx: &NodeContext, origin: ConnectionId, line: &str) -> Flow {
    let command = match parse(line) {
        Ok(Parsed::Command(command)) => command,
        Ok(Parsed::Quit) => return Flow::Quit,
        Ok(Parsed::Empty) => return Flow::Skip,
        Err(e) => return Flow::Reply(Reply::from(e).into_bytes()),
    };

    let route = ctx.cluster.route(command.routing_key());
    match route {
        Ok(Route::Local) => {
            let executed = ctx
                .dispatcher
                .execute_for(command, Some(Subscriber::client(origin)));
            if let Some(publication) = executed.publication {
                deliver(ctx, publication).await;
            }
            Flow::Reply(executed.reply.into_bytes())
        }
        Ok(Route::Remote { owner, link }) => {
            let line = if command.is_subscription() {
                relay_line(origin, line.trim())
            } else {
                line.trim().to_string()
            };
            Flow::Reply(forward(ctx, origin, owner, link, &line).await)
        }
        Err(e) => {
            tracing::debug!("Rejecting {:?} from {}: {}", command.kind(), origin, e);
            Flow::Reply(Reply::from(e).into_bytes())
        }
    }
}
