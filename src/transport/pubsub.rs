//! Publication delivery.
//!
//! A subscriber is either a client connected to this node, which gets the
//! published value as a plain line, or a client of another node whose
//! subscription arrived over that node's link. Those subscriptions are
//! *relayed*: the forwarding node prefixes the line with `@<client> `, and
//! pushes for them travel back over the same bus connection as envelopes with
//! origin 0 and the client id in front of the value. Origin 0 is never a
//! request tag, so a push cannot be mistaken for a reply.

use super::server::NodeContext;
use super::types::{ConnectionId, Message};
use crate::commands::types::Publication;

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Sends a published value to every subscriber. Failures are logged and
/// skipped; a slow subscriber never fails the publisher.
pub async fn deliver(ctx: &NodeContext, publication: Publication) {
    let line = Bytes::from(format!("{}\n", publication.value));
    for subscriber in publication.subscribers {
        let sent = if subscriber.tag == 0 {
            ctx.outbound.send(subscriber.conn, line.clone()).await
        } else {
            let push = Message::new(0, encode_push(subscriber.tag, &line));
            ctx.outbound.send_message(subscriber.conn, push).await
        };
        if let Err(e) = sent {
            tracing::debug!("Dropped publication for {}: {}", subscriber.conn, e);
        }
    }
}

pub fn encode_push(client: u32, line: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + line.len());
    buf.put_u32_le(client);
    buf.put_slice(line);
    buf.freeze()
}

/// Splits a push payload into the client it is for and the line to write.
pub fn decode_push(mut payload: Bytes) -> Option<(ConnectionId, Bytes)> {
    if payload.len() < 4 {
        return None;
    }
    let client = payload.get_u32_le();
    Some((ConnectionId(client), payload))
}

pub fn relay_line(client: ConnectionId, line: &str) -> String {
    format!("@{} {}", client.0, line)
}

/// Strips the relay prefix off a forwarded line, if it carries one.
pub fn split_relay(line: &str) -> (Option<u32>, &str) {
    let Some(rest) = line.strip_prefix('@') else {
        return (None, line);
    };
    match rest.split_once(' ') {
        Some((client, command)) => match client.parse::<u32>() {
            Ok(client) if client != 0 => (Some(client), command),
            _ => (None, line),
        },
        None => (None, line),
    }
}
