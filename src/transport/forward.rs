//! Requests waiting on another node.
//!
//! A forwarded request carries a fresh tag as its envelope origin. The owner
//! answers with the same tag and the link reader hands the payload to the
//! waiting client task. A request that gets no answer within
//! [`FORWARD_TIMEOUT`] is answered `TIMEOUT`; a reply arriving later finds no
//! waiter and is dropped.

use super::server::NodeContext;
use super::types::{ConnectionId, IdAllocator, Message};
use crate::commands::types::Reply;
use crate::error::KvError;
use crate::membership::types::NodeName;

use bytes::Bytes;
use dashmap::DashMap;
use std::time::Duration;
use tokio::sync::oneshot;

pub const FORWARD_TIMEOUT: Duration = Duration::from_secs(5);

struct Waiter {
    origin: ConnectionId,
    peer: NodeName,
    reply: oneshot::Sender<Bytes>,
}

pub struct PendingForwards {
    waiting: DashMap<u32, Waiter>,
    tags: IdAllocator,
}

impl PendingForwards {
    pub fn new() -> Self {
        Self {
            waiting: DashMap::new(),
            tags: IdAllocator::new(),
        }
    }

    pub fn register(&self, origin: ConnectionId, peer: NodeName) -> (u32, oneshot::Receiver<Bytes>) {
        let (tx, rx) = oneshot::channel();
        let tag = self.tags.next();
        self.waiting.insert(
            tag,
            Waiter {
                origin,
                peer,
                reply: tx,
            },
        );
        (tag, rx)
    }

    /// Delivers a reply. Returns false when nobody waits for `tag` any more.
    pub fn complete(&self, tag: u32, payload: Bytes) -> bool {
        match self.waiting.remove(&tag) {
            Some((_, waiter)) => waiter.reply.send(payload).is_ok(),
            None => false,
        }
    }

    /// Moves a waiting request onto another peer, so that peer's failure fails it.
    pub fn reassign(&self, tag: u32, peer: NodeName) -> bool {
        match self.waiting.get_mut(&tag) {
            Some(mut waiter) => {
                waiter.peer = peer;
                true
            }
            None => false,
        }
    }

    pub fn cancel(&self, tag: u32) {
        if let Some((_, waiter)) = self.waiting.remove(&tag) {
            tracing::debug!(
                "Gave up on request {} from {} to {}",
                tag,
                waiter.origin,
                waiter.peer
            );
        }
    }

    /// Fails every request waiting on `peer`. Their clients see the owner as unreachable.
    pub fn fail_peer(&self, peer: &NodeName) -> usize {
        let before = self.waiting.len();
        self.waiting.retain(|_, waiter| waiter.peer != *peer);
        before.saturating_sub(self.waiting.len())
    }

    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }
}

impl Default for PendingForwards {
    fn default() -> Self {
        Self::new()
    }
}

/// Sends `line` to `owner` over `link` and waits for its reply.
pub async fn forward(
    ctx: &NodeContext,
    origin: ConnectionId,
    owner: NodeName,
    link: ConnectionId,
    line: &str,
) -> Bytes {
    let (tag, rx) = ctx.pending.register(origin, owner.clone());
    tracing::debug!("Forwarding request {} from {} to {}", tag, origin, owner);

    let msg = Message::new(tag, line.to_string());
    if let Err(e) = ctx.outbound.send_message(link, msg).await {
        ctx.pending.cancel(tag);
        tracing::warn!("Could not forward to {}: {}", owner, e);
        return Reply::from(e).into_bytes();
    }

    match tokio::time::timeout(FORWARD_TIMEOUT, rx).await {
        Ok(Ok(payload)) => payload,
        Ok(Err(_)) => Reply::from(KvError::ConnectFailure(owner.to_string())).into_bytes(),
        Err(_) => {
            ctx.pending.cancel(tag);
            tracing::warn!("Request {} to {} timed out", tag, owner);
            Reply::from(KvError::Timeout).into_bytes()
        }
    }
}
