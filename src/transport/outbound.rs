//! Outbound write path.
//!
//! Request handlers never write to sockets. They enqueue bytes for a
//! connection and a fixed set of writer tasks performs the sends. Each
//! connection is pinned to one writer (`id % writers`), so its bytes leave in
//! the order they were queued. Queues are bounded: a producer waits at most
//! [`SEND_TIMEOUT`] for room and then gets [`KvError::Backpressure`].

use super::codec::encode_message;
use super::types::{ConnectionId, Message};
use crate::error::{KvError, KvResult};

use bytes::Bytes;
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

pub const QUEUE_CAPACITY: usize = 1024;
pub const SEND_TIMEOUT: Duration = Duration::from_secs(1);
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

pub type WriteSink = Box<dyn AsyncWrite + Send + Unpin>;

enum Outbound {
    Register(ConnectionId, WriteSink),
    Send(ConnectionId, Bytes),
    Close(ConnectionId),
}

#[derive(Clone)]
pub struct OutboundQueue {
    lanes: Vec<mpsc::Sender<Outbound>>,
}

impl OutboundQueue {
    /// Spawns `writers` writer tasks, each with a queue of `capacity` operations.
    pub fn start(writers: usize, capacity: usize) -> Self {
        let lanes = (0..writers.max(1))
            .map(|index| {
                let (tx, rx) = mpsc::channel(capacity.max(1));
                tokio::spawn(writer_loop(index, rx));
                tx
            })
            .collect();
        Self { lanes }
    }

    fn lane(&self, id: ConnectionId) -> &mpsc::Sender<Outbound> {
        &self.lanes[id.0 as usize % self.lanes.len()]
    }

    async fn push(&self, id: ConnectionId, op: Outbound) -> KvResult<()> {
        self.lane(id)
            .send_timeout(op, SEND_TIMEOUT)
            .await
            .map_err(|e| match e {
                mpsc::error::SendTimeoutError::Timeout(_) => KvError::Backpressure,
                mpsc::error::SendTimeoutError::Closed(_) => {
                    KvError::ConnectFailure("writer stopped".to_string())
                }
            })
    }

    /// Hands the write half of a connection to its writer. Must precede any send.
    pub async fn register(&self, id: ConnectionId, sink: WriteSink) -> KvResult<()> {
        self.push(id, Outbound::Register(id, sink)).await
    }

    pub async fn send(&self, id: ConnectionId, bytes: Bytes) -> KvResult<()> {
        self.push(id, Outbound::Send(id, bytes)).await
    }

    pub async fn send_message(&self, id: ConnectionId, msg: Message) -> KvResult<()> {
        let bytes = encode_message(msg)?;
        self.send(id, bytes).await
    }

    /// Shuts down and drops the connection's write half once queued bytes are out.
    pub async fn close(&self, id: ConnectionId) {
        if let Err(e) = self.push(id, Outbound::Close(id)).await {
            tracing::debug!("Could not queue close for {}: {}", id, e);
        }
    }
}

async fn writer_loop(index: usize, mut rx: mpsc::Receiver<Outbound>) {
    let mut sinks: HashMap<ConnectionId, WriteSink> = HashMap::new();
    tracing::debug!("Writer {} started", index);

    while let Some(op) = rx.recv().await {
        match op {
            Outbound::Register(id, sink) => {
                sinks.insert(id, sink);
            }
            Outbound::Send(id, bytes) => {
                let Some(sink) = sinks.get_mut(&id) else {
                    tracing::trace!("Dropping {} bytes for closed connection {}", bytes.len(), id);
                    continue;
                };
                let result = tokio::time::timeout(WRITE_TIMEOUT, async {
                    sink.write_all(&bytes).await?;
                    sink.flush().await
                })
                .await;
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::warn!("Write to {} failed: {}", id, e);
                        sinks.remove(&id);
                    }
                    Err(_) => {
                        tracing::warn!("Write to {} timed out, dropping connection", id);
                        sinks.remove(&id);
                    }
                }
            }
            Outbound::Close(id) => {
                if let Some(mut sink) = sinks.remove(&id) {
                    let _ = sink.shutdown().await;
                }
            }
        }
    }

    tracing::debug!("Writer {} stopped", index);
}
