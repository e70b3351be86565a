//! Fixed pool of connection workers.
//!
//! Each worker is one task that owns the futures of the connections assigned
//! to it and polls them together, so a worker's connections make progress only
//! on that worker. The listeners hand accepted connections out round-robin.

use super::client::serve_client;
use super::peer::{serve_inbound, serve_link};
use super::server::NodeContext;
use super::types::ConnectionId;
use crate::membership::types::NodeName;

use anyhow::Result;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::mpsc;

const ASSIGN_QUEUE: usize = 128;

pub enum Connection {
    /// Text client on the client port.
    Client { stream: TcpStream, addr: SocketAddr },
    /// Another node connecting to our bus port.
    PeerInbound { stream: TcpStream, addr: SocketAddr },
    /// Read side of our own link to a peer. Its write half is already registered.
    PeerLink {
        id: ConnectionId,
        node: NodeName,
        reader: OwnedReadHalf,
    },
}

/// Serves the connections handed to a worker. The node serves [`Connection`]s;
/// the gateway serves plain accepted sockets.
pub trait ConnectionService: Send + Sync + 'static {
    type Conn: Send + 'static;

    fn serve(self: Arc<Self>, conn: Self::Conn) -> BoxFuture<'static, ()>;
}

pub struct WorkerPool<C> {
    senders: Vec<mpsc::Sender<C>>,
    next: AtomicUsize,
}

pub struct Worker<C> {
    index: usize,
    rx: mpsc::Receiver<C>,
}

impl<C: Send + 'static> WorkerPool<C> {
    /// Creates the pool and its workers. The workers start once the service
    /// they run for exists, see [`Worker::run`].
    pub fn new(size: usize) -> (Self, Vec<Worker<C>>) {
        let (senders, workers): (Vec<_>, Vec<_>) = (0..size.max(1))
            .map(|index| {
                let (tx, rx) = mpsc::channel(ASSIGN_QUEUE);
                (tx, Worker { index, rx })
            })
            .unzip();

        let pool = Self {
            senders,
            next: AtomicUsize::new(0),
        };
        (pool, workers)
    }

    pub fn size(&self) -> usize {
        self.senders.len()
    }

    pub async fn assign(&self, conn: C) -> Result<()> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.senders.len();
        self.senders[idx]
            .send(conn)
            .await
            .map_err(|_| anyhow::anyhow!("worker {} stopped", idx))
    }
}

impl<C: Send + 'static> Worker<C> {
    pub async fn run<S>(mut self, service: Arc<S>)
    where
        S: ConnectionService<Conn = C>,
    {
        let mut active: FuturesUnordered<BoxFuture<'static, ()>> = FuturesUnordered::new();
        tracing::debug!("Worker {} started", self.index);

        loop {
            tokio::select! {
                assigned = self.rx.recv() => match assigned {
                    Some(conn) => active.push(service.clone().serve(conn)),
                    None => break,
                },
                Some(()) = active.next(), if !active.is_empty() => {}
            }
        }

        while active.next().await.is_some() {}
        tracing::debug!("Worker {} stopped", self.index);
    }
}

impl ConnectionService for NodeContext {
    type Conn = Connection;

    fn serve(self: Arc<Self>, conn: Connection) -> BoxFuture<'static, ()> {
        async move {
            match conn {
                Connection::Client { stream, addr } => serve_client(self, stream, addr).await,
                Connection::PeerInbound { stream, addr } => {
                    serve_inbound(self, stream, addr).await
                }
                Connection::PeerLink { id, node, reader } => {
                    serve_link(self, id, node, reader).await
                }
            }
        }
        .boxed()
    }
}
