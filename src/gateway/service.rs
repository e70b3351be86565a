use super::types::{FIFO_CAPACITY, Job, MAX_SLAVES, Slave, format_assignment, slave_index};
use crate::commands::parser::parse;
use crate::commands::types::{Parsed, Reply};
use crate::error::KvError;
use crate::membership::types::{JOIN_TAG, NodeName};
use crate::transport::client::MAX_LINE_LENGTH;
use crate::transport::codec::EnvelopeCodec;
use crate::transport::forward::{FORWARD_TIMEOUT, PendingForwards};
use crate::transport::outbound::{OutboundQueue, QUEUE_CAPACITY};
use crate::transport::types::{ConnectionId, IdAllocator, Message};
use crate::transport::worker::{ConnectionService, WorkerPool};

use anyhow::Result;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{RwLock, mpsc};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

/// Waiters that have not been handed to a slave yet.
const QUEUED: &str = "queued";

/// Single-hop fan-out: clients send keyed commands, slaves execute them.
pub struct Gateway {
    slaves: RwLock<Vec<Slave>>,
    jobs: mpsc::Sender<Job>,
    pending: PendingForwards,
    outbound: OutboundQueue,
    pool: WorkerPool<(TcpStream, SocketAddr)>,
    ids: IdAllocator,
    seed: u32,
}

pub struct GatewayHandle {
    pub gateway: Arc<Gateway>,
    pub addr: SocketAddr,
}

impl Gateway {
    /// Starts the accept loop, `workers` connection workers and the FIFO
    /// consumer on `listener`.
    pub fn start(listener: TcpListener, workers: usize, writers: usize) -> Result<GatewayHandle> {
        let addr = listener.local_addr()?;
        let (jobs, fifo) = mpsc::channel(FIFO_CAPACITY);
        let (pool, workers) = WorkerPool::new(workers);
        let gateway = Arc::new(Self {
            slaves: RwLock::new(Vec::new()),
            jobs,
            pending: PendingForwards::new(),
            outbound: OutboundQueue::start(writers, QUEUE_CAPACITY),
            pool,
            ids: IdAllocator::new(),
            seed: rand::random(),
        });

        for worker in workers {
            tokio::spawn(worker.run(gateway.clone()));
        }
        info!(
            "Message-queue gateway listening on {} with {} workers",
            addr,
            gateway.pool.size()
        );
        tokio::spawn(gateway.clone().consume(fifo));
        tokio::spawn(gateway.clone().accept_loop(listener));

        Ok(GatewayHandle { gateway, addr })
    }

    pub async fn live_slaves(&self) -> usize {
        self.slaves.read().await.len()
    }

    pub fn waiting(&self) -> usize {
        self.pending.len()
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok(conn) => {
                    if let Err(e) = self.pool.assign(conn).await {
                        warn!("Gateway stopped accepting: {:#}", e);
                        return;
                    }
                }
                Err(e) => {
                    warn!("Gateway accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// A slave opens with the join byte; anything else is a text client.
    async fn dispatch(self: Arc<Self>, mut stream: TcpStream, addr: SocketAddr) {
        let _ = stream.set_nodelay(true);
        let mut first = [0u8; 1];
        match stream.peek(&mut first).await {
            Ok(0) => return,
            Ok(_) if first[0] == JOIN_TAG => {
                if stream.read_exact(&mut first).await.is_ok() {
                    self.serve_slave(stream, addr).await;
                }
            }
            Ok(_) => self.serve_client(stream, addr).await,
            Err(e) => debug!("Gateway connection {} failed: {}", addr, e),
        }
    }

    async fn serve_slave(&self, stream: TcpStream, addr: SocketAddr) {
        let slave = Slave::new(self.ids.next_connection());
        let (reader, writer) = stream.into_split();
        if let Err(e) = self.outbound.register(slave.id, Box::new(writer)).await {
            warn!("Refusing slave {}: {}", addr, e);
            return;
        }

        let assignment = {
            let mut slaves = self.slaves.write().await;
            if slaves.len() >= MAX_SLAVES {
                None
            } else {
                slaves.push(slave.clone());
                Some(format_assignment(slaves.len() - 1, slaves.len()))
            }
        };
        let Some(assignment) = assignment else {
            warn!("Slave limit of {} reached, dropping {}", MAX_SLAVES, addr);
            self.outbound.close(slave.id).await;
            return;
        };

        info!("Slave {} joined from {} ({})", slave.name, addr, assignment);
        let joined = self
            .outbound
            .send_message(slave.id, Message::new(0, assignment))
            .await;

        if joined.is_ok() {
            let mut frames = FramedRead::new(reader, EnvelopeCodec::new());
            while let Some(frame) = frames.next().await {
                match frame {
                    Ok(msg) => {
                        if !self.pending.complete(msg.origin, msg.payload) {
                            debug!("Dropping late reply {} from {}", msg.origin, slave.name);
                        }
                    }
                    Err(e) => {
                        warn!("Slave {} failed: {}", slave.name, e);
                        break;
                    }
                }
            }
        }

        self.slaves.write().await.retain(|s| s.id != slave.id);
        let failed = self.pending.fail_peer(&slave.name);
        self.outbound.close(slave.id).await;
        info!(
            "Slave {} left, {} requests failed, {} slaves live",
            slave.name,
            failed,
            self.live_slaves().await
        );
    }

    async fn serve_client(&self, stream: TcpStream, addr: SocketAddr) {
        let id = self.ids.next_connection();
        let (reader, writer) = stream.into_split();
        if let Err(e) = self.outbound.register(id, Box::new(writer)).await {
            warn!("Refusing gateway client {}: {}", addr, e);
            return;
        }
        let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
        debug!("Gateway client {} connected as {}", addr, id);

        while let Some(line) = lines.next().await {
            let line = match line {
                Ok(line) => line,
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    let reply = Reply::from(KvError::Protocol("line too long".to_string()));
                    let _ = self.outbound.send(id, reply.into_bytes()).await;
                    break;
                }
                Err(LinesCodecError::Io(e)) => {
                    debug!("Gateway client {} read failed: {}", addr, e);
                    break;
                }
            };

            let reply = match parse(&line) {
                Ok(Parsed::Command(command)) => match command.routing_key() {
                    Some(key) => self.submit(id, key, line.trim()).await,
                    None => Reply::from(KvError::InvalidArgument(
                        "the gateway only accepts keyed commands".to_string(),
                    ))
                    .into_bytes(),
                },
                Ok(Parsed::Quit) => break,
                Ok(Parsed::Empty) => continue,
                Err(e) => Reply::from(e).into_bytes(),
            };

            if let Err(e) = self.outbound.send(id, reply).await {
                debug!("Dropping gateway client {}: {}", addr, e);
                break;
            }
        }
        self.outbound.close(id).await;
        debug!("Gateway client {} disconnected", addr);
    }

    /// Queues one command and waits for the slave's answer.
    pub async fn submit(&self, origin: ConnectionId, key: &str, line: &str) -> Bytes {
        let (tag, rx) = self.pending.register(origin, NodeName::from(QUEUED));
        let job = Job {
            tag,
            key: key.to_string(),
            line: line.to_string(),
        };

        if let Err(e) = self.jobs.try_send(job) {
            self.pending.cancel(tag);
            let err = match e {
                mpsc::error::TrySendError::Full(_) => KvError::Backpressure,
                mpsc::error::TrySendError::Closed(_) => KvError::RoutingUnavailable,
            };
            return Reply::from(err).into_bytes();
        }

        match tokio::time::timeout(FORWARD_TIMEOUT, rx).await {
            Ok(Ok(payload)) => payload,
            Ok(Err(_)) => Reply::from(KvError::ConnectFailure("slave".to_string())).into_bytes(),
            Err(_) => {
                self.pending.cancel(tag);
                warn!("Request {} timed out at the gateway", tag);
                Reply::from(KvError::Timeout).into_bytes()
            }
        }
    }

    /// Drains the FIFO, sending each job to the slave its key hashes to.
    async fn consume(self: Arc<Self>, mut fifo: mpsc::Receiver<Job>) {
        while let Some(job) = fifo.recv().await {
            let target = {
                let slaves = self.slaves.read().await;
                slave_index(&job.key, self.seed, slaves.len()).map(|idx| slaves[idx].clone())
            };

            let Some(slave) = target else {
                self.pending
                    .complete(job.tag, Reply::from(KvError::RoutingUnavailable).into_bytes());
                continue;
            };

            debug!("Job {} on key {} goes to {}", job.tag, job.key, slave.name);
            if !self.pending.reassign(job.tag, slave.name.clone()) {
                // The client already gave up.
                continue;
            }
            let msg = Message::new(job.tag, job.line);
            if let Err(e) = self.outbound.send_message(slave.id, msg).await {
                warn!("Could not hand job {} to {}: {}", job.tag, slave.name, e);
                self.pending.complete(job.tag, Reply::from(e).into_bytes());
            }
        }
    }
}

impl ConnectionService for Gateway {
    type Conn = (TcpStream, SocketAddr);

    fn serve(self: Arc<Self>, (stream, addr): (TcpStream, SocketAddr)) -> BoxFuture<'static, ()> {
        self.dispatch(stream, addr).boxed()
    }
}
