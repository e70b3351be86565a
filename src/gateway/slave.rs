//! Slave side of the gateway: executes the commands the gateway hands over
//! against the local keyspace and answers with the same tag.

use super::types::parse_assignment;
use crate::commands::handlers::CommandDispatcher;
use crate::commands::types::Reply;
use crate::error::KvError;
use crate::membership::types::JOIN_TAG;
use crate::transport::codec::EnvelopeCodec;
use crate::transport::peer::CONNECT_TIMEOUT;
use crate::transport::types::Message;

use anyhow::{Context, Result, anyhow};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{info, warn};

/// Serves one gateway session. Returns when the gateway closes the connection.
pub async fn run_slave(gateway: SocketAddr, dispatcher: CommandDispatcher) -> Result<()> {
    let mut stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(gateway))
        .await
        .map_err(|_| anyhow!("connect to gateway {} timed out", gateway))?
        .with_context(|| format!("connecting to gateway {}", gateway))?;
    stream.set_nodelay(true)?;
    stream.write_all(&[JOIN_TAG]).await?;

    let mut frames = Framed::new(stream, EnvelopeCodec::new());
    while let Some(frame) = frames.next().await {
        let msg = frame.context("reading from gateway")?;

        // Assignments come untagged; requests always carry a tag.
        if msg.origin == 0 {
            match parse_assignment(&msg.payload) {
                Some((index, count)) => info!("Registered as slave {} of {}", index, count),
                None => warn!("Ignoring untagged gateway message"),
            }
            continue;
        }

        let reply = match std::str::from_utf8(&msg.payload) {
            Ok(line) => dispatcher.execute_line(line).unwrap_or_else(|| {
                Reply::from(KvError::InvalidArgument(
                    "not a forwardable command".to_string(),
                ))
            }),
            Err(_) => Reply::from(KvError::Protocol("request is not UTF-8".to_string())),
        };
        frames
            .send(Message::new(msg.origin, reply.into_bytes()))
            .await
            .context("answering gateway")?;
    }

    info!("Gateway {} closed the session", gateway);
    Ok(())
}
