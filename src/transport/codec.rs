//! Length-prefixed envelope framing: `len: u32 LE | origin: u32 LE | payload`.

use super::types::Message;
use crate::error::KvError;

use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

pub const HEADER_LEN: usize = 8;

/// Largest accepted payload. Anything claiming more is treated as a corrupt stream.
pub const MAX_PAYLOAD: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    max_payload: usize,
}

impl EnvelopeCodec {
    pub fn new() -> Self {
        Self::with_max_payload(MAX_PAYLOAD)
    }

    pub fn with_max_payload(max_payload: usize) -> Self {
        Self { max_payload }
    }
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn protocol_error(reason: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, KvError::Protocol(reason))
}

impl Decoder for EnvelopeCodec {
    type Item = Message;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, io::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let len = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if len > self.max_payload {
            return Err(protocol_error(format!(
                "payload length {} exceeds {}",
                len, self.max_payload
            )));
        }

        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(4);
        let origin = src.get_u32_le();
        let payload = src.split_to(len).freeze();
        Ok(Some(Message { origin, payload }))
    }
}

impl Encoder<Message> for EnvelopeCodec {
    type Error = io::Error;

    fn encode(&mut self, msg: Message, dst: &mut BytesMut) -> Result<(), io::Error> {
        if msg.payload.len() > self.max_payload {
            return Err(protocol_error(format!(
                "refusing to send {} byte payload",
                msg.payload.len()
            )));
        }
        dst.reserve(HEADER_LEN + msg.payload.len());
        dst.put_u32_le(msg.payload.len() as u32);
        dst.put_u32_le(msg.origin);
        dst.extend_from_slice(&msg.payload);
        Ok(())
    }
}

/// Encodes one envelope into a standalone buffer for the outbound queue.
pub fn encode_message(msg: Message) -> Result<bytes::Bytes, KvError> {
    let mut buf = BytesMut::new();
    EnvelopeCodec::new()
        .encode(msg, &mut buf)
        .map_err(|e| KvError::Protocol(e.to_string()))?;
    Ok(buf.freeze())
}
