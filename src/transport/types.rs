use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Process-unique handle of an open connection (client, peer or slave).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u32);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic allocator for connection ids and forward tags. Zero is never
/// handed out, it marks messages that answer nobody (handshakes).
pub struct IdAllocator(AtomicU32);

impl IdAllocator {
    pub fn new() -> Self {
        Self(AtomicU32::new(1))
    }

    pub fn next(&self) -> u32 {
        loop {
            let id = self.0.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    pub fn next_connection(&self) -> ConnectionId {
        ConnectionId(self.next())
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Wire envelope: `origin` correlates a reply with whoever is waiting for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub origin: u32,
    pub payload: Bytes,
}

impl Message {
    pub fn new(origin: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            origin,
            payload: payload.into(),
        }
    }
}
