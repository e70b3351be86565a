use crate::transport::types::ConnectionId;

use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Where published values for a key are pushed.
///
/// A client connected to this node is addressed by its connection alone
/// (`tag == 0`) and receives plain lines. A subscription made through a peer
/// is addressed by the peer's bus connection plus the tag that peer uses for
/// the client, and receives enveloped messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscriber {
    pub conn: ConnectionId,
    pub tag: u32,
}

impl Subscriber {
    pub fn client(conn: ConnectionId) -> Self {
        Self { conn, tag: 0 }
    }

    pub fn relayed(conn: ConnectionId, tag: u32) -> Self {
        Self { conn, tag }
    }
}

/// A live key-value pair with its timestamps.
///
/// `created` is the monotonic origin used for expiry; `created_at_ms` is the
/// wall-clock twin reported by `GETP`.
#[derive(Debug, Clone)]
pub struct Entry {
    pub key: String,
    pub value: String,
    pub created: Instant,
    pub created_at_ms: u64,
    /// `None` means the entry never expires.
    pub expiry: Option<Duration>,
    pub subscribers: Vec<Subscriber>,
    /// Values published with `PUB`, oldest first.
    pub history: VecDeque<String>,
}

impl Entry {
    pub fn new(key: String, value: String) -> Self {
        Self {
            key,
            value,
            created: Instant::now(),
            created_at_ms: now_ms(),
            expiry: None,
            subscribers: Vec::new(),
            history: VecDeque::new(),
        }
    }

    pub fn has_expiry(&self) -> bool {
        self.expiry.is_some()
    }

    /// Restarts the entry's clock after a value overwrite.
    pub fn touch(&mut self) {
        self.created = Instant::now();
        self.created_at_ms = now_ms();
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        match self.expiry {
            Some(ttl) => now.saturating_duration_since(self.created) >= ttl,
            None => false,
        }
    }

    /// Remaining lifetime, `None` when the entry has no expiry.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.expiry
            .map(|ttl| ttl.saturating_sub(now.saturating_duration_since(self.created)))
    }

    pub fn snapshot(&self, now: Instant) -> EntrySnapshot {
        EntrySnapshot {
            key: self.key.clone(),
            value: self.value.clone(),
            created_at_ms: self.created_at_ms,
            expiry_ms: self.expiry.map(|ttl| ttl.as_millis() as u64),
            remaining_ms: self.remaining(now).map(|left| left.as_millis() as u64),
        }
    }
}

/// Detached copy of an entry handed out by `get_entry`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntrySnapshot {
    pub key: String,
    pub value: String,
    pub created_at_ms: u64,
    pub expiry_ms: Option<u64>,
    pub remaining_ms: Option<u64>,
}

/// Helper to get the current system time in milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
