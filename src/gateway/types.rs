use crate::membership::types::NodeName;
use crate::storage::partitioner::murmur3_32;
use crate::transport::types::ConnectionId;

/// Upper bound on registered slaves.
pub const MAX_SLAVES: usize = 32;

/// Messages the gateway holds before a full FIFO answers `BUSY, RETRY`.
pub const FIFO_CAPACITY: usize = 4096;

/// A client command waiting in the FIFO for a slave.
#[derive(Debug, Clone)]
pub struct Job {
    /// Pending-forward tag the slave's reply will carry.
    pub tag: u32,
    pub key: String,
    pub line: String,
}

/// A registered slave connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slave {
    pub id: ConnectionId,
    pub name: NodeName,
}

impl Slave {
    pub fn new(id: ConnectionId) -> Self {
        Self {
            id,
            name: NodeName(format!("slave-{}", id.0)),
        }
    }
}

/// Picks the slave for `key` among `live` slaves. Same hash family as
/// partitioning, with the gateway's own seed.
pub fn slave_index(key: &str, seed: u32, live: usize) -> Option<usize> {
    if live == 0 {
        return None;
    }
    Some(murmur3_32(key.trim().as_bytes(), seed) as usize % live)
}

/// `#<index> <count>`, sent to a slave when it joins.
pub fn format_assignment(index: usize, count: usize) -> String {
    format!("#{} {}", index, count)
}

pub fn parse_assignment(payload: &[u8]) -> Option<(usize, usize)> {
    let text = std::str::from_utf8(payload).ok()?;
    let rest = text.trim().strip_prefix('#')?;
    let (index, count) = rest.split_once(' ')?;
    let index: usize = index.parse().ok()?;
    let count: usize = count.trim().parse().ok()?;
    (index < count).then_some((index, count))
}
