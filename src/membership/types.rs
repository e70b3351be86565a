use crate::config::BUS_PORT_OFFSET;
use crate::transport::types::ConnectionId;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Marks a join: first payload byte of a bus handshake, and the byte a
/// gateway slave opens its connection with.
pub const JOIN_TAG: u8 = b'#';

/// Unique node identity. Its ordering is the sort key used to assign ranges.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeName(pub String);

impl NodeName {
    /// Random identity for a node started without `--name` or a self entry.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for NodeName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Half-open interval `[min, max)` over the partition index space.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyRange {
    pub min: u32,
    pub max: u32,
}

impl KeyRange {
    pub fn contains(&self, partition: u32) -> bool {
        self.min <= partition && partition < self.max
    }

    pub fn len(&self) -> u32 {
        self.max.saturating_sub(self.min)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Reachability {
    Reachable,
    Unreachable,
}

/// A member of the static node list.
///
/// `link` is the outbound bus connection used to forward requests to this
/// node; it is present only while the node is `Reachable`. `range` is
/// assigned once, when formation completes.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterNode {
    pub name: NodeName,
    pub addr: IpAddr,
    pub port: u16,
    pub reachability: Reachability,
    pub is_self: bool,
    pub range: Option<KeyRange>,

    #[serde(skip)]
    pub link: Option<ConnectionId>,
}

impl ClusterNode {
    pub fn new(name: NodeName, addr: IpAddr, port: u16, is_self: bool) -> Self {
        Self {
            name,
            addr,
            port,
            // A node can always reach itself.
            reachability: if is_self {
                Reachability::Reachable
            } else {
                Reachability::Unreachable
            },
            is_self,
            range: None,
            link: None,
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.reachability == Reachability::Reachable
    }

    /// Address of the node's inter-node listener.
    pub fn bus_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.port.saturating_add(BUS_PORT_OFFSET))
    }
}

/// Handshake sent by a node right after it connects to a peer's bus port.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JoinRequest {
    pub name: NodeName,
    pub addr: IpAddr,
    pub port: u16,
}

impl JoinRequest {
    /// `JOIN_TAG` followed by the bincode body.
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let mut payload = vec![JOIN_TAG];
        payload.extend(bincode::serialize(self)?);
        Ok(payload)
    }

    pub fn decode(payload: &[u8]) -> anyhow::Result<Self> {
        match payload.split_first() {
            Some((&JOIN_TAG, body)) => Ok(bincode::deserialize(body)?),
            _ => anyhow::bail!("payload is not a join handshake"),
        }
    }
}

/// How an inbound join was classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Matches a configured node.
    Known(NodeName),
    /// Not in the static list; kept as an ingoing record only.
    Ingoing(NodeName),
    Rejected(String),
}

/// Where a command must run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Local,
    Remote { owner: NodeName, link: ConnectionId },
}

/// JSON body of `GET /status`.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterStatus {
    pub self_name: NodeName,
    pub cluster_mode: bool,
    pub forming: bool,
    pub local_keys: usize,
    pub nodes: Vec<ClusterNode>,
    pub ingoing: Vec<JoinRequest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub node: NodeName,
}
