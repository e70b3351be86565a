use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::Notify;
use tracing::info;

use super::types::{
    ClusterNode, ClusterStatus, JoinOutcome, JoinRequest, NodeName, Reachability, Route,
};
use crate::error::{KvError, KvResult};
use crate::storage::partitioner::{PartitionMap, partition_of};
use crate::transport::types::ConnectionId;

/// Shared cluster state: the static node list, the formation gate and the
/// partition map computed once the gate opens.
pub struct Cluster {
    pub self_name: NodeName,
    pub cluster_mode: bool,

    /// Configured nodes (self included), keyed by name.
    pub nodes: Arc<DashMap<NodeName, ClusterNode>>,

    /// Inbound joins from names that are not in the static list.
    ingoing: DashMap<NodeName, JoinRequest>,

    /// Set while formation is in progress. Commands are refused meanwhile.
    forming: AtomicBool,

    router: OnceLock<PartitionMap>,

    /// Wakes the peer connector ahead of its next backoff tick.
    wakeup: Notify,
}

impl Cluster {
    /// Builds the cluster view. Outside cluster mode the local node owns the
    /// whole partition space right away and the gate never closes.
    pub fn new(local: ClusterNode, peers: Vec<ClusterNode>, cluster_mode: bool) -> Arc<Self> {
        let self_name = local.name.clone();
        let nodes = Arc::new(DashMap::new());
        nodes.insert(local.name.clone(), local);
        if cluster_mode {
            for peer in peers {
                nodes.insert(peer.name.clone(), peer);
            }
        }

        let cluster = Arc::new(Self {
            self_name,
            cluster_mode,
            nodes,
            ingoing: DashMap::new(),
            forming: AtomicBool::new(cluster_mode),
            router: OnceLock::new(),
            wakeup: Notify::new(),
        });

        if !cluster_mode {
            cluster.install_ranges();
        }
        cluster
    }

    pub fn is_forming(&self) -> bool {
        self.forming.load(Ordering::Acquire)
    }

    pub fn router(&self) -> Option<&PartitionMap> {
        self.router.get()
    }

    /// Decides where a command on `key` runs. Keyless commands always run locally.
    pub fn route(&self, key: Option<&str>) -> KvResult<Route> {
        if self.is_forming() {
            return Err(KvError::ClusterForming);
        }
        let Some(key) = key else {
            return Ok(Route::Local);
        };
        if !self.cluster_mode {
            return Ok(Route::Local);
        }

        let router = self.router.get().ok_or(KvError::RoutingUnavailable)?;
        let owner = router
            .owner_of(partition_of(key))
            .ok_or(KvError::RoutingUnavailable)?;
        if *owner == self.self_name {
            return Ok(Route::Local);
        }

        let node = self
            .nodes
            .get(owner)
            .ok_or(KvError::RoutingUnavailable)?;
        match (node.reachability, node.link) {
            (Reachability::Reachable, Some(link)) => Ok(Route::Remote {
                owner: owner.clone(),
                link,
            }),
            _ => Err(KvError::ConnectFailure(owner.to_string())),
        }
    }

    /// Whether the local node owns `key`. Used for requests that arrive from
    /// a peer, which are never forwarded a second time.
    pub fn owns(&self, key: &str) -> KvResult<bool> {
        if self.is_forming() {
            return Err(KvError::ClusterForming);
        }
        let router = self.router.get().ok_or(KvError::RoutingUnavailable)?;
        Ok(router.owner_of_key(key) == Some(&self.self_name))
    }

    /// Classifies an inbound join handshake.
    pub fn handle_join(&self, join: JoinRequest, peer_ip: IpAddr) -> JoinOutcome {
        if join.name == self.self_name {
            return JoinOutcome::Rejected(format!("{} is this node's own name", join.name));
        }

        if let Some(node) = self.nodes.get(&join.name) {
            if node.port != join.port {
                return JoinOutcome::Rejected(format!(
                    "{} announced port {}, configured {}",
                    join.name, join.port, node.port
                ));
            }
            info!("Node {} joined from {}", join.name, peer_ip);
            let name = join.name.clone();
            drop(node);
            // The peer is up: try our side of the link now instead of waiting.
            self.wakeup.notify_one();
            return JoinOutcome::Known(name);
        }

        info!(
            "Unconfigured node {} joined from {} (port {}), kept as ingoing",
            join.name, peer_ip, join.port
        );
        let name = join.name.clone();
        self.ingoing.insert(join.name.clone(), join);
        JoinOutcome::Ingoing(name)
    }

    pub fn forget_ingoing(&self, name: &NodeName) {
        self.ingoing.remove(name);
    }

    pub fn mark_reachable(&self, name: &NodeName, link: ConnectionId) {
        if let Some(mut node) = self.nodes.get_mut(name) {
            node.reachability = Reachability::Reachable;
            node.link = Some(link);
            info!("Node {} reachable", name);
        }
    }

    /// Drops the node's link. Returns the link it had, if any.
    pub fn mark_unreachable(&self, name: &NodeName) -> Option<ConnectionId> {
        let mut node = self.nodes.get_mut(name)?;
        if node.is_self {
            return None;
        }
        if node.reachability == Reachability::Reachable {
            tracing::warn!("Node {} unreachable", name);
        }
        node.reachability = Reachability::Unreachable;
        let link = node.link.take();
        drop(node);
        self.wakeup.notify_one();
        link
    }

    /// Peers the connector still has to reach.
    pub fn unreachable_peers(&self) -> Vec<ClusterNode> {
        self.nodes
            .iter()
            .filter(|entry| !entry.value().is_self && !entry.value().is_reachable())
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn all_reachable(&self) -> bool {
        self.nodes.iter().all(|entry| entry.value().is_reachable())
    }

    pub fn reachable_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|entry| entry.value().is_reachable())
            .count()
    }

    pub fn link_of(&self, name: &NodeName) -> Option<ConnectionId> {
        self.nodes.get(name).and_then(|node| node.link)
    }

    /// Runs `balance` and opens the gate, exactly once and only after every
    /// configured node is reachable. Returns whether this call completed it.
    pub fn try_complete_formation(&self) -> bool {
        if !self.is_forming() || !self.all_reachable() {
            return false;
        }
        if !self.install_ranges() {
            return false;
        }
        self.forming.store(false, Ordering::Release);
        info!(
            "Cluster formed: {} nodes, ranges assigned",
            self.nodes.len()
        );
        true
    }

    fn install_ranges(&self) -> bool {
        let names: Vec<NodeName> = self.nodes.iter().map(|entry| entry.key().clone()).collect();
        let map = PartitionMap::balance(names);
        if self.router.set(map).is_err() {
            return false;
        }

        let Some(map) = self.router.get() else {
            return false;
        };
        for (range, name) in map.entries() {
            if let Some(mut node) = self.nodes.get_mut(name) {
                node.range = Some(*range);
                tracing::debug!("Node {} owns [{}, {})", name, range.min, range.max);
            }
        }
        true
    }

    /// Resolves when the connector should run ahead of schedule.
    pub async fn wakeup(&self) {
        self.wakeup.notified().await;
    }

    pub fn status(&self, local_keys: usize) -> ClusterStatus {
        let mut nodes: Vec<ClusterNode> = self
            .nodes
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name));

        ClusterStatus {
            self_name: self.self_name.clone(),
            cluster_mode: self.cluster_mode,
            forming: self.is_forming(),
            local_keys,
            nodes,
            ingoing: self
                .ingoing
                .iter()
                .map(|entry| entry.value().clone())
                .collect(),
        }
    }
}
