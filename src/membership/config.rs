//! Static node list loader.
//!
//! One node per line: `<ip> <port> <name> <self 0|1>`. Lines starting with
//! `#` and blank lines are ignored; anything else that does not parse is
//! skipped with a warning naming its line number.

use super::types::{ClusterNode, NodeName};
use crate::config::MAX_PORT;

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::net::IpAddr;
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct NodeEntry {
    pub addr: IpAddr,
    pub port: u16,
    pub name: NodeName,
    pub is_self: bool,
}

impl NodeEntry {
    pub fn into_node(self) -> ClusterNode {
        ClusterNode::new(self.name, self.addr, self.port, self.is_self)
    }
}

pub fn load_nodes(path: &Path) -> Result<Vec<NodeEntry>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading node list {}", path.display()))?;
    Ok(parse_nodes(&text))
}

pub fn parse_nodes(text: &str) -> Vec<NodeEntry> {
    let mut entries = Vec::new();
    let mut names = HashSet::new();

    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match parse_line(line) {
            Ok(entry) => {
                if !names.insert(entry.name.clone()) {
                    tracing::warn!(
                        "Node list line {}: duplicate node name {}, skipped",
                        line_no,
                        entry.name
                    );
                    continue;
                }
                entries.push(entry);
            }
            Err(reason) => {
                tracing::warn!("Node list line {}: {}, skipped", line_no, reason);
            }
        }
    }

    entries
}

fn parse_line(line: &str) -> std::result::Result<NodeEntry, String> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let [addr, port, name, flag] = fields.as_slice() else {
        return Err(format!("expected 4 fields, found {}", fields.len()));
    };

    let addr: IpAddr = addr
        .parse()
        .map_err(|_| format!("invalid address {:?}", addr))?;
    let port: u16 = port
        .parse()
        .ok()
        .filter(|p| *p > 0 && *p <= MAX_PORT)
        .ok_or_else(|| format!("invalid port {:?}", port))?;
    let is_self = match *flag {
        "0" => false,
        "1" => true,
        other => return Err(format!("self flag must be 0 or 1, found {:?}", other)),
    };

    Ok(NodeEntry {
        addr,
        port,
        name: NodeName::from(*name),
        is_self,
    })
}

/// Name override first, then the entry flagged as self, then a random name.
pub fn resolve_identity(name_override: Option<&str>, entries: &[NodeEntry]) -> NodeName {
    if let Some(name) = name_override {
        return NodeName::from(name);
    }
    entries
        .iter()
        .find(|entry| entry.is_self)
        .map(|entry| entry.name.clone())
        .unwrap_or_else(NodeName::generate)
}

/// Splits the configured entries into the local node and its peers.
///
/// The local node always carries the address it is actually bound to, even
/// when the file lists it with a different one.
pub fn build_nodes(
    self_name: &NodeName,
    bind_addr: IpAddr,
    port: u16,
    entries: Vec<NodeEntry>,
) -> (ClusterNode, Vec<ClusterNode>) {
    let local = ClusterNode::new(self_name.clone(), bind_addr, port, true);
    let peers = entries
        .into_iter()
        .filter(|entry| &entry.name != self_name)
        .map(|mut entry| {
            entry.is_self = false;
            entry.into_node()
        })
        .collect();
    (local, peers)
}
