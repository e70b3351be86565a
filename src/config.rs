//! Process parameters.
//!
//! [`NodeArgs`] is the raw command line; [`NodeConfig`] is the validated form
//! every subsystem reads.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

/// Inter-node traffic listens on `port + BUS_PORT_OFFSET`.
pub const BUS_PORT_OFFSET: u16 = 100;

/// Highest client port that still leaves room for the bus port.
pub const MAX_PORT: u16 = u16::MAX - BUS_PORT_OFFSET;

pub const DEFAULT_PORT: u16 = 8082;
pub const DEFAULT_GATEWAY_PORT: u16 = 9898;
pub const STATUS_PORT_OFFSET: u16 = 1000;
pub const DEFAULT_NODE_LIST: &str = ".distributed_kv";

#[derive(Parser, Debug, Clone)]
#[command(name = "distributed-kv", about = "Partitioned in-memory key-value store")]
pub struct NodeArgs {
    /// Address the client, bus and status listeners bind to.
    #[arg(long, default_value = "127.0.0.1")]
    pub bind: IpAddr,

    /// Client port. The bus listens on this port + 100.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Join the nodes listed in the node list file.
    #[arg(long)]
    pub cluster: bool,

    /// Node name, overriding the self entry of the node list.
    #[arg(long)]
    pub name: Option<String>,

    /// Node list file. Defaults to ~/.distributed_kv.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long, default_value_t = 4)]
    pub workers: usize,

    #[arg(long, default_value_t = 2)]
    pub writers: usize,

    /// HTTP status port. Defaults to port + 1000; 0 disables it.
    #[arg(long)]
    pub status_port: Option<u16>,

    /// Run the message-queue gateway instead of a store node.
    #[arg(long)]
    pub gateway: bool,

    #[arg(long, default_value_t = DEFAULT_GATEWAY_PORT)]
    pub gateway_port: u16,

    /// Run as a slave of the gateway at this address.
    #[arg(long)]
    pub slave_of: Option<SocketAddr>,

    #[arg(long, default_value = "info")]
    pub log_level: tracing::Level,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub cluster: bool,
    pub name: Option<String>,
    pub node_list: PathBuf,
    pub workers: usize,
    pub writers: usize,
    pub status_port: Option<u16>,
    pub gateway: bool,
    pub gateway_port: u16,
    pub slave_of: Option<SocketAddr>,
    pub log_level: tracing::Level,
}

impl NodeArgs {
    pub fn into_config(self) -> Result<NodeConfig> {
        if self.port > MAX_PORT {
            bail!("port {} too high, the bus port would exceed 65535 (max {})", self.port, MAX_PORT);
        }
        if self.gateway && self.slave_of.is_some() {
            bail!("--gateway and --slave-of are mutually exclusive");
        }

        let status_port = match self.status_port {
            Some(0) => None,
            Some(port) => Some(port),
            None => Some(
                self.port
                    .checked_add(STATUS_PORT_OFFSET)
                    .context("default status port overflows, pass --status-port")?,
            ),
        };

        let node_list = match self.config {
            Some(path) => path,
            None => default_node_list()?,
        };

        Ok(NodeConfig {
            bind: self.bind,
            port: self.port,
            cluster: self.cluster,
            name: self.name,
            node_list,
            workers: self.workers.max(1),
            writers: self.writers.max(1),
            status_port,
            gateway: self.gateway,
            gateway_port: self.gateway_port,
            slave_of: self.slave_of,
            log_level: self.log_level,
        })
    }
}

fn default_node_list() -> Result<PathBuf> {
    let home = std::env::var_os("HOME").context("HOME is not set, pass --config")?;
    Ok(PathBuf::from(home).join(DEFAULT_NODE_LIST))
}

impl NodeConfig {
    /// Defaults for a standalone node on `port`, used by tests and embedders.
    pub fn standalone(bind: IpAddr, port: u16) -> Self {
        Self {
            bind,
            port,
            cluster: false,
            name: None,
            node_list: PathBuf::from(DEFAULT_NODE_LIST),
            workers: 2,
            writers: 1,
            status_port: None,
            gateway: false,
            gateway_port: DEFAULT_GATEWAY_PORT,
            slave_of: None,
            log_level: tracing::Level::INFO,
        }
    }

    pub fn client_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn bus_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port + BUS_PORT_OFFSET)
    }

    pub fn status_addr(&self) -> Option<SocketAddr> {
        self.status_port.map(|port| SocketAddr::new(self.bind, port))
    }

    pub fn gateway_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.gateway_port)
    }
}
