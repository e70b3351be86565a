//! Message-Queue Gateway
//!
//! A single-hop fan-out in front of a set of slave nodes, separate from the
//! peer-mesh cluster.
//!
//! ## Flow
//! 1. Slaves connect and send the join byte `#`. Each one is told its slot as `#<index> <count>`.
//! 2. Clients send ordinary text commands. Every keyed command goes into a bounded FIFO.
//! 3. A consumer task hashes each queued key modulo the live slave count and
//!    hands the command to that slave over an envelope-framed link.
//! 4. The slave's reply carries the request's tag and is relayed to the client.
//!
//! Keyless commands (`COUNT`, `KEYS`, ...) have no slave to go to and are refused.

pub mod service;
pub mod slave;
pub mod types;

#[cfg(test)]
mod tests;
