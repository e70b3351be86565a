//! Distributed Key-Value Store Library
//!
//! This library crate defines the modules that make up a store node. It serves
//! as the foundation for the binary executable (`main.rs`).
//!
//! ## Architecture Modules
//!
//! - **`storage`**: The local data layer. An open-addressing hash table with lazy expiry,
//!   sharded into a `Keyspace`, plus the partition hash that maps keys to owners.
//! - **`membership`**: The cluster coordination layer. Static node list, reachability,
//!   one-shot range assignment at formation, and the HTTP status surface.
//! - **`commands`**: The text protocol. Verb tables, argument parsing and the
//!   dispatcher that runs commands against the keyspace.
//! - **`transport`**: The network layer. Worker pool, outbound writers, the envelope
//!   codec for bus traffic, forwarding to key owners and the peer connector.
//! - **`gateway`**: A message-queue gateway that fans keyed commands out to slaves.
//! - **`config`** / **`error`**: Command-line configuration and the error type that
//!   maps every failure to a reply line.

pub mod commands;
pub mod config;
pub mod error;
pub mod gateway;
pub mod membership;
pub mod storage;
pub mod transport;
