//! Storage Engine Module
//!
//! Holds the node's local slice of the keyspace in memory.
//!
//! ## Core Concepts
//! - **Store**: An open-addressing hash table with bounded linear scanning and
//!   stop-the-world doubling once it is half full.
//! - **Keyspace**: A fixed set of `Store` shards, each behind its own lock, plus
//!   the periodic expiry sweep.
//! - **Partitioning**: `partitioner` maps keys to one of `PARTITIONS` indices with a
//!   seeded hash every node agrees on, and splits that index space into one
//!   contiguous range per node.

pub mod keyspace;
pub mod memory;
pub mod partitioner;
pub mod types;

#[cfg(test)]
mod tests;
