//! Cluster Membership Module
//!
//! Tracks the static node list and decides which node serves a key.
//!
//! ## Core Mechanisms
//! - **Node List**: Loaded once from the cluster configuration file. Node names are unique and
//!   their lexicographic order is the only input to range assignment, so every node computes the
//!   same ranges on its own.
//! - **Reachability**: A peer becomes `Reachable` when this node's outbound bus connection to it
//!   is up, and `Unreachable` again when that connection fails.
//! - **Formation Gate**: In cluster mode, commands are refused with a retryable reply until every
//!   configured node is reachable. The partition map is then computed once and never changes.
//! - **Status Surface**: `/health` and `/status` expose the node list over HTTP.

pub mod config;
pub mod handlers;
pub mod service;
pub mod types;
