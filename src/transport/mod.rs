//! Network Transport Module
//!
//! Moves bytes between clients, nodes and the command dispatcher.
//!
//! ## Components
//! - **Wire Codec**: Length-prefixed envelope `{len, origin, payload}` for all inter-node traffic.
//! - **Workers**: A fixed pool of tasks; each one polls the connections assigned to it.
//! - **Outbound Queue**: Writer tasks that own every socket write half. Handlers only enqueue.
//! - **Forwarding**: Commands for keys owned elsewhere travel over the owner's link and the
//!   reply is relayed back to the waiting client, with a deadline.
//! - **Publications**: `PUB` values pushed to local subscribers, and relayed over the bus to
//!   subscribers connected to other nodes.
//! - **Peer Connector**: Links to every configured node, runs range assignment once all are up,
//!   and keeps re-linking lost peers afterwards.

pub mod client;
pub mod codec;
pub mod forward;
pub mod outbound;
pub mod peer;
pub mod pubsub;
pub mod server;
pub mod types;
pub mod worker;
