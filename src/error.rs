//! Error taxonomy shared by the storage engine, the dispatcher and the transport.
//!
//! Storage and routing failures never abort the process: each variant maps to a
//! single reply line sent back to the requesting connection (see
//! [`KvError::reply_line`]). Network failures close only the affected connection.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum KvError {
    /// The key is absent (or expired).
    #[error("key not found")]
    NotFound,

    /// The table could not find a slot even after growing to its maximum capacity.
    #[error("table is full")]
    Full,

    /// Growing the table failed to allocate.
    #[error("out of memory")]
    OutOfMemory,

    /// A numeric mutator found a value that does not parse as the requested kind.
    #[error("stored value is not {expected}")]
    TypeMismatch { expected: &'static str },

    /// The command line is well formed but an argument is missing or invalid.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// No node owns the computed partition.
    #[error("routing unavailable")]
    RoutingUnavailable,

    /// Commands are refused until every configured peer is reachable and ranges are assigned.
    #[error("cluster is still forming")]
    ClusterForming,

    #[error("connect failure: {0}")]
    ConnectFailure(String),

    /// Malformed wire envelope.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("request timed out")]
    Timeout,

    /// A bounded queue stayed full past its send deadline.
    #[error("queue is full")]
    Backpressure,
}

impl KvError {
    /// The status line a client receives for this error, newline included.
    pub fn reply_line(&self) -> String {
        match self {
            KvError::NotFound => "NOT FOUND\n".to_string(),
            KvError::Full | KvError::OutOfMemory => "OUT OF MEMORY\n".to_string(),
            KvError::TypeMismatch { expected } => format!("TYPE MISMATCH, NOT {}\n", expected),
            KvError::InvalidArgument(reason) => format!("ERR {}\n", reason),
            KvError::UnknownCommand(_) => "COMMAND NOT FOUND\n".to_string(),
            KvError::RoutingUnavailable => "ROUTING UNAVAILABLE\n".to_string(),
            KvError::ClusterForming => "CLUSTER FORMING, RETRY\n".to_string(),
            KvError::ConnectFailure(_) => "NODE UNREACHABLE\n".to_string(),
            KvError::Protocol(reason) => format!("ERR protocol: {}\n", reason),
            KvError::Timeout => "TIMEOUT\n".to_string(),
            KvError::Backpressure => "BUSY, RETRY\n".to_string(),
        }
    }

    /// Whether the client may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            KvError::ClusterForming
                | KvError::Backpressure
                | KvError::Timeout
                | KvError::ConnectFailure(_)
        )
    }
}

pub type KvResult<T> = std::result::Result<T, KvError>;
