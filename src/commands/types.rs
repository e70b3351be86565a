use crate::error::KvError;
use crate::storage::types::Subscriber;

use bytes::Bytes;

/// A parsed client command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    // Mutations
    Set { key: String, value: String },
    Del { keys: Vec<String> },
    /// Sets the value and pushes it to the key's subscribers.
    Pub { key: String, value: String },
    Inc { key: String, by: Option<i64> },
    Dec { key: String, by: Option<i64> },
    Incf { key: String, by: Option<f64> },
    Decf { key: String, by: Option<f64> },
    Append { key: String, value: String },
    Prepend { key: String, value: String },
    /// `millis == 0` clears the expiry.
    Expire { key: String, millis: u64 },

    // Queries
    Get { key: String },
    GetP { key: String },
    Ttl { key: String },
    PrefScan { prefix: String },
    FuzzyScan { pattern: String },
    Sub { keys: Vec<String> },
    Unsub { keys: Vec<String> },
    /// Subscribes and replays the publish history from position `from`.
    Tail { key: String, from: usize },

    // Enumerations
    Count,
    Keys,
    Values,

    // Service
    Flush,
}

/// The verb table a command belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Mutation,
    Query,
    Enumeration,
    Service,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Set { .. }
            | Command::Del { .. }
            | Command::Pub { .. }
            | Command::Inc { .. }
            | Command::Dec { .. }
            | Command::Incf { .. }
            | Command::Decf { .. }
            | Command::Append { .. }
            | Command::Prepend { .. }
            | Command::Expire { .. } => CommandKind::Mutation,
            Command::Get { .. }
            | Command::GetP { .. }
            | Command::Ttl { .. }
            | Command::PrefScan { .. }
            | Command::FuzzyScan { .. }
            | Command::Sub { .. }
            | Command::Unsub { .. }
            | Command::Tail { .. } => CommandKind::Query,
            Command::Count | Command::Keys | Command::Values => CommandKind::Enumeration,
            Command::Flush => CommandKind::Service,
        }
    }

    /// The key that decides which node runs the command. `None` for commands
    /// that act on the receiving node's whole keyspace. A multi-key `DEL` is
    /// routed by its first key.
    pub fn routing_key(&self) -> Option<&str> {
        match self {
            Command::Set { key, .. }
            | Command::Pub { key, .. }
            | Command::Tail { key, .. }
            | Command::Inc { key, .. }
            | Command::Dec { key, .. }
            | Command::Incf { key, .. }
            | Command::Decf { key, .. }
            | Command::Append { key, .. }
            | Command::Prepend { key, .. }
            | Command::Expire { key, .. }
            | Command::Get { key }
            | Command::GetP { key }
            | Command::Ttl { key } => Some(key),
            Command::Del { keys } | Command::Sub { keys } | Command::Unsub { keys } => {
                keys.first().map(String::as_str)
            }
            Command::PrefScan { .. }
            | Command::FuzzyScan { .. }
            | Command::Count
            | Command::Keys
            | Command::Values
            | Command::Flush => None,
        }
    }

    /// Commands that register the caller for later pushes.
    pub fn is_subscription(&self) -> bool {
        matches!(
            self,
            Command::Sub { .. } | Command::Unsub { .. } | Command::Tail { .. }
        )
    }
}

/// Outcome of parsing one request line.
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    Command(Command),
    /// `QUIT` or `EXIT`: close the connection.
    Quit,
    /// Blank line, ignored.
    Empty,
}

/// Result of executing a command, rendered as newline-terminated text.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Ok,
    Value(String),
    Integer(i64),
    Lines(Vec<String>),
    Error(KvError),
}

impl Reply {
    pub fn render(&self) -> String {
        match self {
            Reply::Ok => "OK\n".to_string(),
            Reply::Value(value) => format!("{}\n", value),
            Reply::Integer(n) => format!("{}\n", n),
            Reply::Lines(lines) => {
                let mut out = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
                for line in lines {
                    out.push_str(line);
                    out.push('\n');
                }
                out
            }
            Reply::Error(e) => e.reply_line(),
        }
    }

    pub fn into_bytes(self) -> Bytes {
        Bytes::from(self.render())
    }
}

impl From<KvError> for Reply {
    fn from(e: KvError) -> Self {
        Reply::Error(e)
    }
}

/// A value to push to the subscribers of the key it was published on.
#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    pub value: String,
    pub subscribers: Vec<Subscriber>,
}

/// The reply to a command, plus anything it published.
#[derive(Debug, Clone, PartialEq)]
pub struct Executed {
    pub reply: Reply,
    pub publication: Option<Publication>,
}

impl From<Reply> for Executed {
    fn from(reply: Reply) -> Self {
        Self {
            reply,
            publication: None,
        }
    }
}
