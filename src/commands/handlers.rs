use super::parser::parse;
use super::types::{Command, Executed, Parsed, Publication, Reply};
use crate::error::{KvError, KvResult};
use crate::storage::keyspace::Keyspace;
use crate::storage::types::Subscriber;

use std::sync::Arc;
use std::time::Duration;

/// Executes parsed commands against the local keyspace. Routing is decided
/// before a command gets here.
#[derive(Clone)]
pub struct CommandDispatcher {
    keyspace: Arc<Keyspace>,
}

impl CommandDispatcher {
    pub fn new(keyspace: Arc<Keyspace>) -> Self {
        Self { keyspace }
    }

    /// Parses and runs one line. `None` means the client asked to quit.
    pub fn execute_line(&self, line: &str) -> Option<Reply> {
        match parse(line) {
            Ok(Parsed::Command(command)) => Some(self.execute(command)),
            Ok(Parsed::Quit) => None,
            Ok(Parsed::Empty) => Some(Reply::Error(KvError::InvalidArgument(
                "empty command".to_string(),
            ))),
            Err(e) => Some(Reply::Error(e)),
        }
    }

    pub fn execute(&self, command: Command) -> Reply {
        self.execute_for(command, None).reply
    }

    /// Runs `command` on behalf of `caller`, the address later pushes for
    /// `SUB`/`TAIL` go to. Without a caller, subscriptions are refused.
    pub fn execute_for(&self, command: Command, caller: Option<Subscriber>) -> Executed {
        tracing::trace!("Executing {:?}", command);
        self.run(command, caller)
            .unwrap_or_else(|e| Executed::from(Reply::Error(e)))
    }

    fn run(&self, command: Command, caller: Option<Subscriber>) -> KvResult<Executed> {
        let ks = &self.keyspace;
        let reply = match command {
            Command::Set { key, value } => {
                ks.put(key, value)?;
                Reply::Ok
            }
            Command::Del { keys } => {
                let removed = keys.iter().filter(|key| ks.delete(key).is_ok()).count();
                if removed == 0 {
                    return Err(KvError::NotFound);
                }
                Reply::Ok
            }
            Command::Pub { key, value } => {
                let subscribers = ks.publish(key, value.clone())?;
                let publication = (!subscribers.is_empty()).then_some(Publication {
                    value,
                    subscribers,
                });
                return Ok(Executed {
                    reply: Reply::Ok,
                    publication,
                });
            }
            Command::Inc { key, by } => {
                ks.add_integer(&key, by.unwrap_or(1))?;
                Reply::Ok
            }
            Command::Dec { key, by } => {
                let delta = by
                    .unwrap_or(1)
                    .checked_neg()
                    .ok_or_else(|| KvError::InvalidArgument("amount out of range".to_string()))?;
                ks.add_integer(&key, delta)?;
                Reply::Ok
            }
            Command::Incf { key, by } => {
                ks.add_float(&key, by.unwrap_or(1.0))?;
                Reply::Ok
            }
            Command::Decf { key, by } => {
                ks.add_float(&key, -by.unwrap_or(1.0))?;
                Reply::Ok
            }
            Command::Append { key, value } => {
                ks.append(&key, &value)?;
                Reply::Ok
            }
            Command::Prepend { key, value } => {
                ks.prepend(&key, &value)?;
                Reply::Ok
            }
            Command::Expire { key, millis } => {
                let expiry = (millis > 0).then(|| Duration::from_millis(millis));
                ks.set_expiry(&key, expiry)?;
                Reply::Ok
            }

            Command::Get { key } => ks.get(&key).map(Reply::Value).ok_or(KvError::NotFound)?,
            Command::GetP { key } => {
                let entry = ks.get_entry(&key).ok_or(KvError::NotFound)?;
                let expire_time = entry
                    .expiry_ms
                    .map(|ms| ms.to_string())
                    .unwrap_or_else(|| "-1".to_string());
                Reply::Lines(vec![
                    format!("key: {}", entry.key),
                    format!("value: {}", entry.value),
                    format!("creation_time: {}", entry.created_at_ms),
                    format!("expire_time: {}", expire_time),
                ])
            }
            Command::Ttl { key } => {
                let entry = ks.get_entry(&key).ok_or(KvError::NotFound)?;
                let ttl = entry
                    .remaining_ms
                    .map(|ms| (ms / 1000) as i64)
                    .unwrap_or(-1);
                Reply::Integer(ttl)
            }
            Command::PrefScan { prefix } => {
                non_empty(ks.scan(|key| key.starts_with(prefix.as_str())))?
            }
            Command::FuzzyScan { pattern } => {
                non_empty(ks.scan(|key| fuzzy_match(&pattern, key)))?
            }
            Command::Sub { keys } => {
                let caller = subscriber(caller)?;
                let subscribed = keys
                    .iter()
                    .filter(|key| ks.subscribe(key, caller).is_ok())
                    .count();
                if subscribed == 0 {
                    return Err(KvError::NotFound);
                }
                Reply::Ok
            }
            Command::Unsub { keys } => {
                let caller = subscriber(caller)?;
                let found = keys
                    .iter()
                    .filter(|key| ks.unsubscribe(key, caller).is_ok())
                    .count();
                if found == 0 {
                    return Err(KvError::NotFound);
                }
                Reply::Ok
            }
            Command::Tail { key, from } => {
                let values = ks.tail(&key, subscriber(caller)?, from)?;
                // Count first, so the client knows how many replayed lines follow.
                let mut lines = Vec::with_capacity(values.len() + 1);
                lines.push(values.len().to_string());
                lines.extend(values);
                Reply::Lines(lines)
            }

            Command::Count => Reply::Integer(ks.len() as i64),
            Command::Keys => non_empty(ks.keys())?,
            Command::Values => non_empty(ks.values())?,

            Command::Flush => {
                ks.flush();
                tracing::info!("Keyspace flushed");
                Reply::Ok
            }
        };
        Ok(Executed::from(reply))
    }
}

fn subscriber(caller: Option<Subscriber>) -> KvResult<Subscriber> {
    caller.ok_or_else(|| {
        KvError::InvalidArgument("subscriptions need a client connection".to_string())
    })
}

fn non_empty(lines: Vec<String>) -> KvResult<Reply> {
    if lines.is_empty() {
        return Err(KvError::NotFound);
    }
    Ok(Reply::Lines(lines))
}

/// True when every character of `pattern` appears in `key`, in order.
pub fn fuzzy_match(pattern: &str, key: &str) -> bool {
    let mut chars = key.chars();
    pattern.chars().all(|p| chars.any(|c| c == p))
}
