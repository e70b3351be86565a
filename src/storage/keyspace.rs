//! Lock-per-shard wrapper around [`Store`].
//!
//! Keys are spread over a fixed number of independent tables by their partition
//! index, so a resize in one shard only stalls requests that hash to it.

use super::memory::Store;
use super::partitioner::partition_of;
use super::types::{EntrySnapshot, Subscriber};
use crate::error::KvResult;
use crate::transport::types::ConnectionId;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

pub const DEFAULT_SHARDS: usize = 16;
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(3);

pub struct Keyspace {
    shards: Vec<Mutex<Store>>,
}

impl Keyspace {
    pub fn new(shard_count: usize) -> Self {
        let shards = (0..shard_count.max(1))
            .map(|_| Mutex::new(Store::new()))
            .collect();
        Self { shards }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn lock(&self, idx: usize) -> MutexGuard<'_, Store> {
        self.shards[idx]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn shard_for(&self, key: &str) -> MutexGuard<'_, Store> {
        let idx = partition_of(key) as usize % self.shards.len();
        self.lock(idx)
    }

    pub fn put(&self, key: String, value: String) -> KvResult<()> {
        self.shard_for(&key).put(key, value)
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.shard_for(key).get(key).map(str::to_string)
    }

    pub fn get_entry(&self, key: &str) -> Option<EntrySnapshot> {
        let now = Instant::now();
        self.shard_for(key)
            .get_entry(key)
            .map(|entry| entry.snapshot(now))
    }

    pub fn delete(&self, key: &str) -> KvResult<()> {
        self.shard_for(key).delete(key)
    }

    pub fn add_integer(&self, key: &str, delta: i64) -> KvResult<i64> {
        self.shard_for(key).add_integer(key, delta)
    }

    pub fn add_float(&self, key: &str, delta: f64) -> KvResult<f64> {
        self.shard_for(key).add_float(key, delta)
    }

    pub fn append(&self, key: &str, suffix: &str) -> KvResult<usize> {
        self.shard_for(key).append(key, suffix)
    }

    pub fn prepend(&self, key: &str, prefix: &str) -> KvResult<usize> {
        self.shard_for(key).prepend(key, prefix)
    }

    pub fn set_expiry(&self, key: &str, expiry: Option<Duration>) -> KvResult<()> {
        self.shard_for(key).set_expiry(key, expiry)
    }

    pub fn publish(&self, key: String, value: String) -> KvResult<Vec<Subscriber>> {
        self.shard_for(&key).publish(key, value)
    }

    pub fn subscribe(&self, key: &str, subscriber: Subscriber) -> KvResult<()> {
        self.shard_for(key).subscribe(key, subscriber)
    }

    pub fn unsubscribe(&self, key: &str, subscriber: Subscriber) -> KvResult<()> {
        self.shard_for(key).unsubscribe(key, subscriber)
    }

    pub fn tail(&self, key: &str, subscriber: Subscriber, from: usize) -> KvResult<Vec<String>> {
        self.shard_for(key).tail(key, subscriber, from)
    }

    /// Forgets a closed connection in every shard.
    pub fn drop_subscriber(&self, conn: ConnectionId) -> usize {
        (0..self.shards.len())
            .map(|idx| self.lock(idx).drop_subscriber(conn))
            .sum()
    }

    /// Total live entries across all shards. Entries past their deadline do
    /// not count, whether or not the sweep has removed them yet.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        (0..self.shards.len())
            .map(|idx| self.lock(idx).live_len(now))
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visits every live entry, one shard lock at a time.
    pub fn iterate<F>(&self, mut visitor: F)
    where
        F: FnMut(&super::types::Entry),
    {
        for idx in 0..self.shards.len() {
            self.lock(idx).iterate(&mut visitor);
        }
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        self.iterate(|entry| keys.push(entry.key.clone()));
        keys
    }

    pub fn values(&self) -> Vec<String> {
        let mut values = Vec::new();
        self.iterate(|entry| values.push(entry.value.clone()));
        values
    }

    /// Values of every entry whose key satisfies `matches`.
    pub fn scan<P>(&self, matches: P) -> Vec<String>
    where
        P: Fn(&str) -> bool,
    {
        let mut values = Vec::new();
        self.iterate(|entry| {
            if matches(&entry.key) {
                values.push(entry.value.clone());
            }
        });
        values
    }

    pub fn flush(&self) {
        for idx in 0..self.shards.len() {
            self.lock(idx).release();
        }
    }

    pub fn sweep_expired(&self, now: Instant) -> usize {
        (0..self.shards.len())
            .map(|idx| self.lock(idx).remove_expired(now))
            .sum()
    }

    /// Spawns the periodic expiry sweep.
    pub fn spawn_expiry_sweeper(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let removed = self.sweep_expired(Instant::now());
                if removed > 0 {
                    tracing::debug!("Expiry sweep removed {} entries", removed);
                }
            }
        })
    }
}

impl Default for Keyspace {
    fn default() -> Self {
        Self::new(DEFAULT_SHARDS)
    }
}
