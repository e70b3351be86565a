//! Open-addressing hash table holding the local key-value pairs.
//!
//! Slots are scanned linearly for at most [`MAX_CHAIN_LENGTH`] positions. The
//! table doubles (stop-the-world, full rehash) whenever an insert would push the
//! element count past half of the capacity or no free slot is found within the
//! chain bound. Callers serialize access: a `Store` is always reached through a
//! shard lock in [`super::keyspace::Keyspace`].

use super::types::{Entry, Subscriber};
use crate::error::{KvError, KvResult};
use crate::transport::types::ConnectionId;

use std::time::{Duration, Instant};

pub const INITIAL_CAPACITY: usize = 64;
pub const MAX_CHAIN_LENGTH: usize = 8;
pub const MAX_CAPACITY: usize = 1 << 30;
/// Published values kept per key for `TAIL`; the oldest is dropped first.
pub const HISTORY_LIMIT: usize = 1024;

/// Slot-selection hash: CRC32 of the key, Jenkins' 32-bit avalanche mix, then
/// Knuth's multiplicative step, reduced modulo `capacity`.
///
/// Independent from the partition hash in [`super::partitioner`].
pub fn slot_hash(key: &str, capacity: usize) -> usize {
    let mut h = crc32fast::hash(key.as_bytes());

    h = h.wrapping_add(h << 12);
    h ^= h >> 22;
    h = h.wrapping_add(h << 4);
    h ^= h >> 9;
    h = h.wrapping_add(h << 10);
    h ^= h >> 2;
    h = h.wrapping_add(h << 7);
    h ^= h >> 12;

    let mixed = u64::from(h >> 3).wrapping_mul(2_654_435_761);
    (mixed % capacity as u64) as usize
}

enum Lookup {
    Existing(usize),
    Vacant(usize),
    Exhausted,
}

pub struct Store {
    slots: Vec<Option<Entry>>,
    len: usize,
}

impl Store {
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_CAPACITY)
    }

    /// Creates an empty table. `capacity` is rounded up to at least 2 slots.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots, len: 0 }
    }

    /// Occupied slots, expired entries the sweep has not reached included.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Entries still within their deadline at `now`.
    pub fn live_len(&self, now: Instant) -> usize {
        self.slots
            .iter()
            .flatten()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn lookup(&self, key: &str) -> Lookup {
        let capacity = self.capacity();
        let mut idx = slot_hash(key, capacity);
        let mut vacant = None;

        for _ in 0..MAX_CHAIN_LENGTH.min(capacity) {
            match &self.slots[idx] {
                Some(entry) if entry.key == key => return Lookup::Existing(idx),
                Some(_) => {}
                None => {
                    if vacant.is_none() {
                        vacant = Some(idx);
                    }
                }
            }
            idx = (idx + 1) % capacity;
        }

        match vacant {
            Some(idx) => Lookup::Vacant(idx),
            None => Lookup::Exhausted,
        }
    }

    fn find(&self, key: &str) -> Option<usize> {
        match self.lookup(key) {
            Lookup::Existing(idx) => Some(idx),
            _ => None,
        }
    }

    /// Index of `key` if it is present and not past its deadline.
    fn live_index(&self, key: &str, now: Instant) -> Option<usize> {
        let idx = self.find(key)?;
        match &self.slots[idx] {
            Some(entry) if !entry.is_expired(now) => Some(idx),
            _ => None,
        }
    }

    fn live_mut(&mut self, key: &str) -> KvResult<&mut Entry> {
        let idx = self
            .live_index(key, Instant::now())
            .ok_or(KvError::NotFound)?;
        self.slots[idx].as_mut().ok_or(KvError::NotFound)
    }

    /// Inserts or overwrites `key`. An overwrite keeps the entry's expiry and
    /// restarts its creation clock; an entry already past its deadline is
    /// replaced by a fresh one without expiry.
    pub fn put(&mut self, key: String, value: String) -> KvResult<()> {
        self.upsert(key, value).map(|_| ())
    }

    /// Sets `key` like [`Store::put`] and records the value in its publish
    /// history. Returns the subscribers to notify.
    pub fn publish(&mut self, key: String, value: String) -> KvResult<Vec<Subscriber>> {
        let idx = self.upsert(key, value)?;
        let Some(entry) = self.slots[idx].as_mut() else {
            return Ok(Vec::new());
        };
        if entry.history.len() == HISTORY_LIMIT {
            entry.history.pop_front();
        }
        entry.history.push_back(entry.value.clone());
        Ok(entry.subscribers.clone())
    }

    fn upsert(&mut self, key: String, value: String) -> KvResult<usize> {
        loop {
            match self.lookup(&key) {
                Lookup::Existing(idx) => {
                    let now = Instant::now();
                    let live = self.slots[idx]
                        .as_ref()
                        .is_some_and(|entry| !entry.is_expired(now));
                    if !live {
                        self.slots[idx] = Some(Entry::new(key, value));
                    } else if let Some(entry) = self.slots[idx].as_mut() {
                        entry.value = value;
                        entry.touch();
                    }
                    return Ok(idx);
                }
                Lookup::Vacant(idx) if (self.len + 1) * 2 <= self.capacity() => {
                    self.slots[idx] = Some(Entry::new(key, value));
                    self.len += 1;
                    return Ok(idx);
                }
                _ => self.grow()?,
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.get_entry(key).map(|entry| entry.value.as_str())
    }

    pub fn get_entry(&self, key: &str) -> Option<&Entry> {
        let idx = self.live_index(key, Instant::now())?;
        self.slots[idx].as_ref()
    }

    /// Removes `key`; its slot is immediately reusable.
    pub fn delete(&mut self, key: &str) -> KvResult<()> {
        let idx = self.find(key).ok_or(KvError::NotFound)?;
        let expired = self.slots[idx]
            .as_ref()
            .map(|entry| entry.is_expired(Instant::now()))
            .unwrap_or(true);

        self.slots[idx] = None;
        self.len -= 1;

        if expired {
            return Err(KvError::NotFound);
        }
        Ok(())
    }

    /// Visits every live entry in slot order.
    pub fn iterate<F>(&self, mut visitor: F)
    where
        F: FnMut(&Entry),
    {
        let now = Instant::now();
        self.slots
            .iter()
            .flatten()
            .filter(|entry| !entry.is_expired(now))
            .for_each(|entry| visitor(entry));
    }

    /// Drops every entry and shrinks back to the initial capacity.
    pub fn release(&mut self) {
        *self = Self::new();
    }

    /// Deletes every entry whose deadline is at or before `now`.
    pub fn remove_expired(&mut self, now: Instant) -> usize {
        let mut removed = 0;
        for slot in self.slots.iter_mut() {
            if slot.as_ref().is_some_and(|entry| entry.is_expired(now)) {
                *slot = None;
                removed += 1;
            }
        }
        self.len -= removed;
        removed
    }

    pub fn add_integer(&mut self, key: &str, delta: i64) -> KvResult<i64> {
        let entry = self.live_mut(key)?;
        let current: i64 = entry
            .value
            .trim()
            .parse()
            .map_err(|_| KvError::TypeMismatch { expected: "an integer" })?;
        let updated = current
            .checked_add(delta)
            .ok_or_else(|| KvError::InvalidArgument("integer overflow".to_string()))?;
        entry.value = updated.to_string();
        Ok(updated)
    }

    pub fn add_float(&mut self, key: &str, delta: f64) -> KvResult<f64> {
        let entry = self.live_mut(key)?;
        let current = entry
            .value
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or(KvError::TypeMismatch { expected: "a float" })?;
        let updated = current + delta;
        if !updated.is_finite() {
            return Err(KvError::InvalidArgument("float overflow".to_string()));
        }
        entry.value = updated.to_string();
        Ok(updated)
    }

    pub fn append(&mut self, key: &str, suffix: &str) -> KvResult<usize> {
        let entry = self.live_mut(key)?;
        entry.value.push_str(suffix);
        Ok(entry.value.len())
    }

    pub fn prepend(&mut self, key: &str, prefix: &str) -> KvResult<usize> {
        let entry = self.live_mut(key)?;
        entry.value.insert_str(0, prefix);
        Ok(entry.value.len())
    }

    /// Adds `subscriber` to the entry's subscribers, once.
    pub fn subscribe(&mut self, key: &str, subscriber: Subscriber) -> KvResult<()> {
        let entry = self.live_mut(key)?;
        if !entry.subscribers.contains(&subscriber) {
            entry.subscribers.push(subscriber);
        }
        Ok(())
    }

    pub fn unsubscribe(&mut self, key: &str, subscriber: Subscriber) -> KvResult<()> {
        let entry = self.live_mut(key)?;
        entry.subscribers.retain(|s| *s != subscriber);
        Ok(())
    }

    /// Subscribes and returns the published values from position `from` on.
    pub fn tail(&mut self, key: &str, subscriber: Subscriber, from: usize) -> KvResult<Vec<String>> {
        self.subscribe(key, subscriber)?;
        let entry = self.live_mut(key)?;
        Ok(entry.history.iter().skip(from).cloned().collect())
    }

    /// Removes every subscription held by connection `conn`.
    pub fn drop_subscriber(&mut self, conn: ConnectionId) -> usize {
        let mut dropped = 0;
        for entry in self.slots.iter_mut().flatten() {
            let before = entry.subscribers.len();
            entry.subscribers.retain(|s| s.conn != conn);
            dropped += before - entry.subscribers.len();
        }
        dropped
    }

    /// Sets the expiry duration measured from the entry's creation; `None` clears it.
    pub fn set_expiry(&mut self, key: &str, expiry: Option<Duration>) -> KvResult<()> {
        let entry = self.live_mut(key)?;
        entry.expiry = expiry;
        Ok(())
    }

    fn grow(&mut self) -> KvResult<()> {
        let mut capacity = self.capacity().saturating_mul(2);
        loop {
            if capacity > MAX_CAPACITY {
                return Err(KvError::Full);
            }
            if let Some(slots) = self.rehash_into(capacity)? {
                tracing::debug!(
                    "Resized table {} -> {} slots ({} entries)",
                    self.capacity(),
                    capacity,
                    self.len
                );
                self.slots = slots;
                return Ok(());
            }
            capacity = capacity.saturating_mul(2);
        }
    }

    /// Moves every live entry into a fresh table of `capacity` slots. Returns
    /// `None`, leaving `self` untouched, when some key cannot be placed within
    /// the chain bound.
    fn rehash_into(&mut self, capacity: usize) -> KvResult<Option<Vec<Option<Entry>>>> {
        let mut slots: Vec<Option<Entry>> = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|_| KvError::OutOfMemory)?;
        slots.resize_with(capacity, || None);

        let mut taken = vec![false; capacity];
        let mut moves = Vec::with_capacity(self.len);

        for (old_idx, slot) in self.slots.iter().enumerate() {
            let Some(entry) = slot else { continue };
            let mut idx = slot_hash(&entry.key, capacity);
            let mut placed = None;
            for _ in 0..MAX_CHAIN_LENGTH.min(capacity) {
                if !taken[idx] {
                    placed = Some(idx);
                    break;
                }
                idx = (idx + 1) % capacity;
            }
            match placed {
                Some(new_idx) => {
                    taken[new_idx] = true;
                    moves.push((old_idx, new_idx));
                }
                None => return Ok(None),
            }
        }

        for (old_idx, new_idx) in moves {
            slots[new_idx] = self.slots[old_idx].take();
        }
        Ok(Some(slots))
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}
