use crate::membership::types::{KeyRange, NodeName};

/// Size of the fixed partition index space shared by every node.
pub const PARTITIONS: u32 = 8192;

/// Fixed across builds and processes: every node must agree on key ownership.
pub const PARTITION_SEED: u32 = 0x9747_b28c;

/// MurmurHash3, x86 32-bit variant.
pub fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let mut h = seed;
    let mut chunks = data.chunks_exact(4);

    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(C1);
        k = k.rotate_left(15);
        k = k.wrapping_mul(C2);

        h ^= k;
        h = h.rotate_left(13);
        h = h.wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut k: u32 = 0;
        for (i, byte) in tail.iter().enumerate() {
            k |= u32::from(*byte) << (8 * i);
        }
        k = k.wrapping_mul(C1);
        k = k.rotate_left(15);
        k = k.wrapping_mul(C2);
        h ^= k;
    }

    h ^= data.len() as u32;
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

/// Partition index of `key` in `[0, PARTITIONS)`. Surrounding whitespace is ignored.
pub fn partition_of(key: &str) -> u32 {
    murmur3_32(key.trim().as_bytes(), PARTITION_SEED) % PARTITIONS
}

/// Splits `[0, PARTITIONS)` into `count` contiguous, near-equal ranges. The
/// first `PARTITIONS % count` ranges are one index wider.
pub fn assign_ranges(count: usize) -> Vec<KeyRange> {
    if count == 0 {
        return vec![];
    }
    let count = count as u32;
    let base = PARTITIONS / count;
    let extra = PARTITIONS % count;

    let mut ranges = Vec::with_capacity(count as usize);
    let mut min = 0;
    for i in 0..count {
        let width = base + u32::from(i < extra);
        ranges.push(KeyRange { min, max: min + width });
        min += width;
    }
    ranges
}

/// Immutable partition-to-node map built once by cluster formation.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionMap {
    entries: Vec<(KeyRange, NodeName)>,
}

impl PartitionMap {
    /// Assigns range *i* to the *i*-th name in lexicographic order.
    pub fn balance(mut names: Vec<NodeName>) -> Self {
        names.sort();
        names.dedup();
        let entries = assign_ranges(names.len()).into_iter().zip(names).collect();
        Self { entries }
    }

    pub fn owner_of(&self, partition: u32) -> Option<&NodeName> {
        let idx = self
            .entries
            .partition_point(|(range, _)| range.max <= partition);
        self.entries
            .get(idx)
            .filter(|(range, _)| range.contains(partition))
            .map(|(_, name)| name)
    }

    pub fn owner_of_key(&self, key: &str) -> Option<&NodeName> {
        self.owner_of(partition_of(key))
    }

    pub fn range_of(&self, name: &NodeName) -> Option<KeyRange> {
        self.entries
            .iter()
            .find(|(_, owner)| owner == name)
            .map(|(range, _)| *range)
    }

    pub fn entries(&self) -> &[(KeyRange, NodeName)] {
        &self.entries
    }

    /// Every index is owned by exactly one range, without gaps or overlaps.
    pub fn covers_all(&self) -> bool {
        let mut next = 0;
        for (range, _) in &self.entries {
            if range.min != next || range.max < range.min {
                return false;
            }
            next = range.max;
        }
        next == PARTITIONS
    }
}
