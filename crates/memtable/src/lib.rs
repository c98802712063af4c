//! # Memtable
//!
//! The in-memory, sorted write buffer of the storage engine. Point entries are
//! kept in a `BTreeMap` keyed by raw bytes; range deletions are kept as a short
//! list of [`RangeTombstone`]s that shadow anything older inside their span.
//!
//! Every mutation carries the engine-assigned sequence number. A mutation whose
//! sequence number is not newer than what the memtable already holds for the
//! same key is ignored, which makes WAL replay idempotent.

use std::collections::BTreeMap;
use std::ops::Bound;

/// The newest version of a key held by a memtable or an SSTable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueEntry {
    pub seq: u64,
    pub value: Vec<u8>,
}

/// Deletion of every key in `[start, end)` written before `seq`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeTombstone {
    pub start: Vec<u8>,
    pub end: Vec<u8>,
    pub seq: u64,
}

impl RangeTombstone {
    /// Returns `true` if `key` lies inside `[start, end)`.
    pub fn contains(&self, key: &[u8]) -> bool {
        key >= self.start.as_slice() && key < self.end.as_slice()
    }

    /// Returns `true` if a version of `key` written at `seq` is deleted by
    /// this tombstone.
    pub fn shadows(&self, key: &[u8], seq: u64) -> bool {
        seq < self.seq && self.contains(key)
    }
}

/// Returns `true` if any tombstone in `tombstones` deletes `key`@`seq`.
pub fn is_shadowed(tombstones: &[RangeTombstone], key: &[u8], seq: u64) -> bool {
    tombstones.iter().any(|t| t.shadows(key, seq))
}

#[derive(Debug)]
pub struct Memtable {
    map: BTreeMap<Vec<u8>, ValueEntry>,
    range_dels: Vec<RangeTombstone>,
    approx_size: usize,
}

impl Memtable {
    pub fn new() -> Self {
        Self {
            map: BTreeMap::new(),
            range_dels: Vec::new(),
            approx_size: 0,
        }
    }

    /// Inserts `key` at `seq`. Ignored if a newer version of the key, or a
    /// newer range tombstone covering it, is already present.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>, seq: u64) {
        if is_shadowed(&self.range_dels, &key, seq) {
            return;
        }
        match self.map.get(&key) {
            Some(old) if old.seq >= seq => return,
            Some(old) => {
                self.approx_size = self.approx_size.saturating_sub(old.value.len());
            }
            None => {
                self.approx_size += key.len();
            }
        }

        self.approx_size += value.len();
        self.map.insert(key, ValueEntry { seq, value });
    }

    /// Records a range deletion of `[start, end)` at `seq`.
    ///
    /// Entries in the range that are older than `seq` are dropped right away;
    /// the tombstone itself is retained so it keeps shadowing older data that
    /// lives in SSTables.
    pub fn delete_range(&mut self, start: Vec<u8>, end: Vec<u8>, seq: u64) {
        let doomed: Vec<Vec<u8>> = self
            .map
            .range::<[u8], _>((Bound::Included(start.as_slice()), Bound::Excluded(end.as_slice())))
            .filter(|(_, e)| e.seq < seq)
            .map(|(k, _)| k.clone())
            .collect();
        for key in doomed {
            if let Some(old) = self.map.remove(&key) {
                self.approx_size = self
                    .approx_size
                    .saturating_sub(key.len() + old.value.len());
            }
        }

        self.approx_size += start.len() + end.len();
        self.range_dels.push(RangeTombstone { start, end, seq });
    }

    /// Get the latest value if present and not deleted.
    pub fn get(&self, key: &[u8]) -> Option<(u64, Vec<u8>)> {
        self.map.get(key).map(|e| (e.seq, e.value.clone()))
    }

    pub fn get_entry(&self, key: &[u8]) -> Option<&ValueEntry> {
        self.map.get(key)
    }

    /// Ordered iterator over all point entries.
    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &ValueEntry)> {
        self.map.iter()
    }

    /// Ordered iterator over the point entries in `[lower, upper)`.
    /// `upper == None` means unbounded.
    pub fn range<'a>(
        &'a self,
        lower: &[u8],
        upper: Option<&[u8]>,
    ) -> impl Iterator<Item = (&'a Vec<u8>, &'a ValueEntry)> {
        let hi = match upper {
            Some(u) => Bound::Excluded(u),
            None => Bound::Unbounded,
        };
        self.map.range::<[u8], _>((Bound::Included(lower), hi))
    }

    pub fn range_tombstones(&self) -> &[RangeTombstone] {
        &self.range_dels
    }

    /// Number of point entries (tombstones are not counted).
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn approx_size(&self) -> usize {
        self.approx_size
    }

    /// `true` when there is nothing to flush: no entries and no tombstones.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty() && self.range_dels.is_empty()
    }

    /// Drops all contents, keeping the allocation of the tombstone list.
    pub fn clear(&mut self) {
        self.map.clear();
        self.range_dels.clear();
        self.approx_size = 0;
    }
}

impl Default for Memtable {
    fn default() -> Self {
        Self::new()
    }
}
