//! Bounded, seekable merge over several sorted sources.
//!
//! Sources are an in-memory snapshot of memtable entries and any number of
//! shared [`SSTableReader`]s. The iterator yields `(key, ValueEntry)` in
//! ascending key order; when a key appears in several sources only the entry
//! with the **highest sequence number** is emitted. Range tombstones are not
//! applied here, callers filter with [`memtable::is_shadowed`].
//!
//! Compaction walks it unbounded from the start; engine iterators position it
//! with [`MergeIterator::seek`] and stop at an exclusive upper bound.

use anyhow::Result;
use memtable::ValueEntry;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};
use std::ops::Bound;
use std::sync::Arc;

use crate::SSTableReader;

/// One input of a [`MergeIterator`].
pub enum MergeSource {
    /// Entries copied out of a memtable.
    Memory(BTreeMap<Vec<u8>, ValueEntry>),
    /// An immutable on-disk table.
    Table(Arc<SSTableReader>),
}

impl MergeSource {
    fn seek_key(&self, target: &[u8], inclusive: bool) -> Option<Vec<u8>> {
        match self {
            MergeSource::Memory(map) => {
                let lo = if inclusive {
                    Bound::Included(target)
                } else {
                    Bound::Excluded(target)
                };
                map.range::<[u8], _>((lo, Bound::Unbounded))
                    .next()
                    .map(|(k, _)| k.clone())
            }
            MergeSource::Table(reader) => reader.seek_key(target, inclusive).map(|k| k.to_vec()),
        }
    }

    fn entry(&self, key: &[u8]) -> Result<Option<ValueEntry>> {
        match self {
            MergeSource::Memory(map) => Ok(map.get(key).cloned()),
            MergeSource::Table(reader) => reader.get(key),
        }
    }
}

/// A pending key from one source. The entry itself is read lazily when the
/// key reaches the top of the heap.
struct HeapEntry {
    key: Vec<u8>,
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.source == other.source
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the smallest key pops first.
        other
            .key
            .cmp(&self.key)
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Heap-based k-way merge with newest-wins deduplication.
///
/// A fresh iterator is unpositioned and yields nothing until
/// [`seek`](MergeIterator::seek) is called.
pub struct MergeIterator {
    sources: Vec<MergeSource>,
    heap: BinaryHeap<HeapEntry>,
    upper: Option<Vec<u8>>,
}

impl MergeIterator {
    /// Creates an iterator over `sources`, never yielding keys `>= upper`.
    pub fn new(sources: Vec<MergeSource>, upper: Option<Vec<u8>>) -> Self {
        Self {
            sources,
            heap: BinaryHeap::new(),
            upper,
        }
    }

    /// Convenience for compaction: every key of every reader, from the start.
    pub fn over_tables(readers: &[Arc<SSTableReader>]) -> Self {
        let sources = readers.iter().cloned().map(MergeSource::Table).collect();
        let mut it = Self::new(sources, None);
        it.seek(&[]);
        it
    }

    /// Repositions every source at its first key `>= target`.
    pub fn seek(&mut self, target: &[u8]) {
        self.heap.clear();
        for i in 0..self.sources.len() {
            self.push_from(i, target, true);
        }
    }

    fn push_from(&mut self, source: usize, target: &[u8], inclusive: bool) {
        if let Some(key) = self.sources[source].seek_key(target, inclusive) {
            if self.in_bounds(&key) {
                self.heap.push(HeapEntry { key, source });
            }
        }
    }

    fn in_bounds(&self, key: &[u8]) -> bool {
        match &self.upper {
            Some(upper) => key < upper.as_slice(),
            None => true,
        }
    }

    /// Returns the next `(key, ValueEntry)` in sorted order, or `None` when
    /// all sources are exhausted.
    pub fn next_entry(&mut self) -> Result<Option<(Vec<u8>, ValueEntry)>> {
        while let Some(top) = self.heap.pop() {
            let mut best = self.sources[top.source].entry(&top.key)?;
            self.push_from(top.source, &top.key, false);

            // Drain the same key from every other source, keeping the newest.
            while self.heap.peek().map_or(false, |p| p.key == top.key) {
                let dup = match self.heap.pop() {
                    Some(dup) => dup,
                    None => break,
                };
                if let Some(entry) = self.sources[dup.source].entry(&dup.key)? {
                    if best.as_ref().map_or(true, |b| entry.seq > b.seq) {
                        best = Some(entry);
                    }
                }
                self.push_from(dup.source, &dup.key, false);
            }

            if let Some(entry) = best {
                return Ok(Some((top.key, entry)));
            }
        }
        Ok(None)
    }

    /// Collects all remaining entries into a `Vec`.
    pub fn collect_all(&mut self) -> Result<Vec<(Vec<u8>, ValueEntry)>> {
        let mut result = Vec::new();
        while let Some(pair) = self.next_entry()? {
            result.push(pair);
        }
        Ok(result)
    }
}
