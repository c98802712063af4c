/// Read path: `get()` and `iter()`.
///
/// A point lookup takes the newest version of the key (the memtable's, else
/// the highest sequence number on disk) and then asks every layer's range
/// tombstones whether that version has been deleted.

use anyhow::Result;
use memtable::{RangeTombstone, ValueEntry};
use sstable::{MergeIterator, MergeSource};
use std::collections::BTreeMap;

use crate::{Engine, EngineIterator};

impl Engine {
    /// Looks up a key, returning `Some((seq, value))` if it is live.
    ///
    /// # Errors
    ///
    /// Returns an error if an SSTable read fails (corruption, I/O).
    pub fn get(&self, key: &[u8]) -> Result<Option<(u64, Vec<u8>)>> {
        let newest = match self.mem.get_entry(key) {
            Some(entry) => Some(entry.clone()),
            None => self.newest_on_disk(key)?,
        };

        let entry = match newest {
            Some(entry) => entry,
            None => return Ok(None),
        };

        if self.is_deleted(key, entry.seq) {
            return Ok(None);
        }
        Ok(Some((entry.seq, entry.value)))
    }

    // Levels are not ordered by age once range compactions put newer data
    // in L1, so every table is consulted.
    fn newest_on_disk(&self, key: &[u8]) -> Result<Option<ValueEntry>> {
        let mut newest: Option<ValueEntry> = None;
        for sst in self.all_sstables() {
            if let Some(entry) = sst.get(key)? {
                if newest.as_ref().map_or(true, |n| entry.seq > n.seq) {
                    newest = Some(entry);
                }
            }
        }
        Ok(newest)
    }

    fn is_deleted(&self, key: &[u8], seq: u64) -> bool {
        memtable::is_shadowed(self.mem.range_tombstones(), key, seq)
            || self
                .all_sstables()
                .any(|sst| memtable::is_shadowed(sst.range_tombstones(), key, seq))
    }

    /// Opens a snapshot iterator over `[lower, upper)`. `upper == None` means
    /// unbounded. The iterator starts unpositioned; call
    /// [`EngineIterator::seek`] first.
    ///
    /// The snapshot copies the in-range memtable entries and shares the
    /// current SSTable readers, so writes, flushes and compactions after this
    /// call are not observed.
    pub fn iter(&self, lower: &[u8], upper: Option<&[u8]>) -> EngineIterator {
        let overlaps = |t: &RangeTombstone| {
            t.end.as_slice() > lower && upper.map_or(true, |u| t.start.as_slice() < u)
        };

        let mut tombstones: Vec<RangeTombstone> = self
            .mem
            .range_tombstones()
            .iter()
            .filter(|t| overlaps(t))
            .cloned()
            .collect();

        let snapshot: BTreeMap<Vec<u8>, ValueEntry> = self
            .mem
            .range(lower, upper)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut sources = vec![MergeSource::Memory(snapshot)];
        for sst in self.all_sstables() {
            tombstones.extend(sst.range_tombstones().iter().filter(|t| overlaps(t)).cloned());
            sources.push(MergeSource::Table(sst.clone()));
        }

        let merge = MergeIterator::new(sources, upper.map(<[u8]>::to_vec));
        EngineIterator::new(merge, tombstones, lower.to_vec())
    }
}
