use engine::WriteBatch;

use crate::error::{Misuse, Result};
use crate::map::SortedDiskMap;

/// Buffers puts for one map and applies them to the store in bulk.
///
/// Keys are encoded when `put` is called, so in duplicate mode an entry's
/// position follows the order of `put` calls across direct and batched
/// writes alike. A flushed batch becomes visible all at once.
///
/// Dropping a writer with buffered entries flushes them best-effort; call
/// [`close`](BatchWriter::close) to see the outcome.
#[derive(Debug)]
pub struct BatchWriter<'a> {
    map: &'a SortedDiskMap,
    batch: WriteBatch,
    capacity: usize,
    closed: bool,
}

impl<'a> BatchWriter<'a> {
    pub(crate) fn new(map: &'a SortedDiskMap, capacity: usize) -> Self {
        Self {
            map,
            batch: WriteBatch::with_capacity(capacity),
            capacity,
            closed: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries waiting for the next flush.
    pub fn buffered(&self) -> usize {
        self.batch.len()
    }

    /// Buffers `key -> value`, flushing when the buffer reaches capacity.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Misuse::WriterClosed.into());
        }
        if self.map.is_closed() {
            return Err(Misuse::MapClosed.into());
        }
        self.batch.put(self.map.encode(key), value.to_vec());
        if self.batch.len() >= self.capacity {
            self.apply()?;
        }
        Ok(())
    }

    /// Applies everything buffered so far. No-op on an empty buffer.
    pub fn flush(&mut self) -> Result<()> {
        if self.closed {
            return Err(Misuse::WriterClosed.into());
        }
        self.apply()
    }

    /// Flushes the remaining entries and retires the writer. Later calls to
    /// any method fail with [`Misuse::WriterClosed`].
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(Misuse::WriterClosed.into());
        }
        self.closed = true;
        self.apply()
    }

    /// The buffer is handed to the store as is; if the store fails, the
    /// entries are not kept for another attempt.
    fn apply(&mut self) -> Result<()> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let store = self.map.store()?;
        let batch = std::mem::replace(&mut self.batch, WriteBatch::with_capacity(self.capacity));
        let entries = batch.len();
        store
            .apply_batch(batch)
            .map_err(|e| self.map.engine_error("batch flush", e))?;
        tracing::debug!(namespace = self.map.namespace(), entries, "batch flushed");
        Ok(())
    }
}

impl Drop for BatchWriter<'_> {
    fn drop(&mut self) {
        if self.closed || self.batch.is_empty() {
            return;
        }
        let pending = self.batch.len();
        if let Err(e) = self.apply() {
            tracing::warn!(
                namespace = self.map.namespace(),
                pending,
                error = %e,
                "flushing batch writer on drop failed"
            );
        }
    }
}
