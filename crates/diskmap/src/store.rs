//! The storage contract the map layer is written against.
//!
//! [`KvStore`] is the narrow set of engine operations a map needs: point
//! writes and reads, atomic batches, bounded iterators and range deletion.
//! [`LsmStore`] is the production implementation, the LSM [`Engine`] behind
//! a mutex so that many maps can share it from many threads.

use anyhow::Result;
use engine::{Engine, EngineIterator, SstInfo, WriteBatch};
use parking_lot::Mutex;
use std::path::Path;

use config::StorageConfig;

/// A positioned cursor over a bounded key range.
pub trait StoreIterator: Send {
    /// Positions at the first key `>= target`.
    fn seek(&mut self, target: &[u8]) -> Result<()>;
    fn next(&mut self) -> Result<()>;
    fn valid(&self) -> bool;
    /// `None` unless [`valid`](StoreIterator::valid).
    fn key(&self) -> Option<&[u8]>;
    fn value(&self) -> Option<&[u8]>;
}

/// An ordered byte-keyed store shared by every map of one engine handle.
pub trait KvStore: Send + Sync {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// `Ok(None)` when the key is absent.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn new_batch(&self) -> WriteBatch {
        WriteBatch::new()
    }

    /// Applies every operation of `batch`, or none of them.
    fn apply_batch(&self, batch: WriteBatch) -> Result<()>;

    /// Iterator over `[lower, upper)`, initially unpositioned.
    fn new_iterator(&self, lower: &[u8], upper: &[u8]) -> Result<Box<dyn StoreIterator>>;

    /// Deletes `[start, end)`. Visible to reads once this returns.
    fn delete_range(&self, start: &[u8], end: &[u8]) -> Result<()>;

    /// Persists buffered writes.
    fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Reclaims space held by deleted data.
    fn compact(&self) -> Result<()> {
        Ok(())
    }

    /// Reclaims space held by deleted data inside the `[lower, upper)`
    /// ranges, leaving data elsewhere where it is.
    fn compact_range(&self, ranges: &[(Vec<u8>, Vec<u8>)]) -> Result<()> {
        let _ = ranges;
        self.compact()
    }

    /// Forgets unpersisted writes; the store's storage is about to be
    /// deleted.
    fn discard(&self) {}

    /// Live on-disk tables, for inspection.
    fn sstables(&self) -> Vec<SstInfo> {
        Vec::new()
    }
}

/// [`KvStore`] over the LSM [`Engine`].
#[derive(Debug)]
pub struct LsmStore {
    engine: Mutex<Engine>,
}

impl LsmStore {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine: Mutex::new(engine),
        }
    }

    /// Opens an engine laid out inside `dir`.
    pub fn open<P: AsRef<Path>>(dir: P, config: &StorageConfig) -> Result<Self> {
        Ok(Self::new(Engine::open(dir, config)?))
    }
}

impl KvStore for LsmStore {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.engine.lock().put(key.to_vec(), value.to_vec())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.engine.lock().get(key)?.map(|(_, value)| value))
    }

    fn apply_batch(&self, batch: WriteBatch) -> Result<()> {
        self.engine.lock().write_batch(batch)
    }

    fn new_iterator(&self, lower: &[u8], upper: &[u8]) -> Result<Box<dyn StoreIterator>> {
        Ok(Box::new(self.engine.lock().iter(lower, Some(upper))))
    }

    fn delete_range(&self, start: &[u8], end: &[u8]) -> Result<()> {
        self.engine.lock().delete_range(start.to_vec(), end.to_vec())
    }

    fn flush(&self) -> Result<()> {
        self.engine.lock().force_flush()
    }

    fn compact(&self) -> Result<()> {
        self.engine.lock().compact()
    }

    // Only planning and installing take the lock.
    fn compact_range(&self, ranges: &[(Vec<u8>, Vec<u8>)]) -> Result<()> {
        let planned = self.engine.lock().plan_range_compaction(ranges)?;
        let job = match planned {
            Some(job) => job,
            None => return Ok(()),
        };
        let done = job.run()?;
        if !self.engine.lock().install_compaction(done)? {
            tracing::debug!("tables changed during range compaction, output dropped");
        }
        Ok(())
    }

    fn discard(&self) {
        self.engine.lock().discard();
    }

    fn sstables(&self) -> Vec<SstInfo> {
        self.engine.lock().sstables()
    }
}

impl StoreIterator for EngineIterator {
    fn seek(&mut self, target: &[u8]) -> Result<()> {
        EngineIterator::seek(self, target)
    }

    fn next(&mut self) -> Result<()> {
        EngineIterator::next(self)
    }

    fn valid(&self) -> bool {
        EngineIterator::valid(self)
    }

    fn key(&self) -> Option<&[u8]> {
        EngineIterator::key(self)
    }

    fn value(&self) -> Option<&[u8]> {
        EngineIterator::value(self)
    }
}
