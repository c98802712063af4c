use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Weak};

use crate::batch::BatchWriter;
use crate::codec;
use crate::error::{DiskMapError, Misuse, Result};
use crate::iter::ScopedIterator;
use crate::store::KvStore;
use crate::temp_engine::CompactorMsg;

/// How user keys become engine keys.
#[derive(Debug)]
pub(crate) enum KeyPolicy {
    /// One entry per user key; a later put overwrites.
    Unique,
    /// Every put is kept, ordered by a per-map insertion counter appended to
    /// the key.
    Duplicates { next_seq: AtomicU64 },
}

impl KeyPolicy {
    pub(crate) fn duplicates() -> Self {
        KeyPolicy::Duplicates {
            next_seq: AtomicU64::new(0),
        }
    }

    fn encode(&self, namespace: u64, key: &[u8]) -> Vec<u8> {
        match self {
            KeyPolicy::Unique => codec::encode_key(namespace, key),
            KeyPolicy::Duplicates { next_seq } => {
                let seq = next_seq.fetch_add(1, Ordering::Relaxed);
                codec::encode_key_with_sequence(namespace, key, seq)
            }
        }
    }

    fn has_sequence(&self) -> bool {
        matches!(self, KeyPolicy::Duplicates { .. })
    }
}

/// A sorted, on-disk map sandboxed to one namespace of a shared store.
///
/// Maps come from [`TempEngine::new_sorted_disk_map`] (unique keys) and
/// [`TempEngine::new_sorted_disk_multi_map`] (duplicate keys allowed). They
/// hold only a weak reference to the store, so once the engine handle shuts
/// down every operation fails with [`Misuse::EngineShutDown`].
///
/// A single map is not meant to be driven from several threads at once;
/// distinct maps on the same store are fully independent.
///
/// [`TempEngine::new_sorted_disk_map`]: crate::TempEngine::new_sorted_disk_map
/// [`TempEngine::new_sorted_disk_multi_map`]: crate::TempEngine::new_sorted_disk_multi_map
#[derive(Debug)]
pub struct SortedDiskMap {
    namespace: u64,
    store: Weak<dyn KvStore>,
    policy: KeyPolicy,
    closed: AtomicBool,
    batch_capacity: usize,
    compactor: Option<Sender<CompactorMsg>>,
}

impl SortedDiskMap {
    pub(crate) fn new(
        namespace: u64,
        store: Weak<dyn KvStore>,
        policy: KeyPolicy,
        batch_capacity: usize,
        compactor: Option<Sender<CompactorMsg>>,
    ) -> Self {
        tracing::debug!(namespace, duplicates = policy.has_sequence(), "map created");
        Self {
            namespace,
            store,
            policy,
            closed: AtomicBool::new(false),
            batch_capacity,
            compactor,
        }
    }

    pub fn namespace(&self) -> u64 {
        self.namespace
    }

    /// `true` for maps created with `new_sorted_disk_multi_map`.
    pub fn allows_duplicates(&self) -> bool {
        self.policy.has_sequence()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn store(&self) -> Result<Arc<dyn KvStore>> {
        if self.is_closed() {
            return Err(Misuse::MapClosed.into());
        }
        self.store.upgrade().ok_or_else(|| Misuse::EngineShutDown.into())
    }

    /// Engine key for the next write of `key`. In duplicate mode this draws a
    /// sequence number, so call it exactly once per put.
    pub(crate) fn encode(&self, key: &[u8]) -> Vec<u8> {
        self.policy.encode(self.namespace, key)
    }

    pub(crate) fn engine_error(&self, op: &'static str, err: anyhow::Error) -> DiskMapError {
        DiskMapError::engine(op, self.namespace, err)
    }

    /// Writes `key -> value`. With unique keys this replaces any previous
    /// value; with duplicates it adds another entry after the existing ones.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let store = self.store()?;
        let encoded = self.encode(key);
        store
            .put(&encoded, value)
            .map_err(|e| self.engine_error("put", e))
    }

    /// Looks up `key`. Absence is `Ok(None)`.
    ///
    /// # Errors
    ///
    /// [`Misuse::GetOnMultiMap`] on a map that allows duplicates: a key may
    /// have any number of values there, so read them with an iterator.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let store = self.store()?;
        if self.policy.has_sequence() {
            return Err(Misuse::GetOnMultiMap.into());
        }
        store
            .get(&codec::encode_key(self.namespace, key))
            .map_err(|e| self.engine_error("get", e))
    }

    /// Iterator over this map only, initially unpositioned.
    pub fn new_iterator(&self) -> Result<ScopedIterator> {
        let store = self.store()?;
        let (lower, upper) = codec::namespace_bounds(self.namespace);
        let inner = store
            .new_iterator(&lower, &upper)
            .map_err(|e| self.engine_error("new_iterator", e))?;
        Ok(ScopedIterator::new(
            inner,
            self.namespace,
            self.policy.has_sequence(),
            lower,
            upper,
        ))
    }

    /// Batch writer with the engine handle's default capacity.
    pub fn new_batch_writer(&self) -> Result<BatchWriter<'_>> {
        self.new_batch_writer_with_capacity(self.batch_capacity)
    }

    /// Batch writer that flushes on its own every `capacity` puts. A capacity
    /// of 0 is treated as 1.
    pub fn new_batch_writer_with_capacity(&self, capacity: usize) -> Result<BatchWriter<'_>> {
        self.store()?;
        Ok(BatchWriter::new(self, capacity.max(1)))
    }

    /// Deletes every entry of this map from the store.
    ///
    /// Returns once the deletion is visible. Space is reclaimed later by a
    /// background compaction when the engine handle enables it.
    ///
    /// # Errors
    ///
    /// [`Misuse::MapClosed`] if the map is already closed. If the store fails
    /// the map stays open and the call may be retried.
    pub fn close(&self) -> Result<()> {
        let store = self.store()?;
        let (lower, upper) = codec::namespace_bounds(self.namespace);
        store
            .delete_range(&lower, &upper)
            .map_err(|e| self.engine_error("close", e))?;
        self.closed.store(true, Ordering::Release);

        if let Some(tx) = &self.compactor {
            if tx.send(CompactorMsg::Compact(self.namespace)).is_err() {
                tracing::debug!(namespace = self.namespace, "compactor gone, skipping compaction");
            }
        }
        tracing::debug!(namespace = self.namespace, "map closed");
        Ok(())
    }
}

impl Drop for SortedDiskMap {
    fn drop(&mut self) {
        if self.is_closed() || self.store.strong_count() == 0 {
            return;
        }
        if let Err(e) = self.close() {
            tracing::warn!(namespace = self.namespace, error = %e, "closing map on drop failed");
        }
    }
}
