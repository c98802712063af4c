//! # Engine - Ordered Key-Value Store
//!
//! Ties the [`memtable`], [`wal`], and [`sstable`] crates together into a
//! small LSM-tree store with point reads, snapshot iterators, atomic write
//! batches and range deletion.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                   ENGINE                      │
//! │                                               │
//! │ write.rs → WAL frame → Memtable insert        │
//! │              |                                │
//! │              |  (threshold exceeded?)         │
//! │              v                                │
//! │           flush() → new L0 SSTable            │
//! │              |                                │
//! │              |  (L0 count >= trigger?)        │
//! │              v                                │
//! │           compact() → single L1 SSTable       │
//! │                                               │
//! │ plan/install_compaction → rewrite only the    │
//! │           tables overlapping deleted ranges   │
//! │                                               │
//! │ read.rs → newest version wins, then range     │
//! │           tombstones from every layer apply   │
//! │ iter.rs → snapshot over [lower, upper)        │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module         | Purpose                                              |
//! |----------------|------------------------------------------------------|
//! | [`lib.rs`]     | `Engine` struct, constructors, accessors, `Drop`     |
//! | [`batch`]      | `WriteBatch`                                         |
//! | [`recovery`]   | WAL replay, SSTable loading, tmp file cleanup        |
//! | [`write`]      | `put()`, `delete_range()`, `write_batch()`, flushing |
//! | [`read`]       | `get()`, `iter()`                                    |
//! | [`iter`]       | `EngineIterator`                                     |
//! | [`compaction`] | full and range compaction, range tombstone GC        |
//! | [`manifest`]   | persistent L0/L1 level tracking                      |
//!
//! ## Deletion
//!
//! The only deletion is the range tombstone: `[start, end)` at a sequence
//! number. It hides every older version inside the span from the moment
//! `delete_range` returns. Shadowed memtable entries are dropped immediately;
//! shadowed SSTable entries and the tombstones themselves are dropped by the
//! next compaction.
//!
//! ## Crash Safety
//!
//! Every write is appended to the WAL before the memtable is updated, and the
//! WAL is only truncated after a successful flush and manifest update.
//! SSTables and the manifest are both written via temp file + rename.
mod batch;
mod compaction;
mod iter;
mod manifest;
mod read;
mod recovery;
mod write;

use anyhow::Result;
use config::StorageConfig;
use manifest::Manifest;
use memtable::Memtable;
use sstable::{SSTableReader, SSTableWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use wal::WalWriter;

pub use batch::{BatchOp, WriteBatch};
pub use compaction::{CompactedTables, RangeCompaction};
pub use config::DEFAULT_L0_COMPACTION_TRIGGER;
pub use iter::EngineIterator;
pub use recovery::replay_wal_and_build;

/// Maximum allowed key size in bytes (64 KiB).
pub const MAX_KEY_SIZE: usize = 64 * 1024;
/// Maximum allowed value size in bytes (10 MiB).
pub const MAX_VALUE_SIZE: usize = 10 * 1024 * 1024;

/// File name of the WAL inside a directory opened with [`Engine::open`].
pub const WAL_FILENAME: &str = "wal.log";
/// SSTable subdirectory inside a directory opened with [`Engine::open`].
pub const SST_DIRNAME: &str = "sst";

/// Summary of one live SSTable, for inspection and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SstInfo {
    /// 0 for flushed tables, 1 for compaction output.
    pub level: u32,
    /// Smallest key covered, counting range tombstone spans.
    pub smallest: Vec<u8>,
    /// Largest key covered; for a tombstone this is its exclusive end.
    pub largest: Vec<u8>,
    /// Number of point entries.
    pub entries: usize,
}

/// The storage engine: one memtable, one WAL, and two levels of SSTables.
///
/// # Write Path
///
/// 1. Assign the next sequence number(s).
/// 2. Append the record (or the whole batch, as one frame) to the WAL.
/// 3. Apply the mutation to the memtable.
/// 4. If `approx_size >= flush_threshold`, flush the memtable to a new L0
///    SSTable, truncate the WAL, and reset the memtable.
///
/// # Read Path
///
/// The memtable holds the newest version of a key if it has one. Otherwise
/// the version with the highest sequence number across all SSTables wins
/// (range compaction output in L1 can be newer than older L0 tables). It is
/// returned unless a range tombstone with a higher sequence number covers it
/// in any layer.
///
/// SSTable readers are reference-counted so that iterator snapshots keep
/// them alive across flushes and compactions.
pub struct Engine {
    pub(crate) mem: Memtable,
    /// Level 0: SSTables from memtable flushes, newest first.
    pub(crate) l0_sstables: Vec<Arc<SSTableReader>>,
    /// Level 1: SSTables from compaction, newest first.
    pub(crate) l1_sstables: Vec<Arc<SSTableReader>>,
    pub(crate) wal_path: PathBuf,
    pub(crate) sst_dir: PathBuf,
    pub(crate) wal_writer: WalWriter,
    pub(crate) manifest: Manifest,

    /// Current monotonic sequence number.
    pub(crate) seq: u64,

    /// Memtable byte-size threshold that triggers a flush to SSTable.
    pub(crate) flush_threshold: usize,

    /// Number of L0 SSTables that triggers automatic compaction after a flush.
    /// `0` disables auto-compaction.
    pub(crate) l0_compaction_trigger: usize,

    pub(crate) wal_sync: bool,

    /// Range compactions planned since open; keeps output names unique.
    pub(crate) range_compactions: u64,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("seq", &self.seq)
            .field("flush_threshold", &self.flush_threshold)
            .field("wal_sync", &self.wal_sync)
            .field("wal_path", &self.wal_path)
            .field("sst_dir", &self.sst_dir)
            .field("memtable_size", &self.mem.approx_size())
            .field("memtable_entries", &self.mem.len())
            .field("memtable_range_dels", &self.mem.range_tombstones().len())
            .field("l0_sstable_count", &self.l0_sstables.len())
            .field("l1_sstable_count", &self.l1_sstables.len())
            .field("l0_compaction_trigger", &self.l0_compaction_trigger)
            .finish()
    }
}

impl Engine {
    /// Opens (or creates) an engine, recovering from the WAL and any existing
    /// SSTable files.
    ///
    /// # Recovery Steps
    ///
    /// 1. Create the SST directory if it does not exist.
    /// 2. Clean up leftover `.sst.tmp` files from interrupted flushes.
    /// 3. Replay the WAL into a fresh memtable.
    /// 4. Open the WAL writer in append mode.
    /// 5. Load SSTables into their levels from the manifest.
    /// 6. Resume the sequence number after the highest one seen anywhere.
    pub fn new<P1: AsRef<Path>, P2: AsRef<Path>>(
        wal_path: P1,
        sst_dir: P2,
        flush_threshold: usize,
        wal_sync: bool,
    ) -> Result<Self> {
        let wal_path = wal_path.as_ref().to_path_buf();
        let sst_dir = sst_dir.as_ref().to_path_buf();

        std::fs::create_dir_all(&sst_dir)?;
        Self::cleanup_tmp_files(&sst_dir);

        // Replay before opening the writer so the two never share the file.
        let mut mem = Memtable::new();
        let wal_seq = replay_wal_and_build(&wal_path, &mut mem)?;

        let wal_writer = WalWriter::create(&wal_path, wal_sync)?;
        let manifest = Manifest::load_or_create(&sst_dir)?;
        let (l0_sstables, l1_sstables) = Self::load_levels(&sst_dir, &manifest)?;

        let sst_seq = l0_sstables
            .iter()
            .chain(l1_sstables.iter())
            .map(|r| r.max_seq())
            .max()
            .unwrap_or(0);
        let seq = wal_seq.max(sst_seq);

        tracing::debug!(
            wal = %wal_path.display(),
            seq,
            l0 = l0_sstables.len(),
            l1 = l1_sstables.len(),
            "engine opened"
        );

        Ok(Self {
            mem,
            l0_sstables,
            l1_sstables,
            wal_path,
            sst_dir,
            wal_writer,
            manifest,
            seq,
            flush_threshold,
            l0_compaction_trigger: DEFAULT_L0_COMPACTION_TRIGGER,
            wal_sync,
            range_compactions: 0,
        })
    }

    /// Opens an engine laid out inside `dir` (`dir/wal.log`, `dir/sst/`) with
    /// the thresholds from `config`.
    pub fn open<P: AsRef<Path>>(dir: P, config: &StorageConfig) -> Result<Self> {
        let dir = dir.as_ref();
        let mut engine = Self::new(
            dir.join(WAL_FILENAME),
            dir.join(SST_DIRNAME),
            config.flush_threshold,
            config.wal_sync,
        )?;
        engine.set_l0_compaction_trigger(config.l0_compaction_trigger);
        Ok(engine)
    }

    /// Returns the current monotonic sequence number.
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    #[must_use]
    pub fn flush_threshold(&self) -> usize {
        self.flush_threshold
    }

    pub fn set_flush_threshold(&mut self, threshold: usize) {
        self.flush_threshold = threshold;
    }

    #[must_use]
    pub fn l0_compaction_trigger(&self) -> usize {
        self.l0_compaction_trigger
    }

    /// Updates the L0 compaction trigger. Set to `0` to disable auto-compaction.
    pub fn set_l0_compaction_trigger(&mut self, trigger: usize) {
        self.l0_compaction_trigger = trigger;
    }

    /// Returns the total number of SSTables across all levels.
    #[must_use]
    pub fn sstable_count(&self) -> usize {
        self.l0_sstables.len() + self.l1_sstables.len()
    }

    #[must_use]
    pub fn l0_sstable_count(&self) -> usize {
        self.l0_sstables.len()
    }

    #[must_use]
    pub fn l1_sstable_count(&self) -> usize {
        self.l1_sstables.len()
    }

    /// Describes every live SSTable, L0 newest-first followed by L1.
    pub fn sstables(&self) -> Vec<SstInfo> {
        let describe = |level: u32, r: &Arc<SSTableReader>| SstInfo {
            level,
            smallest: r.smallest_key().map(<[u8]>::to_vec).unwrap_or_default(),
            largest: r.largest_key().map(<[u8]>::to_vec).unwrap_or_default(),
            entries: r.len(),
        };
        self.l0_sstables
            .iter()
            .map(|r| describe(0, r))
            .chain(self.l1_sstables.iter().map(|r| describe(1, r)))
            .collect()
    }

    /// Drops the memtable contents without writing them anywhere, so that
    /// dropping the engine does not flush. For engines whose directory is
    /// about to be deleted; anything still in the WAL comes back on reopen.
    pub fn discard(&mut self) {
        let entries = self.mem.len();
        self.mem.clear();
        tracing::debug!(entries, "memtable discarded");
    }

    /// All SSTable readers, L0 newest first, then L1.
    pub(crate) fn all_sstables(&self) -> impl Iterator<Item = &Arc<SSTableReader>> {
        self.l0_sstables.iter().chain(self.l1_sstables.iter())
    }
}

/// Best-effort flush on drop, skipped after [`Engine::discard`].
///
/// Errors are ignored: the data is still in the WAL and will be recovered on
/// the next open.
impl Drop for Engine {
    fn drop(&mut self) {
        if !self.mem.is_empty() {
            if let Err(e) = self.flush() {
                tracing::warn!(error = %e, "flush on drop failed");
            }
        }
    }
}

#[cfg(test)]
mod tests;
