//! # Config - Storage Settings
//!
//! Tunables for the spill store: where the temporary engine lives, when the
//! memtable flushes, when L0 compacts, and how map-level batching behaves.
//!
//! Every setting can be overridden from the environment:
//!
//! ```text
//! SPILL_TEMP_DIR          parent of the per-engine temp dir  (default: OS temp dir)
//! SPILL_FLUSH_KB          memtable flush threshold in KiB    (default: 4096 = 4 MiB)
//! SPILL_L0_TRIGGER        L0 compaction trigger              (default: 4, 0 = disabled)
//! SPILL_WAL_SYNC          fsync every WAL append             (default: "false")
//! SPILL_BATCH_CAPACITY    default batch writer capacity      (default: 4096)
//! SPILL_COMPACT_ON_CLOSE  compact after a map is closed      (default: "true")
//! ```
//!
//! Spilled data is scratch data that never outlives the process, so the WAL
//! is not synced by default.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::str::FromStr;

/// Default memtable flush threshold (4 MiB).
pub const DEFAULT_FLUSH_THRESHOLD: usize = 4 * 1024 * 1024;

/// Default number of L0 SSTables that triggers automatic compaction.
pub const DEFAULT_L0_COMPACTION_TRIGGER: usize = 4;

/// Default number of buffered entries before a batch writer flushes.
pub const DEFAULT_BATCH_CAPACITY: usize = 4096;

/// Settings for a temporary spill engine and the maps built on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Directory under which the engine creates its private temp dir.
    /// `None` uses the OS temp dir.
    pub temp_dir: Option<PathBuf>,
    /// Memtable byte-size threshold that triggers a flush.
    pub flush_threshold: usize,
    /// L0 SSTable count that triggers compaction; `0` disables it.
    pub l0_compaction_trigger: usize,
    /// `fsync` after every WAL append.
    pub wal_sync: bool,
    /// Entries a batch writer buffers before flushing on its own.
    pub batch_capacity: usize,
    /// Ask the background compactor to reclaim space after a map closes.
    pub compact_on_close: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            temp_dir: None,
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            l0_compaction_trigger: DEFAULT_L0_COMPACTION_TRIGGER,
            wal_sync: false,
            batch_capacity: DEFAULT_BATCH_CAPACITY,
            compact_on_close: true,
        }
    }
}

impl StorageConfig {
    /// Builds a config from the `SPILL_*` environment variables, falling back
    /// to [`Default`] for anything unset.
    ///
    /// # Errors
    ///
    /// Fails when a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let temp_dir = lookup("SPILL_TEMP_DIR")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);
        let flush_kb: usize = parse_or(&lookup, "SPILL_FLUSH_KB", defaults.flush_threshold / 1024)?;
        let flush_threshold = flush_kb
            .checked_mul(1024)
            .with_context(|| format!("invalid value for SPILL_FLUSH_KB: {} KiB does not fit in usize bytes", flush_kb))?;

        Ok(Self {
            temp_dir,
            flush_threshold,
            l0_compaction_trigger: parse_or(
                &lookup,
                "SPILL_L0_TRIGGER",
                defaults.l0_compaction_trigger,
            )?,
            wal_sync: parse_or(&lookup, "SPILL_WAL_SYNC", defaults.wal_sync)?,
            batch_capacity: parse_or(&lookup, "SPILL_BATCH_CAPACITY", defaults.batch_capacity)?,
            compact_on_close: parse_or(&lookup, "SPILL_COMPACT_ON_CLOSE", defaults.compact_on_close)?,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
    }
}
