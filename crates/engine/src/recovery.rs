/// Cold-start path: WAL replay, SSTable loading and leftover temp cleanup.
use anyhow::Result;
use memtable::Memtable;
use std::path::Path;
use std::sync::Arc;
use wal::{WalReader, WalRecord};

use crate::manifest::Manifest;
use crate::{Engine, SSTableReader};

/// Replays a WAL file into the given memtable, returning the highest sequence
/// number encountered.
///
/// A batch frame is either replayed whole or, if its tail never reached the
/// disk, not at all. If the WAL file does not exist, returns `Ok(0)`.
///
/// # Errors
///
/// Propagates any I/O or corruption error from [`WalReader::replay`].
pub fn replay_wal_and_build<P: AsRef<Path>>(path: P, mem: &mut Memtable) -> Result<u64> {
    let mut reader = match WalReader::open(path.as_ref()) {
        Ok(reader) => reader,
        Err(wal::WalError::Io(ref e)) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(anyhow::anyhow!(e).context("failed to open WAL for replay")),
    };

    let mut max_seq = 0u64;
    let mut records = 0usize;
    reader.replay(|r| {
        max_seq = max_seq.max(r.seq());
        records += 1;
        match r {
            WalRecord::Put { seq, key, value } => mem.put(key, value, seq),
            WalRecord::DeleteRange { seq, start, end } => mem.delete_range(start, end, seq),
        }
    })?;

    if records > 0 {
        tracing::debug!(records, max_seq, "replayed WAL");
    }
    Ok(max_seq)
}

type Levels = (Vec<Arc<SSTableReader>>, Vec<Arc<SSTableReader>>);

impl Engine {
    /// Opens every SSTable named by the manifest, returning `(L0, L1)`.
    ///
    /// Files listed in the manifest but missing on disk are skipped: they
    /// belong to a compaction whose cleanup completed before the manifest
    /// could be rewritten.
    pub(crate) fn load_levels(sst_dir: &Path, manifest: &Manifest) -> Result<Levels> {
        let open_level = |names: Vec<&str>| -> Result<Vec<Arc<SSTableReader>>> {
            let mut readers = Vec::with_capacity(names.len());
            for name in names {
                let path = sst_dir.join(name);
                if path.exists() {
                    readers.push(Arc::new(SSTableReader::open(&path)?));
                } else {
                    tracing::warn!(sst = %path.display(), "manifest names a missing sstable");
                }
            }
            Ok(readers)
        };

        Ok((
            open_level(manifest.l0_filenames())?,
            open_level(manifest.l1_filenames())?,
        ))
    }

    /// Cleans up leftover `.sst.tmp` files from interrupted flushes.
    pub(crate) fn cleanup_tmp_files(sst_dir: &Path) {
        if let Ok(entries) = std::fs::read_dir(sst_dir) {
            for entry in entries.flatten() {
                let p = entry.path();
                if let Some(name) = p.file_name().and_then(|n| n.to_str()) {
                    if name.ends_with(".sst.tmp") {
                        let _ = std::fs::remove_file(&p);
                    }
                }
            }
        }
    }
}
