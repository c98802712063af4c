/// Write path: `put()`, `delete_range()`, `write_batch()`, `force_flush()`
/// and the internal `flush()`.
///
/// Every mutation is appended to the WAL before it reaches the memtable.
/// When the memtable exceeds the flush threshold it is persisted to a new L0
/// SSTable.
use anyhow::{ensure, Result};
use std::fs::OpenOptions;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use wal::{WalRecord, WalWriter};

use crate::{BatchOp, Engine, SSTableReader, SSTableWriter, WriteBatch, MAX_KEY_SIZE, MAX_VALUE_SIZE};

fn check_key(key: &[u8]) -> Result<()> {
    ensure!(!key.is_empty(), "key must not be empty");
    ensure!(
        key.len() <= MAX_KEY_SIZE,
        "key too large: {} bytes (max {})",
        key.len(),
        MAX_KEY_SIZE
    );
    Ok(())
}

fn check_value(value: &[u8]) -> Result<()> {
    ensure!(
        value.len() <= MAX_VALUE_SIZE,
        "value too large: {} bytes (max {})",
        value.len(),
        MAX_VALUE_SIZE
    );
    Ok(())
}

fn check_range(start: &[u8], end: &[u8]) -> Result<()> {
    check_key(start)?;
    check_key(end)?;
    ensure!(start < end, "empty or inverted range: start must be < end");
    Ok(())
}

fn check_op(op: &BatchOp) -> Result<()> {
    match op {
        BatchOp::Put { key, value } => {
            check_key(key)?;
            check_value(value)
        }
        BatchOp::DeleteRange { start, end } => check_range(start, end),
    }
}

impl Engine {
    /// Inserts or overwrites a key.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        let mut batch = WriteBatch::with_capacity(1);
        batch.put(key, value);
        self.write_batch(batch)
    }

    /// Deletes every key in `[start, end)` by writing one range tombstone.
    ///
    /// The deletion is visible to `get` and to new iterators as soon as this
    /// returns. Space is reclaimed by a later compaction.
    pub fn delete_range(&mut self, start: Vec<u8>, end: Vec<u8>) -> Result<()> {
        let mut batch = WriteBatch::with_capacity(1);
        batch.delete_range(start, end);
        self.write_batch(batch)
    }

    /// Applies every operation of `batch` atomically.
    ///
    /// Operations receive consecutive sequence numbers in batch order, so a
    /// later put of the same key wins and a tombstone hides puts that came
    /// before it in the batch. The whole batch is validated before anything
    /// is logged; one bad operation rejects the batch.
    ///
    /// An empty batch is a no-op.
    pub fn write_batch(&mut self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        for op in batch.ops() {
            check_op(op)?;
        }

        let first = self
            .seq
            .checked_add(1)
            .ok_or_else(|| anyhow::anyhow!("sequence number overflow (u64::MAX reached)"))?;
        let last = self
            .seq
            .checked_add(batch.len() as u64)
            .ok_or_else(|| anyhow::anyhow!("sequence number overflow (u64::MAX reached)"))?;

        let records: Vec<WalRecord> = batch
            .into_ops()
            .into_iter()
            .zip(first..=last)
            .map(|(op, seq)| match op {
                BatchOp::Put { key, value } => WalRecord::Put { seq, key, value },
                BatchOp::DeleteRange { start, end } => WalRecord::DeleteRange { seq, start, end },
            })
            .collect();

        self.wal_writer.append_group(&records)?;
        self.seq = last;

        for record in records {
            match record {
                WalRecord::Put { seq, key, value } => self.mem.put(key, value, seq),
                WalRecord::DeleteRange { seq, start, end } => self.mem.delete_range(start, end, seq),
            }
        }

        if self.mem.approx_size() >= self.flush_threshold {
            self.flush()?;
        }

        Ok(())
    }

    /// Flushes the memtable to a new SSTable. No-op if the memtable is empty.
    ///
    /// If auto-compaction is enabled and the L0 count reaches the trigger,
    /// compaction runs as well.
    pub fn force_flush(&mut self) -> Result<()> {
        if self.mem.is_empty() {
            return Ok(());
        }
        self.flush()
    }

    /// # Steps
    ///
    /// 1. Write the memtable (entries and tombstones) to
    ///    `sst-{seq}-{timestamp_ms}.sst` via temp + rename.
    /// 2. Record it in the manifest as L0.
    /// 3. Truncate the WAL and reopen the writer.
    /// 4. Reset the memtable and put the new reader at the front of L0.
    /// 5. Compact if the L0 count reached the trigger.
    pub(crate) fn flush(&mut self) -> Result<()> {
        let ts = SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis();
        let sst_name = format!("sst-{:020}-{}.sst", self.seq, ts);
        let sst_path = self.sst_dir.join(&sst_name);

        SSTableWriter::write_from_memtable(&sst_path, &self.mem)?;

        self.manifest.add(sst_name, 0);
        self.manifest.save()?;

        // The data is now in an SSTable named by the manifest; drop the log.
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.wal_path)?;
        self.wal_writer = WalWriter::create(&self.wal_path, self.wal_sync)?;

        tracing::debug!(
            sst = %sst_path.display(),
            entries = self.mem.len(),
            range_dels = self.mem.range_tombstones().len(),
            "memtable flushed"
        );
        self.mem.clear();

        let reader = SSTableReader::open(&sst_path)?;
        self.l0_sstables.insert(0, Arc::new(reader));

        if self.l0_compaction_trigger > 0 && self.l0_sstables.len() >= self.l0_compaction_trigger {
            self.compact()?;
        }

        Ok(())
    }
}
