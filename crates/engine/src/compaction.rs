/// Compaction, in two forms.
///
/// [`Engine::compact`] merges every L0 and L1 SSTable into a single L1
/// SSTable under `&mut self`. Because it covers every table and the memtable
/// only holds newer data, the tombstones have nothing left to shadow and are
/// dropped together with the versions they delete.
///
/// A range compaction only rewrites the tables overlapping some key ranges,
/// typically ranges that were just deleted. It runs in three steps so that a
/// caller holding the engine behind a lock only holds it briefly:
///
/// ```text
/// plan_range_compaction (&mut Engine) -> RangeCompaction
/// RangeCompaction::run  (no engine)   -> CompactedTables
/// install_compaction    (&mut Engine) -> swap readers + manifest
/// ```
///
/// A range tombstone inside the rewritten tables is carried into the output
/// while any table left out of the compaction overlaps its span.
use anyhow::Result;
use memtable::RangeTombstone;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use sstable::MergeIterator;

use crate::{Engine, SSTableReader, SSTableWriter};

/// `true` if the keys covered by `table` may intersect `[lower, upper)`.
fn span_overlaps(table: &SSTableReader, lower: &[u8], upper: &[u8]) -> bool {
    match (table.smallest_key(), table.largest_key()) {
        (Some(smallest), Some(largest)) => smallest < upper && largest >= lower,
        _ => false,
    }
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().and_then(|n| n.to_str()).map(str::to_string)
}

/// Streams the newest version of every key in `inputs` into `path`, skipping
/// versions deleted by `shadowing`, and writes `keep` as the output's range
/// tombstones. Returns whether a file was written and how many versions were
/// dropped.
fn merge_into(
    path: &Path,
    inputs: &[Arc<SSTableReader>],
    shadowing: &[RangeTombstone],
    keep: &[RangeTombstone],
) -> Result<(bool, usize)> {
    // The writer consumes a plain iterator, so a merge error is parked here
    // and checked afterwards.
    let mut merge = MergeIterator::over_tables(inputs);
    let mut merge_error: Option<anyhow::Error> = None;
    let mut dropped = 0usize;
    let surviving = std::iter::from_fn(|| loop {
        match merge.next_entry() {
            Ok(Some((key, entry))) => {
                if memtable::is_shadowed(shadowing, &key, entry.seq) {
                    dropped += 1;
                    continue;
                }
                return Some((key, entry));
            }
            Ok(None) => return None,
            Err(e) => {
                merge_error = Some(e);
                return None;
            }
        }
    });

    let write_result = SSTableWriter::write_from_iterator(path, surviving, keep);

    if let Some(e) = merge_error {
        let _ = std::fs::remove_file(path.with_extension("sst.tmp"));
        let _ = std::fs::remove_file(path);
        return Err(e);
    }
    Ok((write_result?, dropped))
}

/// A compaction of the tables overlapping some key ranges, planned by
/// [`Engine::plan_range_compaction`]. Holds shared readers only, so it can
/// run while the engine keeps serving reads and writes.
#[derive(Debug)]
pub struct RangeCompaction {
    inputs: Vec<Arc<SSTableReader>>,
    /// Every tombstone visible when the compaction was planned.
    shadowing: Vec<RangeTombstone>,
    /// Input tombstones that still shadow tables outside the compaction.
    kept: Vec<RangeTombstone>,
    output: PathBuf,
}

/// Result of [`RangeCompaction::run`], waiting for
/// [`Engine::install_compaction`].
#[derive(Debug)]
pub struct CompactedTables {
    inputs: Vec<Arc<SSTableReader>>,
    output: Option<Arc<SSTableReader>>,
}

impl RangeCompaction {
    #[must_use]
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    /// Merges the inputs into the output file. Writes nothing when every
    /// version and tombstone is gone.
    pub fn run(self) -> Result<CompactedTables> {
        let (written, dropped) = merge_into(&self.output, &self.inputs, &self.shadowing, &self.kept)?;
        let output = if written {
            Some(Arc::new(SSTableReader::open(&self.output)?))
        } else {
            None
        };

        tracing::debug!(
            inputs = self.inputs.len(),
            dropped,
            kept_range_dels = self.kept.len(),
            output = written,
            "range compaction merged"
        );

        Ok(CompactedTables {
            inputs: self.inputs,
            output,
        })
    }
}

impl Engine {
    /// Compacts all SSTables into one.
    ///
    /// Does nothing when there is a single table without tombstones (or no
    /// table). When nothing survives, every file is removed and the manifest
    /// is emptied.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure during merge, write, or cleanup. On
    /// error the engine keeps its current tables.
    pub fn compact(&mut self) -> Result<()> {
        let total = self.l0_sstables.len() + self.l1_sstables.len();
        let has_tombstones = self.all_sstables().any(|r| !r.range_tombstones().is_empty());
        if total == 0 || (total == 1 && !has_tombstones) {
            return Ok(());
        }

        let inputs: Vec<Arc<SSTableReader>> = self.all_sstables().cloned().collect();
        let tombstones: Vec<RangeTombstone> = inputs
            .iter()
            .flat_map(|r| r.range_tombstones().iter().cloned())
            .collect();
        let input_entries: usize = inputs.iter().map(|r| r.len()).sum();

        let ts = SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis();
        // Distinct from flush output, which may share the same seq and
        // millisecond when compaction runs right after a flush.
        let sst_name = format!("sst-{:020}-{}-l1.sst", self.seq, ts);
        let sst_path = self.sst_dir.join(&sst_name);

        let (written, dropped) = merge_into(&sst_path, &inputs, &tombstones, &[])?;

        if written {
            self.manifest.replace_all_with_l1(sst_name);
        } else {
            self.manifest.entries.clear();
        }
        self.manifest.save()?;

        // Iterator snapshots may still hold the old readers; on Unix the
        // files stay readable through the open handles until they are dropped.
        self.l0_sstables.clear();
        self.l1_sstables.clear();
        for r in &inputs {
            let _ = std::fs::remove_file(r.path());
        }

        if written {
            let reader = SSTableReader::open(&sst_path)?;
            self.l1_sstables.push(Arc::new(reader));
        }

        tracing::debug!(
            inputs = total,
            input_entries,
            dropped,
            range_dels = tombstones.len(),
            output = written,
            "compaction finished"
        );

        Ok(())
    }

    /// Plans a compaction of the tables overlapping any of `ranges`
    /// (`[lower, upper)` pairs). Tables outside the ranges are left alone.
    ///
    /// Returns `None` when no overlapping table holds anything a tombstone
    /// could delete.
    pub fn plan_range_compaction(&mut self, ranges: &[(Vec<u8>, Vec<u8>)]) -> Result<Option<RangeCompaction>> {
        let (inputs, others): (Vec<Arc<SSTableReader>>, Vec<Arc<SSTableReader>>) = self
            .all_sstables()
            .cloned()
            .partition(|r| ranges.iter().any(|(lo, hi)| span_overlaps(r, lo, hi)));

        let shadowing: Vec<RangeTombstone> = self
            .mem
            .range_tombstones()
            .iter()
            .chain(self.all_sstables().flat_map(|r| r.range_tombstones().iter()))
            .filter(|t| inputs.iter().any(|r| span_overlaps(r, &t.start, &t.end)))
            .cloned()
            .collect();
        if shadowing.is_empty() {
            return Ok(None);
        }

        let kept: Vec<RangeTombstone> = inputs
            .iter()
            .flat_map(|r| r.range_tombstones().iter())
            .filter(|t| others.iter().any(|r| span_overlaps(r, &t.start, &t.end)))
            .cloned()
            .collect();

        let ts = SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis();
        self.range_compactions += 1;
        let sst_name = format!("sst-{:020}-{}-r{}.sst", self.seq, ts, self.range_compactions);

        Ok(Some(RangeCompaction {
            inputs,
            shadowing,
            kept,
            output: self.sst_dir.join(sst_name),
        }))
    }

    /// Swaps the inputs of a finished range compaction for its output.
    ///
    /// Returns `Ok(false)` and deletes the output when an input is no longer
    /// live (another compaction replaced it in the meantime).
    pub fn install_compaction(&mut self, done: CompactedTables) -> Result<bool> {
        let live = done
            .inputs
            .iter()
            .all(|input| self.all_sstables().any(|r| Arc::ptr_eq(r, input)));
        if !live {
            if let Some(output) = &done.output {
                let _ = std::fs::remove_file(output.path());
            }
            tracing::debug!(inputs = done.inputs.len(), "range compaction outdated, discarded");
            return Ok(false);
        }

        let removed: Vec<String> = done.inputs.iter().filter_map(|r| file_name(r.path())).collect();
        let mut manifest = self.manifest.clone();
        manifest.remove(&removed);
        if let Some(name) = done.output.as_ref().and_then(|r| file_name(r.path())) {
            manifest.add(name, 1);
        }
        manifest.save()?;
        self.manifest = manifest;

        let is_input = |r: &Arc<SSTableReader>| done.inputs.iter().any(|i| Arc::ptr_eq(i, r));
        self.l0_sstables.retain(|r| !is_input(r));
        self.l1_sstables.retain(|r| !is_input(r));
        if let Some(output) = done.output {
            self.l1_sstables.insert(0, output);
        }
        for r in &done.inputs {
            let _ = std::fs::remove_file(r.path());
        }

        tracing::debug!(removed = removed.len(), "range compaction installed");
        Ok(true)
    }
}
