use anyhow::Result;
use byteorder::{LittleEndian, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use memtable::{Memtable, RangeTombstone, ValueEntry};
use std::fs::{rename, OpenOptions};
use std::io::{BufWriter, Seek, Write};
use std::path::Path;

use crate::format::{write_footer, Footer};

/// Writes sorted entries to disk as an immutable SSTable file.
///
/// Stateless: all work happens in the associated functions. Data is written
/// to `<path>.sst.tmp`, fsynced, and renamed into place, so a crash never
/// leaves a half-written table under the final name.
pub struct SSTableWriter {}

impl SSTableWriter {
    /// Flushes `mem`, point entries and range tombstones, to a new table.
    ///
    /// # Errors
    ///
    /// Fails if the memtable holds nothing at all, or on I/O failure.
    pub fn write_from_memtable(path: &Path, mem: &Memtable) -> Result<()> {
        if mem.is_empty() {
            anyhow::bail!("refusing to write an empty SSTable (empty memtable)");
        }
        let iter = mem.iter().map(|(k, v)| (k.to_vec(), v.clone()));
        Self::write_internal(path, iter, mem.range_tombstones())?;
        Ok(())
    }

    /// Streams `iter` (ascending, deduplicated keys) plus `range_dels` into a
    /// new table without materializing the data set.
    ///
    /// Returns `Ok(false)` and leaves no file behind when there was nothing to
    /// write.
    pub fn write_from_iterator<I>(path: &Path, iter: I, range_dels: &[RangeTombstone]) -> Result<bool>
    where
        I: Iterator<Item = (Vec<u8>, ValueEntry)>,
    {
        Self::write_internal(path, iter, range_dels)
    }

    /// Layout:
    ///
    /// ```text
    /// [DATA]       repeated: crc32(u32) | key_len(u32) | key | seq(u64) | val_len(u32) | val
    /// [RANGE DELS] count(u32), repeated: start_len(u32) | start | end_len(u32) | end | seq(u64)
    /// [INDEX]      repeated: key_len(u32) | key | data_offset(u64)
    /// [FOOTER]     max_seq(u64) | range_del_offset(u64) | index_offset(u64) | magic(u32)
    /// ```
    fn write_internal<I>(path: &Path, iter: I, range_dels: &[RangeTombstone]) -> Result<bool>
    where
        I: Iterator<Item = (Vec<u8>, ValueEntry)>,
    {
        let tmp_path = path.with_extension("sst.tmp");
        let raw_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        let mut file = BufWriter::new(raw_file);

        let mut index: Vec<(Vec<u8>, u64)> = Vec::new();
        let mut max_seq: u64 = 0;
        let mut record_buf: Vec<u8> = Vec::with_capacity(256);

        for (key, entry) in iter {
            max_seq = max_seq.max(entry.seq);

            record_buf.clear();
            record_buf.write_u32::<LittleEndian>(key.len() as u32)?;
            record_buf.extend_from_slice(&key);
            record_buf.write_u64::<LittleEndian>(entry.seq)?;
            record_buf.write_u32::<LittleEndian>(entry.value.len() as u32)?;
            record_buf.extend_from_slice(&entry.value);

            let mut hasher = Crc32::new();
            hasher.update(&record_buf);
            let crc = hasher.finalize();

            let offset = file.stream_position()?;
            file.write_u32::<LittleEndian>(crc)?;
            file.write_all(&record_buf)?;

            index.push((key, offset));
        }

        if index.is_empty() && range_dels.is_empty() {
            drop(file);
            let _ = std::fs::remove_file(&tmp_path);
            return Ok(false);
        }

        let range_del_offset = file.stream_position()?;
        file.write_u32::<LittleEndian>(range_dels.len() as u32)?;
        for t in range_dels {
            max_seq = max_seq.max(t.seq);
            file.write_u32::<LittleEndian>(t.start.len() as u32)?;
            file.write_all(&t.start)?;
            file.write_u32::<LittleEndian>(t.end.len() as u32)?;
            file.write_all(&t.end)?;
            file.write_u64::<LittleEndian>(t.seq)?;
        }

        let index_offset = file.stream_position()?;
        for (key, data_offset) in &index {
            file.write_u32::<LittleEndian>(key.len() as u32)?;
            file.write_all(key)?;
            file.write_u64::<LittleEndian>(*data_offset)?;
        }

        write_footer(
            &mut file,
            &Footer {
                max_seq,
                range_del_offset,
                index_offset,
            },
        )?;

        file.flush()?;
        file.into_inner()?.sync_all()?;

        rename(&tmp_path, path)?;

        // A crash after rename but before the directory is synced can lose
        // the entry on ext4/XFS.
        if let Some(parent) = path.parent() {
            if let Ok(dir) = std::fs::File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        Ok(true)
    }
}
