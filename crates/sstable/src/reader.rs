use anyhow::{bail, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use crc32fast::Hasher as Crc32;
use memtable::{RangeTombstone, ValueEntry};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::ops::Bound;
use std::path::{Path, PathBuf};

use crate::format::{read_footer, Footer, FOOTER_BYTES};

/// Maximum key size we'll allocate during reads (64 KiB). Prevents OOM on corrupt files.
const MAX_KEY_BYTES: usize = 64 * 1024;
/// Maximum value size we'll allocate during reads (10 MiB). Prevents OOM on corrupt files.
const MAX_VALUE_BYTES: usize = 10 * 1024 * 1024;

/// Read handle on one SSTable file.
///
/// [`open`](SSTableReader::open) loads the whole index (key -> data offset)
/// and the range tombstone section into memory; values stay on disk and are
/// fetched with one seek + read per lookup through a persistent file handle.
///
/// Readers are immutable after open and are shared between the engine and
/// any live iterator snapshots.
pub struct SSTableReader {
    path: PathBuf,
    index: BTreeMap<Vec<u8>, u64>,
    range_dels: Vec<RangeTombstone>,
    file: Mutex<BufReader<File>>,
    footer: Footer,
}

impl std::fmt::Debug for SSTableReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SSTableReader")
            .field("path", &self.path)
            .field("entries", &self.index.len())
            .field("range_dels", &self.range_dels.len())
            .field("max_seq", &self.footer.max_seq)
            .finish()
    }
}

impl SSTableReader {
    /// Opens an SSTable file and loads its index and range tombstones.
    ///
    /// # Errors
    ///
    /// Fails if the footer is missing or malformed, a section is truncated,
    /// or any I/O operation fails.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_buf = path.as_ref().to_path_buf();
        let mut f = File::open(&path_buf)?;
        let filesize = f.metadata()?.len();

        if filesize < FOOTER_BYTES {
            bail!("sstable file too small");
        }
        let footer = read_footer(&mut f)?;

        f.seek(SeekFrom::Start(footer.range_del_offset))?;
        let count = f.read_u32::<LittleEndian>()? as usize;
        let mut range_dels = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let start = read_key(&mut f)?;
            let end = read_key(&mut f)?;
            let seq = f.read_u64::<LittleEndian>()?;
            range_dels.push(RangeTombstone { start, end, seq });
        }
        if f.stream_position()? != footer.index_offset {
            bail!("corrupt range tombstone section");
        }

        let mut index = BTreeMap::new();
        while f.stream_position()? < (filesize - FOOTER_BYTES) {
            let key = read_key(&mut f)?;
            let data_offset = f.read_u64::<LittleEndian>()?;
            if data_offset >= footer.range_del_offset {
                bail!("corrupt index: data offset {} out of range", data_offset);
            }
            index.insert(key, data_offset);
        }

        f.seek(SeekFrom::Start(0))?;

        Ok(Self {
            path: path_buf,
            index,
            range_dels,
            file: Mutex::new(BufReader::new(f)),
            footer,
        })
    }

    /// Point lookup for a single key. `Ok(None)` when the key is not in this
    /// table. Range tombstones are *not* applied here; the caller resolves
    /// shadowing across all tables.
    ///
    /// # Errors
    ///
    /// I/O failure, a record whose key does not match the index, or a CRC32
    /// mismatch.
    pub fn get(&self, key: &[u8]) -> Result<Option<ValueEntry>> {
        let offset = match self.index.get(key) {
            Some(&o) => o,
            None => return Ok(None),
        };

        let mut f = self.file.lock();
        f.seek(SeekFrom::Start(offset))?;

        let stored_crc = f.read_u32::<LittleEndian>()?;

        let key_len = f.read_u32::<LittleEndian>()? as usize;
        if key_len > MAX_KEY_BYTES {
            bail!("corrupt data: key_len {} exceeds maximum {}", key_len, MAX_KEY_BYTES);
        }
        let mut key_buf = vec![0u8; key_len];
        f.read_exact(&mut key_buf)?;
        if key_buf.as_slice() != key {
            bail!("index pointed to mismatching key at offset {}", offset);
        }

        let seq = f.read_u64::<LittleEndian>()?;
        let val_len = f.read_u32::<LittleEndian>()? as usize;
        if val_len > MAX_VALUE_BYTES {
            bail!("corrupt data: val_len {} exceeds maximum {}", val_len, MAX_VALUE_BYTES);
        }
        let mut value = vec![0u8; val_len];
        f.read_exact(&mut value)?;

        let mut hasher = Crc32::new();
        hasher.update(&(key_len as u32).to_le_bytes());
        hasher.update(&key_buf);
        hasher.update(&seq.to_le_bytes());
        hasher.update(&(val_len as u32).to_le_bytes());
        hasher.update(&value);
        let actual_crc = hasher.finalize();
        if actual_crc != stored_crc {
            bail!(
                "CRC32 mismatch at offset {} in {}: expected {:#010x}, got {:#010x}",
                offset,
                self.path.display(),
                stored_crc,
                actual_crc
            );
        }

        Ok(Some(ValueEntry { seq, value }))
    }

    /// First key `>= target` (or `> target` when `inclusive` is false).
    pub fn seek_key(&self, target: &[u8], inclusive: bool) -> Option<&[u8]> {
        let lo = if inclusive {
            Bound::Included(target)
        } else {
            Bound::Excluded(target)
        };
        self.index
            .range::<[u8], _>((lo, Bound::Unbounded))
            .next()
            .map(|(k, _)| k.as_slice())
    }

    pub fn range_tombstones(&self) -> &[RangeTombstone] {
        &self.range_dels
    }

    /// Highest sequence number of any entry or tombstone in the file.
    #[must_use]
    pub fn max_seq(&self) -> u64 {
        self.footer.max_seq
    }

    /// Smallest key covered by this table, counting tombstone spans.
    pub fn smallest_key(&self) -> Option<&[u8]> {
        let point = self.index.keys().next().map(|k| k.as_slice());
        let span = self.range_dels.iter().map(|t| t.start.as_slice()).min();
        match (point, span) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Largest key covered by this table; for tombstones this is the
    /// exclusive end of the span.
    pub fn largest_key(&self) -> Option<&[u8]> {
        let point = self.index.keys().next_back().map(|k| k.as_slice());
        let span = self.range_dels.iter().map(|t| t.end.as_slice()).max();
        match (point, span) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of point entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// All keys in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = &[u8]> {
        self.index.keys().map(|k| k.as_slice())
    }
}

fn read_key<R: Read>(r: &mut R) -> Result<Vec<u8>> {
    let len = r.read_u32::<LittleEndian>()? as usize;
    if len > MAX_KEY_BYTES {
        bail!("corrupt data: key_len {} exceeds maximum {}", len, MAX_KEY_BYTES);
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}
