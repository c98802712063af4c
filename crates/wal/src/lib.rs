//! # WAL - Write-Ahead Log
//!
//! Every mutation the engine accepts is appended here before it touches the
//! memtable, so that a reopened engine can rebuild the memtable it lost.
//!
//! Mutations are written in **groups**: one call to
//! [`WalWriter::append_group`] produces exactly one checksummed frame, and the
//! reader hands a frame's records to the caller only after the whole frame has
//! been read and verified. A write batch therefore replays entirely or not at
//! all.
//!
//! ## Binary Frame Format
//!
//! ```text
//! [frame_len: u32 LE][crc32: u32 LE][count: u32 LE][record ...]
//! ```
//!
//! `frame_len` covers the CRC and everything after it, but not itself. The CRC
//! covers `count` and the records.
//!
//! Record (Put):         `[seq: u64][op=0: u8][key_len: u32][key][val_len: u32][value]`
//! Record (DeleteRange): `[seq: u64][op=1: u8][start_len: u32][start][end_len: u32][end]`
//!
//! ## Example
//!
//! ```rust,no_run
//! use wal::{WalWriter, WalReader, WalRecord};
//!
//! let mut w = WalWriter::create("wal.log", true).unwrap();
//! w.append_group(&[
//!     WalRecord::Put { seq: 1, key: b"a".to_vec(), value: b"1".to_vec() },
//!     WalRecord::DeleteRange { seq: 2, start: b"a".to_vec(), end: b"b".to_vec() },
//! ]).unwrap();
//! drop(w);
//!
//! let mut r = WalReader::open("wal.log").unwrap();
//! r.replay(|rec| println!("{:?}", rec)).unwrap();
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

use thiserror::Error;

const OP_PUT: u8 = 0;
const OP_DELETE_RANGE: u8 = 1;

/// Frames larger than this are treated as corruption rather than allocated.
const MAX_FRAME_SIZE: u32 = 256 * 1024 * 1024;

/// A single logged mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    /// A key-value insertion.
    Put {
        seq: u64,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    /// Deletion of every key in `[start, end)` older than `seq`.
    DeleteRange {
        seq: u64,
        start: Vec<u8>,
        end: Vec<u8>,
    },
}

impl WalRecord {
    pub fn seq(&self) -> u64 {
        match self {
            WalRecord::Put { seq, .. } | WalRecord::DeleteRange { seq, .. } => *seq,
        }
    }
}

#[derive(Debug, Error)]
pub enum WalError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A frame failed CRC validation or contained an unknown op code.
    #[error("corrupt record")]
    Corrupt,
}

/// Append-only WAL writer.
///
/// A frame is serialized into a reusable buffer and handed to the file in a
/// single `write_all`. With `sync` set, every append is followed by
/// `sync_all()`.
pub struct WalWriter {
    file: File,
    sync: bool,
    buf: Vec<u8>,
}

impl WalWriter {
    /// Opens (or creates) a WAL file in append mode.
    pub fn create<P: AsRef<Path>>(path: P, sync: bool) -> Result<Self, WalError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)?;
        Ok(Self {
            file,
            sync,
            buf: Vec::with_capacity(256),
        })
    }

    /// Appends a single record as its own frame.
    pub fn append(&mut self, record: &WalRecord) -> Result<(), WalError> {
        self.append_group(std::slice::from_ref(record))
    }

    /// Appends `records` as one frame. An empty group writes nothing.
    pub fn append_group(&mut self, records: &[WalRecord]) -> Result<(), WalError> {
        if records.is_empty() {
            return Ok(());
        }

        self.buf.clear();
        // frame_len + crc, filled in once the body is known
        self.buf.extend_from_slice(&[0u8; 8]);
        self.buf.write_u32::<LittleEndian>(records.len() as u32)?;

        for record in records {
            match record {
                WalRecord::Put { seq, key, value } => {
                    self.buf.write_u64::<LittleEndian>(*seq)?;
                    self.buf.write_u8(OP_PUT)?;
                    write_bytes(&mut self.buf, key)?;
                    write_bytes(&mut self.buf, value)?;
                }
                WalRecord::DeleteRange { seq, start, end } => {
                    self.buf.write_u64::<LittleEndian>(*seq)?;
                    self.buf.write_u8(OP_DELETE_RANGE)?;
                    write_bytes(&mut self.buf, start)?;
                    write_bytes(&mut self.buf, end)?;
                }
            }
        }

        let body = &self.buf[8..];
        let mut hasher = Crc32::new();
        hasher.update(body);
        let crc = hasher.finalize();

        let frame_len = (body.len() as u64) + 4;
        if frame_len > MAX_FRAME_SIZE as u64 {
            return Err(WalError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("WAL frame too large: {} bytes", frame_len),
            )));
        }

        self.buf[0..4].copy_from_slice(&(frame_len as u32).to_le_bytes());
        self.buf[4..8].copy_from_slice(&crc.to_le_bytes());

        self.file.write_all(&self.buf)?;
        self.file.flush()?;

        if self.sync {
            self.file.sync_all()?;
        }

        Ok(())
    }

    /// Forces everything written so far to stable storage.
    pub fn sync_to_disk(&mut self) -> Result<(), WalError> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) -> io::Result<()> {
    buf.write_u32::<LittleEndian>(bytes.len() as u32)?;
    buf.extend_from_slice(bytes);
    Ok(())
}

fn read_bytes(body: &mut &[u8], limit: usize) -> Result<Vec<u8>, WalError> {
    let len = body.read_u32::<LittleEndian>()? as usize;
    if len > limit {
        return Err(WalError::Corrupt);
    }
    let mut out = vec![0u8; len];
    body.read_exact(&mut out)?;
    Ok(out)
}

/// Sequential WAL reader, generic over any `Read` so tests can feed it an
/// in-memory buffer.
///
/// A truncated tail frame (crash mid-write) is treated as a clean end of log.
pub struct WalReader<R: Read> {
    rdr: BufReader<R>,
}

impl WalReader<File> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<WalReader<File>, WalError> {
        let f = File::open(path)?;
        Ok(WalReader {
            rdr: BufReader::new(f),
        })
    }
}

impl<R: Read> WalReader<R> {
    pub fn from_reader(reader: R) -> Self {
        WalReader {
            rdr: BufReader::new(reader),
        }
    }

    /// Replays every complete frame, calling `apply` for each record in log
    /// order.
    ///
    /// - Clean EOF or a truncated tail frame -> `Ok(())`.
    /// - CRC mismatch, unknown op code or impossible lengths -> `WalError::Corrupt`.
    pub fn replay<F>(&mut self, mut apply: F) -> Result<(), WalError>
    where
        F: FnMut(WalRecord),
    {
        let mut body = Vec::with_capacity(256);
        let mut group = Vec::new();

        loop {
            let frame_len = match self.rdr.read_u32::<LittleEndian>() {
                Ok(v) => v,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(WalError::Io(e)),
            };
            if frame_len <= 4 || frame_len > MAX_FRAME_SIZE {
                return Err(WalError::Corrupt);
            }

            let crc = match self.rdr.read_u32::<LittleEndian>() {
                Ok(v) => v,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(WalError::Io(e)),
            };

            let body_len = (frame_len - 4) as usize;
            body.clear();
            body.resize(body_len, 0);
            match self.rdr.read_exact(&mut body) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(WalError::Io(e)),
            }

            let mut hasher = Crc32::new();
            hasher.update(&body);
            if hasher.finalize() != crc {
                return Err(WalError::Corrupt);
            }

            // Decode the whole frame before applying any of it.
            group.clear();
            let mut br = &body[..];
            let count = br.read_u32::<LittleEndian>()?;
            if count == 0 {
                return Err(WalError::Corrupt);
            }
            for _ in 0..count {
                let seq = br.read_u64::<LittleEndian>()?;
                let op = br.read_u8()?;
                let first = read_bytes(&mut br, body_len)?;
                let second = read_bytes(&mut br, body_len)?;
                group.push(match op {
                    OP_PUT => WalRecord::Put {
                        seq,
                        key: first,
                        value: second,
                    },
                    OP_DELETE_RANGE => WalRecord::DeleteRange {
                        seq,
                        start: first,
                        end: second,
                    },
                    _ => return Err(WalError::Corrupt),
                });
            }
            if !br.is_empty() {
                return Err(WalError::Corrupt);
            }

            for record in group.drain(..) {
                apply(record);
            }
        }
    }
}
