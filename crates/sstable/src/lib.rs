//! # SSTable - Sorted String Table
//!
//! Immutable, on-disk tables produced when the engine flushes its memtable or
//! compacts existing tables. Once written a table is never modified, only
//! replaced by compaction, so readers can be shared freely between the engine
//! and open iterator snapshots.
//!
//! ## File layout
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ DATA SECTION (sorted key/value records)                       │
//! │   crc32 (u32) | key_len (u32) | key | seq (u64)               │
//! │   val_len (u32) | val                                         │
//! │   The CRC32 covers key_len through the end of the value.      │
//! ├───────────────────────────────────────────────────────────────┤
//! │ RANGE TOMBSTONE SECTION                                       │
//! │   count (u32), then per tombstone:                            │
//! │   start_len (u32) | start | end_len (u32) | end | seq (u64)   │
//! ├───────────────────────────────────────────────────────────────┤
//! │ INDEX SECTION (key -> data_offset)                            │
//! │   key_len (u32) | key | data_offset (u64)                     │
//! ├───────────────────────────────────────────────────────────────┤
//! │ FOOTER (last 28 bytes)                                        │
//! │   max_seq (u64) | range_del_offset (u64)                      │
//! │   index_offset (u64) | magic (u32) "SPL1"                     │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian.

mod format;
mod merge;
mod reader;
mod writer;

pub use format::{FOOTER_BYTES, SSTABLE_MAGIC};
pub use merge::{MergeIterator, MergeSource};
pub use reader::SSTableReader;
pub use writer::SSTableWriter;
