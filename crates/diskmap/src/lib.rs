//! # Diskmap - Sandboxed Sorted Maps on a Shared Engine
//!
//! Spill space for operators that outgrow memory (external sorts, grouped
//! aggregation, join build sides, distinct). Many independent sorted maps
//! share one embedded ordered store; each map lives in its own namespace and
//! can neither see nor disturb the others.
//!
//! ## Layout
//!
//! ```text
//! TempEngine ── owns ──> store (Arc<dyn KvStore>) + NamespaceAllocator
//!     │                      ^
//!     │ new_sorted_disk_map  │ Weak
//!     v                      │
//! SortedDiskMap ─────────────┘  namespace id, key policy
//!     ├── BatchWriter     buffered puts, applied as atomic batches
//!     └── ScopedIterator  [prefix(id), prefix(id + 1)) of the store
//! ```
//!
//! Every engine key is `prefix(id) ++ user_key`, plus an 8-byte insertion
//! sequence for maps that allow duplicate keys (see [`codec`]). Closing a
//! map range-deletes its whole namespace; the space is reclaimed by a
//! background compaction.
//!
//! ## Example
//!
//! ```rust,no_run
//! use diskmap::{StorageConfig, TempEngine};
//!
//! let engine = TempEngine::open(StorageConfig::default()).unwrap();
//! let map = engine.new_sorted_disk_map().unwrap();
//!
//! let mut writer = map.new_batch_writer().unwrap();
//! writer.put(b"b", b"2").unwrap();
//! writer.put(b"a", b"1").unwrap();
//! writer.close().unwrap();
//!
//! let mut it = map.new_iterator().unwrap();
//! it.rewind();
//! while it.valid().unwrap() {
//!     println!("{:?} = {:?}", it.key().unwrap(), it.value().unwrap());
//!     it.next();
//! }
//! it.close();
//!
//! map.close().unwrap();
//! engine.close().unwrap();
//! ```

mod batch;
pub mod codec;
mod error;
mod iter;
mod map;
mod namespace;
mod store;
mod temp_engine;

pub use batch::BatchWriter;
pub use config::StorageConfig;
pub use error::{DiskMapError, Misuse, Result};
pub use iter::ScopedIterator;
pub use map::SortedDiskMap;
pub use namespace::NamespaceAllocator;
pub use store::{KvStore, LsmStore, StoreIterator};
pub use temp_engine::TempEngine;

pub use engine::{SstInfo, WriteBatch};

#[cfg(test)]
mod tests;
