use anyhow::{Context, Result};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use tempfile::TempDir;

use config::StorageConfig;

use crate::codec;
use crate::error::Result as MapResult;
use crate::map::{KeyPolicy, SortedDiskMap};
use crate::namespace::NamespaceAllocator;
use crate::store::{KvStore, LsmStore};

/// Requests to the background compactor.
#[derive(Debug)]
pub(crate) enum CompactorMsg {
    /// The map with this namespace was closed; its key range is garbage.
    Compact(u64),
    Shutdown,
}

struct Compactor {
    tx: Sender<CompactorMsg>,
    handle: JoinHandle<()>,
}

/// Owner of one shared store and the maps carved out of it.
///
/// [`open`](TempEngine::open) creates a private directory under the
/// configured parent and runs an LSM engine inside it; the directory and all
/// spilled data are removed on [`close`](TempEngine::close) or drop. Every
/// map gets its own namespace from this handle's allocator.
///
/// Shut the engine down only once its maps are idle. Maps outliving it
/// fail every later operation with
/// [`Misuse::EngineShutDown`](crate::Misuse::EngineShutDown).
pub struct TempEngine {
    store: Option<Arc<dyn KvStore>>,
    allocator: NamespaceAllocator,
    config: StorageConfig,
    compactor: Option<Compactor>,
    dir: Option<TempDir>,
}

impl std::fmt::Debug for TempEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TempEngine")
            .field("dir", &self.dir.as_ref().map(|d| d.path().to_path_buf()))
            .field("namespaces_issued", &self.allocator.issued())
            .field("open", &self.store.is_some())
            .finish()
    }
}

impl TempEngine {
    /// Creates the temp directory and opens an engine in it.
    pub fn open(config: StorageConfig) -> Result<Self> {
        let dir = match &config.temp_dir {
            Some(parent) => {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
                tempfile::Builder::new().prefix("spill-").tempdir_in(parent)?
            }
            None => tempfile::Builder::new().prefix("spill-").tempdir()?,
        };
        let store = LsmStore::open(dir.path(), &config)
            .with_context(|| format!("failed to open engine in {}", dir.path().display()))?;

        tracing::info!(dir = %dir.path().display(), "temp engine opened");

        let mut engine = Self::with_store(Arc::new(store), config);
        engine.dir = Some(dir);
        Ok(engine)
    }

    /// Serves maps from an existing store. Nothing is created on disk and
    /// `close` leaves the store's own storage alone.
    pub fn with_store(store: Arc<dyn KvStore>, config: StorageConfig) -> Self {
        let compactor = if config.compact_on_close {
            spawn_compactor(Arc::downgrade(&store))
        } else {
            None
        };
        Self {
            store: Some(store),
            allocator: NamespaceAllocator::new(),
            config,
            compactor,
            dir: None,
        }
    }

    /// The shared store, until shutdown.
    pub fn store(&self) -> Option<&Arc<dyn KvStore>> {
        self.store.as_ref()
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Map with unique keys: a put replaces the previous value of its key.
    pub fn new_sorted_disk_map(&self) -> MapResult<SortedDiskMap> {
        self.new_map(KeyPolicy::Unique)
    }

    /// Map that keeps every put, ordered by key and then by insertion.
    pub fn new_sorted_disk_multi_map(&self) -> MapResult<SortedDiskMap> {
        self.new_map(KeyPolicy::duplicates())
    }

    fn new_map(&self, policy: KeyPolicy) -> MapResult<SortedDiskMap> {
        let store = self
            .store
            .as_ref()
            .ok_or(crate::Misuse::EngineShutDown)?;
        let namespace = self.allocator.allocate()?;
        Ok(SortedDiskMap::new(
            namespace,
            Arc::downgrade(store),
            policy,
            self.config.batch_capacity,
            self.compactor.as_ref().map(|c| c.tx.clone()),
        ))
    }

    /// Stops the compactor, drops the store and removes the temp directory.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        if let Some(compactor) = self.compactor.take() {
            let _ = compactor.tx.send(CompactorMsg::Shutdown);
            if compactor.handle.join().is_err() {
                tracing::warn!("compactor thread panicked");
            }
        }
        let store = match self.store.take() {
            Some(store) => store,
            None => return Ok(()),
        };
        if self.dir.is_some() {
            // Nothing written from here on outlives the directory.
            store.discard();
        }
        drop(store);
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            dir.close()
                .with_context(|| format!("failed to remove {}", path.display()))?;
        }
        tracing::info!(namespaces = self.allocator.issued(), "temp engine shut down");
        Ok(())
    }
}

impl Drop for TempEngine {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::warn!(error = %e, "temp engine shutdown failed");
        }
    }
}

fn spawn_compactor(store: Weak<dyn KvStore>) -> Option<Compactor> {
    let (tx, rx) = mpsc::channel();
    let spawned = std::thread::Builder::new()
        .name("diskmap-compactor".into())
        .spawn(move || run_compactor(store, rx));
    match spawned {
        Ok(handle) => Some(Compactor { tx, handle }),
        Err(e) => {
            tracing::warn!(error = %e, "failed to start compactor, closed maps will not be compacted");
            None
        }
    }
}

/// Compacts the key ranges of closed maps. Requests that pile up while a
/// compaction runs are served by the next one.
fn run_compactor(store: Weak<dyn KvStore>, rx: Receiver<CompactorMsg>) {
    while let Ok(msg) = rx.recv() {
        let mut namespaces = match msg {
            CompactorMsg::Compact(ns) => vec![ns],
            CompactorMsg::Shutdown => return,
        };
        for msg in rx.try_iter() {
            match msg {
                CompactorMsg::Compact(ns) => namespaces.push(ns),
                CompactorMsg::Shutdown => return,
            }
        }

        let store = match store.upgrade() {
            Some(store) => store,
            None => return,
        };
        let ranges: Vec<(Vec<u8>, Vec<u8>)> =
            namespaces.iter().map(|&ns| codec::namespace_bounds(ns)).collect();
        match store.flush().and_then(|()| store.compact_range(&ranges)) {
            Ok(()) => tracing::debug!(?namespaces, "compacted closed namespaces"),
            Err(e) => tracing::warn!(?namespaces, error = %e, "compaction after close failed"),
        }
    }
}
