use crate::*;
use anyhow::{anyhow, bail};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// A temp engine whose directory lives under a test-owned parent. The engine
/// is declared first so it shuts down before the parent is removed.
pub struct Fixture {
    pub engine: TempEngine,
    pub parent: TempDir,
}

pub fn fixture_with(config: StorageConfig) -> anyhow::Result<Fixture> {
    let parent = tempfile::tempdir()?;
    let engine = TempEngine::open(StorageConfig {
        temp_dir: Some(parent.path().to_path_buf()),
        ..config
    })?;
    Ok(Fixture { engine, parent })
}

pub fn fixture() -> anyhow::Result<Fixture> {
    fixture_with(StorageConfig::default())
}

/// Every `(key, value)` of a map, in iteration order.
pub fn entries(map: &SortedDiskMap) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let mut it = map.new_iterator()?;
    it.rewind();
    let mut out = Vec::new();
    while it.valid()? {
        out.push((it.key()?.to_vec(), it.value()?.to_vec()));
        it.next();
    }
    it.close();
    Ok(out)
}

/// Every raw `(key, value)` in the shared store, across all namespaces.
pub fn raw_entries(store: &Arc<dyn KvStore>) -> anyhow::Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let mut it = store.new_iterator(&[], &[0xFF])?;
    it.seek(&[])?;
    let mut out = Vec::new();
    while let (Some(k), Some(v)) = (it.key(), it.value()) {
        out.push((k.to_vec(), v.to_vec()));
        it.next()?;
    }
    Ok(out)
}

/// Polls `check` until it passes or five seconds have gone by.
pub fn succeeds_soon<F>(mut check: F) -> anyhow::Result<()>
where
    F: FnMut() -> anyhow::Result<()>,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match check() {
            Ok(()) => return Ok(()),
            Err(e) if Instant::now() >= deadline => return Err(e),
            Err(_) => std::thread::sleep(Duration::from_millis(10)),
        }
    }
}

/// A store on which every operation fails.
pub struct FailingStore;

impl KvStore for FailingStore {
    fn put(&self, _: &[u8], _: &[u8]) -> anyhow::Result<()> {
        bail!("injected failure")
    }

    fn get(&self, _: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
        bail!("injected failure")
    }

    fn apply_batch(&self, _: WriteBatch) -> anyhow::Result<()> {
        bail!("injected failure")
    }

    fn new_iterator(&self, _: &[u8], _: &[u8]) -> anyhow::Result<Box<dyn StoreIterator>> {
        Ok(Box::new(ScriptedIterator::failing()))
    }

    fn delete_range(&self, _: &[u8], _: &[u8]) -> anyhow::Result<()> {
        bail!("injected failure")
    }
}

/// A store whose iterators replay fixed raw entries from the start on any
/// seek, whatever the bounds.
/// Writes are accepted and dropped.
pub struct ScriptedStore {
    pub entries: Vec<(Vec<u8>, Vec<u8>)>,
}

impl KvStore for ScriptedStore {
    fn put(&self, _: &[u8], _: &[u8]) -> anyhow::Result<()> {
        Ok(())
    }

    fn get(&self, _: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn apply_batch(&self, _: WriteBatch) -> anyhow::Result<()> {
        Ok(())
    }

    fn new_iterator(&self, _: &[u8], _: &[u8]) -> anyhow::Result<Box<dyn StoreIterator>> {
        Ok(Box::new(ScriptedIterator {
            entries: self.entries.clone(),
            pos: None,
            fail: false,
        }))
    }

    fn delete_range(&self, _: &[u8], _: &[u8]) -> anyhow::Result<()> {
        Ok(())
    }
}

pub struct ScriptedIterator {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    pos: Option<usize>,
    fail: bool,
}

impl ScriptedIterator {
    fn failing() -> Self {
        Self {
            entries: Vec::new(),
            pos: None,
            fail: true,
        }
    }

    fn current(&self) -> Option<&(Vec<u8>, Vec<u8>)> {
        self.pos.and_then(|p| self.entries.get(p))
    }
}

impl StoreIterator for ScriptedIterator {
    fn seek(&mut self, _: &[u8]) -> anyhow::Result<()> {
        if self.fail {
            return Err(anyhow!("injected failure"));
        }
        self.pos = Some(0);
        Ok(())
    }

    fn next(&mut self) -> anyhow::Result<()> {
        self.pos = self.pos.map(|p| p + 1);
        Ok(())
    }

    fn valid(&self) -> bool {
        self.current().is_some()
    }

    fn key(&self) -> Option<&[u8]> {
        self.current().map(|(k, _)| k.as_slice())
    }

    fn value(&self) -> Option<&[u8]> {
        self.current().map(|(_, v)| v.as_slice())
    }
}

/// Config for maps over a fake store: no compactor thread.
pub fn no_compaction() -> StorageConfig {
    StorageConfig {
        compact_on_close: false,
        ..StorageConfig::default()
    }
}
