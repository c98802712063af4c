use super::helpers::*;
use crate::*;
use anyhow::{ensure, Result};
use std::path::{Path, PathBuf};

fn spill_dirs(parent: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(parent)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with("spill-") {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}

#[test]
fn open_creates_a_private_dir_and_close_removes_it() -> Result<()> {
    let parent = tempfile::tempdir()?;
    let engine = TempEngine::open(StorageConfig {
        temp_dir: Some(parent.path().to_path_buf()),
        ..StorageConfig::default()
    })?;

    let dirs = spill_dirs(parent.path())?;
    assert_eq!(dirs.len(), 1);
    assert!(dirs[0].join(engine::WAL_FILENAME).exists());

    let map = engine.new_sorted_disk_map()?;
    map.put(b"k", b"v")?;
    engine.store().unwrap().flush()?;
    map.close()?;

    engine.close()?;
    assert!(spill_dirs(parent.path())?.is_empty());
    Ok(())
}

#[test]
fn drop_removes_the_dir() -> Result<()> {
    let parent = tempfile::tempdir()?;
    {
        let engine = TempEngine::open(StorageConfig {
            temp_dir: Some(parent.path().to_path_buf()),
            ..StorageConfig::default()
        })?;
        let map = engine.new_sorted_disk_multi_map()?;
        map.put(b"k", b"v")?;
        drop(map);
        assert_eq!(spill_dirs(parent.path())?.len(), 1);
    }
    assert!(spill_dirs(parent.path())?.is_empty());
    Ok(())
}

#[test]
fn missing_parent_dir_is_created() -> Result<()> {
    let root = tempfile::tempdir()?;
    let parent = root.path().join("nested").join("spill");
    let engine = TempEngine::open(StorageConfig {
        temp_dir: Some(parent.clone()),
        ..StorageConfig::default()
    })?;

    assert_eq!(spill_dirs(&parent)?.len(), 1);
    engine.close()?;
    assert!(parent.exists());
    Ok(())
}

#[test]
fn engines_are_independent() -> Result<()> {
    let a = fixture()?;
    let b = fixture()?;
    let map_a = a.engine.new_sorted_disk_map()?;
    let map_b = b.engine.new_sorted_disk_map()?;
    assert_eq!(map_a.namespace(), map_b.namespace());

    map_a.put(b"k", b"a")?;
    map_b.put(b"k", b"b")?;
    assert_eq!(map_a.get(b"k")?, Some(b"a".to_vec()));
    assert_eq!(map_b.get(b"k")?, Some(b"b".to_vec()));
    Ok(())
}

#[test]
fn closing_a_map_compacts_its_data_away() -> Result<()> {
    let fx = fixture()?;
    let store = fx.engine.store().unwrap().clone();
    let map = fx.engine.new_sorted_disk_map()?;
    for i in 0..200u32 {
        map.put(&i.to_be_bytes(), &[1u8; 32])?;
    }
    store.flush()?;
    assert_eq!(store.sstables().len(), 1);

    map.close()?;
    succeeds_soon(|| {
        let tables = store.sstables();
        ensure!(tables.is_empty(), "still {} tables", tables.len());
        Ok(())
    })?;
    Ok(())
}

#[test]
fn compaction_keeps_live_maps() -> Result<()> {
    let fx = fixture()?;
    let store = fx.engine.store().unwrap().clone();
    let doomed = fx.engine.new_sorted_disk_map()?;
    let kept = fx.engine.new_sorted_disk_map()?;
    for i in 0..100u32 {
        doomed.put(&i.to_be_bytes(), b"doomed")?;
        kept.put(&i.to_be_bytes(), b"kept")?;
    }
    store.flush()?;

    doomed.close()?;
    succeeds_soon(|| {
        let tables = store.sstables();
        ensure!(
            tables.len() == 1 && tables[0].level == 1,
            "not compacted yet: {:?}",
            tables.iter().map(|t| t.level).collect::<Vec<_>>()
        );
        Ok(())
    })?;

    let tables = store.sstables();
    assert_eq!(tables[0].entries, 100);
    assert_eq!(tables[0].smallest, codec::encode_key(kept.namespace(), &0u32.to_be_bytes()));
    assert_eq!(entries(&kept)?.len(), 100);
    drop(store);
    Ok(())
}

#[test]
fn compaction_on_close_can_be_disabled() -> Result<()> {
    let fx = fixture_with(no_compaction())?;
    let store = fx.engine.store().unwrap().clone();
    let map = fx.engine.new_sorted_disk_map()?;
    map.put(b"k", b"v")?;
    store.flush()?;

    map.close()?;
    std::thread::sleep(std::time::Duration::from_millis(50));
    // The data table is untouched; only the deletion is pending in memory.
    let tables = store.sstables();
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].level, 0);
    assert_eq!(tables[0].entries, 1);
    assert!(raw_entries(&store)?.is_empty());
    drop(store);
    Ok(())
}

#[test]
fn maps_fail_once_the_engine_is_dropped() -> Result<()> {
    let fx = fixture()?;
    let map = fx.engine.new_sorted_disk_map()?;
    let Fixture { engine, parent } = fx;
    drop(engine);

    assert_eq!(map.put(b"k", b"v").unwrap_err().misuse(), Some(Misuse::EngineShutDown));
    assert!(spill_dirs(parent.path())?.is_empty());
    Ok(())
}

#[test]
fn debug_shows_state() -> Result<()> {
    let fx = fixture()?;
    let _map = fx.engine.new_sorted_disk_map()?;
    let shown = format!("{:?}", fx.engine);
    assert!(shown.contains("namespaces_issued: 1"), "{}", shown);
    assert!(shown.contains("open: true"), "{}", shown);
    Ok(())
}

#[test]
fn closing_a_small_map_leaves_big_tables_alone() -> Result<()> {
    let fx = fixture()?;
    let store = fx.engine.store().unwrap().clone();
    let big = fx.engine.new_sorted_disk_map()?;
    let small = fx.engine.new_sorted_disk_map()?;

    let mut writer = big.new_batch_writer_with_capacity(500)?;
    for i in 0..5000u32 {
        writer.put(&i.to_be_bytes(), &[7u8; 16])?;
    }
    writer.close()?;
    store.flush()?;
    small.put(b"k", b"v")?;
    store.flush()?;
    assert_eq!(store.sstables().len(), 2);

    small.close()?;
    succeeds_soon(|| {
        let tables = store.sstables();
        ensure!(tables.len() == 1, "still {} tables", tables.len());
        Ok(())
    })?;

    // The big map's table was neither rewritten nor promoted.
    let tables = store.sstables();
    assert_eq!(tables[0].level, 0);
    assert_eq!(tables[0].entries, 5000);
    assert_eq!(tables[0].smallest, codec::encode_key(big.namespace(), &0u32.to_be_bytes()));
    assert_eq!(entries(&big)?.len(), 5000);
    drop(store);
    Ok(())
}

#[test]
fn discarded_store_writes_no_table_on_drop() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = LsmStore::open(dir.path(), &StorageConfig::default())?;
    store.put(b"k", b"v")?;
    store.discard();
    drop(store);

    let tables = std::fs::read_dir(dir.path().join(engine::SST_DIRNAME))?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().map_or(false, |ext| ext == "sst"))
        .count();
    assert_eq!(tables, 0);
    Ok(())
}

#[test]
fn shutdown_drops_unflushed_writes() -> Result<()> {
    let fx = fixture()?;
    let store = fx.engine.store().unwrap().clone();
    let map = fx.engine.new_sorted_disk_map()?;
    map.put(b"k", b"v")?;
    assert_eq!(raw_entries(&store)?.len(), 1);

    let Fixture { engine, parent } = fx;
    engine.close()?;

    // Still reachable through the extra handle, but nothing is left to flush
    // into the removed directory.
    assert!(raw_entries(&store)?.is_empty());
    assert!(store.sstables().is_empty());
    drop(store);
    drop(parent);
    Ok(())
}
