use super::helpers::{keys, open, scan};
use crate::*;
use anyhow::Result;
use tempfile::tempdir;

fn fill(engine: &mut Engine, ks: &[&[u8]]) -> Result<()> {
    for k in ks {
        engine.put(k.to_vec(), k.to_vec())?;
    }
    Ok(())
}

#[test]
fn full_range_is_sorted() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open(dir.path(), 1024 * 1024)?;
    fill(&mut engine, &[b"c", b"a", b"b"])?;

    let out = scan(&engine, b"", None)?;
    assert_eq!(keys(&out), vec![b"a".as_slice(), b"b".as_slice(), b"c".as_slice()]);
    assert_eq!(out[0].1, b"a");
    Ok(())
}

#[test]
fn bounds_are_half_open() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open(dir.path(), 1024 * 1024)?;
    fill(&mut engine, &[b"a", b"b", b"c", b"d", b"e"])?;

    let out = scan(&engine, b"b", Some(b"d"))?;
    assert_eq!(keys(&out), vec![b"b".as_slice(), b"c".as_slice()]);
    Ok(())
}

#[test]
fn seek_is_clamped_to_lower_bound() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open(dir.path(), 1024 * 1024)?;
    fill(&mut engine, &[b"a", b"c", b"e"])?;

    let mut it = engine.iter(b"b", None);
    it.seek(b"a")?;
    assert_eq!(it.key(), Some(b"c".as_slice()));

    it.seek(b"d")?;
    assert_eq!(it.key(), Some(b"e".as_slice()));
    Ok(())
}

#[test]
fn unpositioned_and_exhausted_states() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open(dir.path(), 1024 * 1024)?;
    fill(&mut engine, &[b"a"])?;

    let mut it = engine.iter(b"", None);
    assert!(!it.valid());
    assert!(it.key().is_none());

    it.seek(b"")?;
    assert!(it.valid());
    it.next()?;
    assert!(!it.valid());
    it.next()?;
    assert!(!it.valid());
    assert!(it.value().is_none());
    Ok(())
}

#[test]
fn merges_memtable_and_sstables_newest_wins() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open(dir.path(), 1024 * 1024)?;

    engine.put(b"a".to_vec(), b"old".to_vec())?;
    engine.put(b"b".to_vec(), b"disk".to_vec())?;
    engine.force_flush()?;
    engine.put(b"a".to_vec(), b"new".to_vec())?;
    engine.put(b"c".to_vec(), b"mem".to_vec())?;

    let out = scan(&engine, b"", None)?;
    assert_eq!(
        out,
        vec![
            (b"a".to_vec(), b"new".to_vec()),
            (b"b".to_vec(), b"disk".to_vec()),
            (b"c".to_vec(), b"mem".to_vec()),
        ]
    );
    Ok(())
}

#[test]
fn skips_range_deleted_keys_in_every_layer() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open(dir.path(), 1024 * 1024)?;

    fill(&mut engine, &[b"k1", b"k2"])?;
    engine.force_flush()?;
    fill(&mut engine, &[b"k3", b"k4"])?;
    engine.delete_range(b"k2".to_vec(), b"k4".to_vec())?;

    let out = scan(&engine, b"", None)?;
    assert_eq!(keys(&out), vec![b"k1".as_slice(), b"k4".as_slice()]);
    Ok(())
}

#[test]
fn snapshot_ignores_later_writes_flushes_and_compactions() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open(dir.path(), 1024 * 1024)?;

    fill(&mut engine, &[b"a", b"b"])?;
    engine.force_flush()?;
    fill(&mut engine, &[b"c"])?;

    let mut it = engine.iter(b"", None);

    engine.put(b"d".to_vec(), b"d".to_vec())?;
    engine.delete_range(b"a".to_vec(), b"c".to_vec())?;
    engine.force_flush()?;
    engine.compact()?;

    it.seek(b"")?;
    let mut seen = Vec::new();
    while it.valid() {
        seen.push(it.key().unwrap().to_vec());
        it.next()?;
    }
    assert_eq!(seen, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);

    // A fresh iterator sees the new state.
    let out = scan(&engine, b"", None)?;
    assert_eq!(keys(&out), vec![b"c".as_slice(), b"d".as_slice()]);
    Ok(())
}

#[test]
fn empty_range() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open(dir.path(), 1024 * 1024)?;
    fill(&mut engine, &[b"a", b"z"])?;

    assert!(scan(&engine, b"m", Some(b"n"))?.is_empty());
    Ok(())
}

#[test]
fn newer_l0_beats_l1() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open(dir.path(), 1024 * 1024)?;
    engine.set_l0_compaction_trigger(0);

    engine.put(b"k".to_vec(), b"v1".to_vec())?;
    engine.force_flush()?;
    engine.put(b"x".to_vec(), b"x".to_vec())?;
    engine.force_flush()?;
    engine.compact()?;
    assert_eq!(engine.l1_sstable_count(), 1);

    engine.put(b"k".to_vec(), b"v2".to_vec())?;
    engine.force_flush()?;
    assert_eq!(engine.l0_sstable_count(), 1);

    assert_eq!(engine.get(b"k")?.unwrap().1, b"v2");
    let out = scan(&engine, b"k", Some(b"l"))?;
    assert_eq!(out, vec![(b"k".to_vec(), b"v2".to_vec())]);
    Ok(())
}
