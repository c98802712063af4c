use super::helpers::*;
use crate::*;
use anyhow::Result;

fn scenario_writes(map: &SortedDiskMap) -> Result<()> {
    map.put(b"k1", b"v1")?;
    map.put(b"k1", b"v1")?;
    map.put(b"k1", b"v2")?;

    let mut writer = map.new_batch_writer()?;
    writer.put(b"k1", b"v2")?;
    writer.put(b"k1", b"v1")?;
    writer.put(b"k1", b"v1")?;
    writer.close()?;
    Ok(())
}

#[test]
fn unique_map_keeps_last_write() -> Result<()> {
    let fx = fixture()?;
    let map = fx.engine.new_sorted_disk_map()?;
    scenario_writes(&map)?;

    assert_eq!(map.get(b"k1")?, Some(b"v1".to_vec()));
    assert_eq!(entries(&map)?, vec![(b"k1".to_vec(), b"v1".to_vec())]);
    Ok(())
}

#[test]
fn multi_map_keeps_every_write_in_order() -> Result<()> {
    let fx = fixture()?;
    let map = fx.engine.new_sorted_disk_multi_map()?;
    scenario_writes(&map)?;

    let got = entries(&map)?;
    let values: Vec<&[u8]> = got.iter().map(|(_, v)| v.as_slice()).collect();
    assert_eq!(
        values,
        vec![
            b"v1".as_slice(),
            b"v1".as_slice(),
            b"v2".as_slice(),
            b"v2".as_slice(),
            b"v1".as_slice(),
            b"v1".as_slice(),
        ]
    );
    assert!(got.iter().all(|(k, _)| k == b"k1"));
    Ok(())
}

#[test]
fn put_then_get() -> Result<()> {
    let fx = fixture()?;
    let map = fx.engine.new_sorted_disk_map()?;

    map.put(b"apple", b"red")?;
    map.put(b"banana", b"yellow")?;

    assert_eq!(map.get(b"apple")?, Some(b"red".to_vec()));
    assert_eq!(map.get(b"banana")?, Some(b"yellow".to_vec()));
    assert_eq!(map.get(b"cherry")?, None);
    Ok(())
}

#[test]
fn empty_key_and_value_are_stored() -> Result<()> {
    let fx = fixture()?;
    let map = fx.engine.new_sorted_disk_map()?;

    map.put(b"", b"empty key")?;
    map.put(b"k", b"")?;

    assert_eq!(map.get(b"")?, Some(b"empty key".to_vec()));
    assert_eq!(map.get(b"k")?, Some(Vec::new()));
    assert_eq!(
        entries(&map)?,
        vec![
            (Vec::new(), b"empty key".to_vec()),
            (b"k".to_vec(), Vec::new()),
        ]
    );
    Ok(())
}

#[test]
fn get_on_multi_map_is_misuse() -> Result<()> {
    let fx = fixture()?;
    let map = fx.engine.new_sorted_disk_multi_map()?;
    map.put(b"k", b"v")?;

    let err = map.get(b"k").unwrap_err();
    assert_eq!(err.misuse(), Some(Misuse::GetOnMultiMap));
    Ok(())
}

#[test]
fn maps_report_their_kind() -> Result<()> {
    let fx = fixture()?;
    let unique = fx.engine.new_sorted_disk_map()?;
    let multi = fx.engine.new_sorted_disk_multi_map()?;

    assert!(!unique.allows_duplicates());
    assert!(multi.allows_duplicates());
    assert!(!unique.is_closed());
    Ok(())
}

#[test]
fn namespaces_increase_and_are_not_reused() -> Result<()> {
    let fx = fixture()?;
    let a = fx.engine.new_sorted_disk_map()?;
    let b = fx.engine.new_sorted_disk_multi_map()?;
    assert_eq!(a.namespace(), 1);
    assert_eq!(b.namespace(), 2);

    a.close()?;
    drop(a);
    let c = fx.engine.new_sorted_disk_map()?;
    assert_eq!(c.namespace(), 3);
    Ok(())
}

#[test]
fn operations_after_close_are_misuse() -> Result<()> {
    let fx = fixture()?;
    let map = fx.engine.new_sorted_disk_map()?;
    map.put(b"k", b"v")?;
    map.close()?;
    assert!(map.is_closed());

    let closed = Some(Misuse::MapClosed);
    assert_eq!(map.put(b"k", b"v").unwrap_err().misuse(), closed);
    assert_eq!(map.get(b"k").unwrap_err().misuse(), closed);
    assert_eq!(map.new_iterator().unwrap_err().misuse(), closed);
    assert_eq!(map.new_batch_writer().unwrap_err().misuse(), closed);
    assert_eq!(map.close().unwrap_err().misuse(), closed);
    Ok(())
}

#[test]
fn close_deletes_the_namespace() -> Result<()> {
    let fx = fixture()?;
    let map = fx.engine.new_sorted_disk_map()?;
    for i in 0..50u32 {
        map.put(&i.to_be_bytes(), b"v")?;
    }
    let (lower, upper) = codec::namespace_bounds(map.namespace());
    map.close()?;

    let store = fx.engine.store().unwrap();
    let left = raw_entries(store)?
        .into_iter()
        .filter(|(k, _)| *k >= lower && *k < upper)
        .count();
    assert_eq!(left, 0);
    Ok(())
}

#[test]
fn drop_closes_the_map() -> Result<()> {
    let fx = fixture()?;
    let map = fx.engine.new_sorted_disk_multi_map()?;
    map.put(b"k", b"v")?;
    map.put(b"k", b"w")?;
    drop(map);

    assert!(raw_entries(fx.engine.store().unwrap())?.is_empty());
    Ok(())
}

#[test]
fn data_survives_a_flush() -> Result<()> {
    let fx = fixture()?;
    let map = fx.engine.new_sorted_disk_map()?;
    map.put(b"a", b"1")?;
    map.put(b"b", b"2")?;

    let store = fx.engine.store().unwrap();
    store.flush()?;
    assert_eq!(store.sstables().len(), 1);

    map.put(b"a", b"3")?;
    assert_eq!(map.get(b"a")?, Some(b"3".to_vec()));
    assert_eq!(
        entries(&map)?,
        vec![
            (b"a".to_vec(), b"3".to_vec()),
            (b"b".to_vec(), b"2".to_vec()),
        ]
    );
    Ok(())
}

#[test]
fn mixed_direct_and_batched_puts_iterate_in_order() -> Result<()> {
    // Small enough that the writes below spill through many flushes.
    let fx = fixture_with(StorageConfig {
        flush_threshold: 8 * 1024,
        ..StorageConfig::default()
    })?;
    let map = fx.engine.new_sorted_disk_map()?;
    let mut writer = map.new_batch_writer_with_capacity(64)?;

    let mut keys = Vec::new();
    for i in 0..4096u64 {
        let key = i.wrapping_mul(0x9E37_79B9_7F4A_7C15).to_string().into_bytes();
        if i % 2 == 0 {
            map.put(&key, &key)?;
            assert_eq!(map.get(&key)?, Some(key.clone()));
        } else {
            writer.put(&key, &key)?;
        }
        keys.push(key);
    }
    writer.flush()?;
    keys.sort();

    let got = entries(&map)?;
    assert_eq!(got.len(), 4096);
    assert!(got.iter().all(|(k, v)| k == v));
    let got_keys: Vec<Vec<u8>> = got.into_iter().map(|(k, _)| k).collect();
    assert_eq!(got_keys, keys);
    assert!(!fx.engine.store().unwrap().sstables().is_empty());
    writer.close()?;
    Ok(())
}
