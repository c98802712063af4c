use crate::Engine;
use anyhow::Result;
use std::fs;
use std::path::Path;

pub fn count_sst_files(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|s| s.to_str())
                .map(|ext| ext == "sst")
                .unwrap_or(false)
        })
        .count()
}

/// Engine with `wal.log` and `sst/` under `dir`.
pub fn open(dir: &Path, flush_threshold: usize) -> Result<Engine> {
    Engine::new(dir.join("wal.log"), dir.join("sst"), flush_threshold, false)
}

/// Every live `(key, value)` in `[lower, upper)`.
pub fn scan(engine: &Engine, lower: &[u8], upper: Option<&[u8]>) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let mut it = engine.iter(lower, upper);
    it.seek(lower)?;
    let mut out = Vec::new();
    while it.valid() {
        out.push((it.key().unwrap().to_vec(), it.value().unwrap().to_vec()));
        it.next()?;
    }
    Ok(out)
}

pub fn keys(pairs: &[(Vec<u8>, Vec<u8>)]) -> Vec<&[u8]> {
    pairs.iter().map(|(k, _)| k.as_slice()).collect()
}
