/// # Manifest - SSTable Level Metadata
///
/// Records which SSTable files are live and which level each belongs to, so
/// a reopened engine loads exactly the tables the last flush or compaction
/// committed. Files on disk that the manifest does not name are ignored.
///
/// ## File Format
///
/// One entry per line, newest first within a level:
///
/// ```text
/// L0:sst-00000000000000000005-1708600000000.sst
/// L1:sst-00000000000000000003-1708599999000-l1.sst
/// ```
///
/// Lines starting with `#` and blank lines are skipped.
///
/// The file is replaced atomically: written to `MANIFEST.tmp`, fsynced, then
/// renamed over `MANIFEST`.

use anyhow::{anyhow, bail, Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

pub const MANIFEST_FILENAME: &str = "MANIFEST";

const MANIFEST_TMP_FILENAME: &str = "MANIFEST.tmp";

/// One live SSTable and its level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SstMeta {
    /// Basename inside the SST directory.
    pub filename: String,
    /// 0 = flushed, 1 = compacted.
    pub level: u32,
}

#[derive(Debug, Clone)]
pub struct Manifest {
    path: PathBuf,
    pub entries: Vec<SstMeta>,
}

fn parse_level(tag: &str) -> Option<u32> {
    match tag {
        "L0" => Some(0),
        "L1" => Some(1),
        _ => None,
    }
}

fn level_tag(level: u32) -> Result<&'static str> {
    match level {
        0 => Ok("L0"),
        1 => Ok("L1"),
        other => bail!("invalid level {}", other),
    }
}

impl Manifest {
    /// Loads `sst_dir/MANIFEST`, or starts empty if there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but a line cannot be parsed.
    pub fn load_or_create(sst_dir: &Path) -> Result<Self> {
        let path = sst_dir.join(MANIFEST_FILENAME);
        if !path.exists() {
            return Ok(Self {
                path,
                entries: Vec::new(),
            });
        }

        let file = File::open(&path)
            .with_context(|| format!("failed to open manifest at {}", path.display()))?;
        let mut entries = Vec::new();

        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let lineno = idx + 1;
            let line = line.with_context(|| format!("failed to read manifest line {}", lineno))?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (tag, filename) = line
                .split_once(':')
                .ok_or_else(|| anyhow!("manifest line {}: expected 'L<n>:<file>', got {:?}", lineno, line))?;
            let level = parse_level(tag)
                .ok_or_else(|| anyhow!("manifest line {}: unknown level {:?}", lineno, tag))?;

            entries.push(SstMeta {
                filename: filename.to_string(),
                level,
            });
        }

        Ok(Self { path, entries })
    }

    /// Persists the current entries.
    ///
    /// If the rename fails (seen on Windows while the target is still held
    /// open), the manifest is overwritten in place instead.
    pub fn save(&self) -> Result<()> {
        let tmp_path = self.path.with_file_name(MANIFEST_TMP_FILENAME);
        self.write_to(&tmp_path)?;

        if fs::rename(&tmp_path, &self.path).is_err() {
            self.write_to(&self.path)?;
            let _ = fs::remove_file(&tmp_path);
        }
        Ok(())
    }

    fn write_to(&self, path: &Path) -> Result<()> {
        let mut f = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;

        writeln!(f, "# spill engine manifest")?;
        for entry in &self.entries {
            writeln!(f, "{}:{}", level_tag(entry.level)?, entry.filename)?;
        }
        f.flush()?;
        f.sync_all()?;
        Ok(())
    }

    fn filenames(&self, level: u32) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.level == level)
            .map(|e| e.filename.as_str())
            .collect()
    }

    pub fn l0_filenames(&self) -> Vec<&str> {
        self.filenames(0)
    }

    pub fn l1_filenames(&self) -> Vec<&str> {
        self.filenames(1)
    }

    /// Adds a table in front of the others of its level (does not save).
    pub fn add(&mut self, filename: String, level: u32) {
        let pos = self
            .entries
            .iter()
            .position(|e| e.level == level)
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, SstMeta { filename, level });
    }

    /// Forgets the given tables (does not save).
    pub fn remove(&mut self, filenames: &[String]) {
        self.entries.retain(|e| !filenames.contains(&e.filename));
    }

    /// Replaces everything with one L1 table (does not save).
    pub fn replace_all_with_l1(&mut self, filename: String) {
        self.entries.clear();
        self.entries.push(SstMeta { filename, level: 1 });
    }
}
