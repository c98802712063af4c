use anyhow::Result;
use memtable::RangeTombstone;
use sstable::MergeIterator;

/// Positioned iterator over a snapshot of the engine, bounded to the range
/// given to [`Engine::iter`](crate::Engine::iter).
///
/// ```text
/// unpositioned --seek--> valid --next--> ... --next--> exhausted
/// ```
///
/// Keys deleted by a range tombstone in the snapshot are skipped.
pub struct EngineIterator {
    merge: MergeIterator,
    tombstones: Vec<RangeTombstone>,
    lower: Vec<u8>,
    current: Option<(Vec<u8>, Vec<u8>)>,
}

impl EngineIterator {
    pub(crate) fn new(merge: MergeIterator, tombstones: Vec<RangeTombstone>, lower: Vec<u8>) -> Self {
        Self {
            merge,
            tombstones,
            lower,
            current: None,
        }
    }

    /// Positions at the first live key `>= target`, clamped to the lower
    /// bound.
    pub fn seek(&mut self, target: &[u8]) -> Result<()> {
        let start = if target < self.lower.as_slice() {
            self.lower.clone()
        } else {
            target.to_vec()
        };
        self.merge.seek(&start);
        self.advance()
    }

    /// Moves to the next live key. No-op once exhausted.
    pub fn next(&mut self) -> Result<()> {
        if self.current.is_none() {
            return Ok(());
        }
        self.advance()
    }

    fn advance(&mut self) -> Result<()> {
        self.current = None;
        while let Some((key, entry)) = self.merge.next_entry()? {
            if !memtable::is_shadowed(&self.tombstones, &key, entry.seq) {
                self.current = Some((key, entry.value));
                break;
            }
        }
        Ok(())
    }

    /// `true` while positioned on an entry.
    pub fn valid(&self) -> bool {
        self.current.is_some()
    }

    pub fn key(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(k, _)| k.as_slice())
    }

    pub fn value(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(_, v)| v.as_slice())
    }
}

impl std::fmt::Debug for EngineIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineIterator")
            .field("lower", &self.lower)
            .field("tombstones", &self.tombstones.len())
            .field("valid", &self.valid())
            .finish()
    }
}
