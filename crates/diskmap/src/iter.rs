use crate::codec;
use crate::error::{DiskMapError, Misuse, Result};
use crate::store::StoreIterator;

#[derive(Debug)]
enum Position {
    Unpositioned,
    /// On an entry; the user key is `key[start..end]` of the store key.
    At { start: usize, end: usize },
    Exhausted,
    Failed(DiskMapError),
}

/// Iterator over the entries of one map, in ascending key order.
///
/// ```text
/// Unpositioned --rewind/seek--> positioned --next--> ... --> exhausted
/// ```
///
/// With duplicate keys, the entries of a key come in the order they were
/// put. They are adjacent unless some other user key of the map extends the
/// key (`a` and `a\0`): the sequence suffix is compared bytewise with the
/// longer key's tail, so such entries may interleave.
///
/// Positioning methods never fail directly; an engine error or a corrupt key
/// stops the iterator and is reported by every later
/// [`valid`](ScopedIterator::valid) call.
///
/// The iterator reads from a snapshot taken when it was created. Dropping it
/// releases the snapshot; [`close`](ScopedIterator::close) does the same
/// explicitly.
pub struct ScopedIterator {
    inner: Box<dyn StoreIterator>,
    namespace: u64,
    with_sequence: bool,
    lower: Vec<u8>,
    upper: Vec<u8>,
    pos: Position,
}

impl ScopedIterator {
    pub(crate) fn new(
        inner: Box<dyn StoreIterator>,
        namespace: u64,
        with_sequence: bool,
        lower: Vec<u8>,
        upper: Vec<u8>,
    ) -> Self {
        Self {
            inner,
            namespace,
            with_sequence,
            lower,
            upper,
            pos: Position::Unpositioned,
        }
    }

    /// Positions at the first entry of the map.
    pub fn rewind(&mut self) {
        let lower = std::mem::take(&mut self.lower);
        self.seek_encoded(&lower);
        self.lower = lower;
    }

    /// Positions at the first entry whose key is `>= key`. With duplicate
    /// keys this is the oldest entry of `key`, if there is one.
    pub fn seek(&mut self, key: &[u8]) {
        let target = codec::encode_key(self.namespace, key);
        self.seek_encoded(&target);
    }

    /// Advances to the next entry. Does nothing unless positioned.
    pub fn next(&mut self) {
        if !matches!(self.pos, Position::At { .. }) {
            return;
        }
        let res = self.inner.next();
        self.settle("iterator next", res);
    }

    fn seek_encoded(&mut self, target: &[u8]) {
        let res = self.inner.seek(target);
        self.settle("iterator seek", res);
    }

    fn settle(&mut self, op: &'static str, res: anyhow::Result<()>) {
        self.pos = match res {
            Err(e) => Position::Failed(DiskMapError::engine(op, self.namespace, e)),
            Ok(()) => match self.inner.key() {
                None => Position::Exhausted,
                Some(key) if key >= self.upper.as_slice() => Position::Exhausted,
                Some(key) => match codec::user_key_span(self.namespace, key, self.with_sequence) {
                    Ok((start, end)) => Position::At { start, end },
                    Err(e) => Position::Failed(e),
                },
            },
        };
    }

    /// `Ok(true)` while positioned on an entry, `Ok(false)` before the first
    /// positioning and after the last entry. Errors that stopped the
    /// iterator are returned here.
    pub fn valid(&self) -> Result<bool> {
        match &self.pos {
            Position::At { .. } => Ok(true),
            Position::Unpositioned | Position::Exhausted => Ok(false),
            Position::Failed(e) => Err(e.clone()),
        }
    }

    /// The current user key, without namespace prefix or sequence suffix.
    pub fn key(&self) -> Result<&[u8]> {
        match (&self.pos, self.inner.key()) {
            (Position::At { start, end }, Some(key)) => Ok(&key[*start..*end]),
            _ => Err(Misuse::IteratorNotValid.into()),
        }
    }

    pub fn value(&self) -> Result<&[u8]> {
        match (&self.pos, self.inner.value()) {
            (Position::At { .. }, Some(value)) => Ok(value),
            _ => Err(Misuse::IteratorNotValid.into()),
        }
    }

    /// Releases the underlying snapshot.
    pub fn close(self) {}
}

impl std::fmt::Debug for ScopedIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedIterator")
            .field("namespace", &self.namespace)
            .field("with_sequence", &self.with_sequence)
            .field("pos", &self.pos)
            .finish()
    }
}
