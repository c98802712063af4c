use std::sync::Arc;
use thiserror::Error;

pub type Result<T, E = DiskMapError> = std::result::Result<T, E>;

/// Every failure a map, batch writer or scoped iterator can report.
///
/// The type is `Clone` so an iterator can keep reporting the error that
/// stopped it from every later `valid()` call.
#[derive(Debug, Clone, Error)]
pub enum DiskMapError {
    /// The storage engine failed. `source` is the engine's error, unchanged.
    #[error("{op} failed in namespace {namespace}")]
    Engine {
        op: &'static str,
        namespace: u64,
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync>,
    },

    /// A key read back from the engine does not belong to this namespace or
    /// cannot be decoded. Never recovered at this layer.
    #[error("corrupt key {key:02x?} in namespace {namespace}: {reason}")]
    Corruption {
        namespace: u64,
        reason: String,
        key: Vec<u8>,
    },

    #[error(transparent)]
    Misuse(#[from] Misuse),
}

/// Programming errors: the caller used a handle in a state that does not
/// allow the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Misuse {
    #[error("map is closed")]
    MapClosed,
    #[error("batch writer is closed")]
    WriterClosed,
    #[error("iterator is not positioned on an entry")]
    IteratorNotValid,
    #[error("get is not defined on a map that allows duplicate keys")]
    GetOnMultiMap,
    #[error("the engine has been shut down")]
    EngineShutDown,
    #[error("namespace ids exhausted")]
    NamespacesExhausted,
}

impl DiskMapError {
    pub(crate) fn engine(op: &'static str, namespace: u64, err: anyhow::Error) -> Self {
        let boxed: Box<dyn std::error::Error + Send + Sync> = err.into();
        DiskMapError::Engine {
            op,
            namespace,
            source: Arc::from(boxed),
        }
    }

    /// The misuse kind, if this is a misuse error.
    pub fn misuse(&self) -> Option<Misuse> {
        match self {
            DiskMapError::Misuse(m) => Some(*m),
            _ => None,
        }
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, DiskMapError::Corruption { .. })
    }
}
