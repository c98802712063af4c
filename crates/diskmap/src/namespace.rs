use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Misuse, Result};

/// Hands out namespace ids for one engine handle.
///
/// Ids start at 1, strictly increase and are never reused, even after the
/// map owning one is closed. `u64::MAX` is never issued because its range
/// would have no upper bound.
#[derive(Debug)]
pub struct NamespaceAllocator {
    next: AtomicU64,
}

impl NamespaceAllocator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub(crate) fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    pub fn allocate(&self) -> Result<u64> {
        self.next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |id| {
                (id < u64::MAX).then(|| id + 1)
            })
            .map_err(|_| Misuse::NamespacesExhausted.into())
    }

    /// Number of ids issued so far by an allocator started at 1.
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::SeqCst) - 1
    }
}

impl Default for NamespaceAllocator {
    fn default() -> Self {
        Self::new()
    }
}
