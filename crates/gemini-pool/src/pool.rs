//! Credential pool and rotation cursor
//!
//! The pool is an ordered, immutable list of API keys. The cursor is a
//! separate value so that each `GenerationClient` owns its own rotation
//! state instead of sharing a process-wide counter.

use std::sync::atomic::{AtomicUsize, Ordering};

use common::Secret;
use tracing::{info, warn};

/// Ordered, fixed set of interchangeable API keys.
///
/// Keys stay wrapped in `Secret` so they never reach logs. Blank keys are
/// dropped at construction; an empty pool is allowed and reported by the
/// client as `NoCredentialsConfigured` at call time.
#[derive(Debug, Clone, Default)]
pub struct CredentialPool {
    keys: Vec<Secret<String>>,
}

impl CredentialPool {
    pub fn new(keys: Vec<Secret<String>>) -> Self {
        let before = keys.len();
        let keys: Vec<_> = keys.into_iter().filter(|k| !k.is_blank()).collect();
        if keys.len() != before {
            warn!(
                dropped = before - keys.len(),
                "ignoring blank API keys in credential pool"
            );
        }
        info!(credentials = keys.len(), "credential pool initialized");
        Self { keys }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Key at `slot`, if in range.
    pub fn get(&self, slot: usize) -> Option<&Secret<String>> {
        self.keys.get(slot)
    }
}

/// Index of the key to try next.
///
/// Stored value always satisfies `0 <= cursor < len` for the pool length it
/// is advanced with. Advancing is a single atomic read-modify-write, so a
/// cursor shared by concurrent callers hands out slots without locks.
#[derive(Debug, Default)]
pub struct RotationCursor {
    next: AtomicUsize,
}

impl RotationCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cursor whose first `advance` returns `slot`.
    pub fn starting_at(slot: usize) -> Self {
        Self {
            next: AtomicUsize::new(slot),
        }
    }

    /// Return the slot to use now and move the cursor to the following one.
    ///
    /// Returns `None` for an empty pool.
    pub fn advance(&self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        let prev = self
            .next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |i| {
                Some((i % len + 1) % len)
            })
            .unwrap_or_else(|i| i);
        Some(prev % len)
    }

    /// Slot the next `advance` will return (0 for an empty pool).
    pub fn position(&self, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        self.next.load(Ordering::Acquire) % len
    }
}
