//! Work leases.
//!
//! Background workers select pending rows with "claim one row, lease it,
//! return it" semantics: while a lease guard is alive, no other worker can
//! select the same row. Leases are process-local; they exist to serialize
//! concurrent workers inside one service instance, which is the only writer
//! of its store.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Registry of currently leased row keys.
#[derive(Clone, Default)]
pub struct LeaseSet {
    inner: Arc<Mutex<HashSet<Vec<u8>>>>,
}

impl LeaseSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to lease `key`. Returns `None` when another worker holds it.
    pub fn acquire(&self, key: Vec<u8>) -> Option<LeaseGuard> {
        let mut held = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if !held.insert(key.clone()) {
            return None;
        }
        Some(LeaseGuard {
            set: Arc::clone(&self.inner),
            key,
        })
    }

    pub fn is_leased(&self, key: &[u8]) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(key)
    }
}

/// Releases the lease when dropped, whether the worker succeeded or not.
pub struct LeaseGuard {
    set: Arc<Mutex<HashSet<Vec<u8>>>>,
    key: Vec<u8>,
}

impl LeaseGuard {
    pub fn key(&self) -> &[u8] {
        &self.key
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key);
    }
}
