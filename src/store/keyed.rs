use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::foundation::error::StoreError;
use crate::store::key::StoreKey;

/// Persistent map from [`StoreKey`] to raw encoded frame bytes.
///
/// `read` may block; the resolver only calls it from its worker pool, never from the thread that
/// issues requests.
pub trait KeyedStore: Send + Sync {
    /// Fetch the encoded bytes stored under `key`.
    fn read(&self, key: &StoreKey) -> Result<Vec<u8>, StoreError>;

    /// Store encoded bytes under `key`, replacing any previous value.
    fn write(&self, key: &StoreKey, bytes: &[u8]) -> Result<(), StoreError>;
}

/// In-process store. Useful for tests, previews and scenes that were never persisted.
#[derive(Debug, Default)]
pub struct MemoryStore {
    frames: Mutex<HashMap<StoreKey, Vec<u8>>>,
    unavailable: AtomicBool,
    reads: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: while set, every read and write fails with [`StoreError::Io`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of `read` calls served so far, including failed ones.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of stored frames.
    pub fn len(&self) -> usize {
        self.frames.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Return `true` when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::io("memory store marked unavailable"));
        }
        Ok(())
    }
}

impl KeyedStore for MemoryStore {
    fn read(&self, key: &StoreKey) -> Result<Vec<u8>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        self.frames
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                key: key.as_str().to_string(),
            })
    }

    fn write(&self, key: &StoreKey, bytes: &[u8]) -> Result<(), StoreError> {
        self.check_available()?;
        self.frames
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key.clone(), bytes.to_vec());
        Ok(())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/store/keyed.rs"]
mod tests;
