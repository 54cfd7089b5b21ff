use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use super::BackingStore;
use crate::error::Result;

/// In-memory backing store backed by a `RwLock<HashMap>`.
///
/// Nothing survives the process; useful as the default for an
/// uninitialized store and for tests, which can inspect what was saved.
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<HashMap<String, Vec<u8>>>,
    saves: AtomicUsize,
    syncs: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds `key` without counting it as a save.
    pub fn insert(&self, key: &str, blob: impl Into<Vec<u8>>) {
        self.data.write().insert(key.to_string(), blob.into());
    }

    pub fn blob(&self, key: &str) -> Option<Vec<u8>> {
        self.data.read().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.data.read().keys().cloned().collect()
    }

    /// Number of `save` calls so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Number of `request_durable_sync` calls so far.
    pub fn sync_count(&self) -> usize {
        self.syncs.load(Ordering::SeqCst)
    }
}

impl BackingStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blob(key))
    }

    fn save(&self, key: &str, blob: &[u8]) -> Result<()> {
        self.data.write().insert(key.to_string(), blob.to_vec());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn request_durable_sync(&self) -> Result<()> {
        self.syncs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
