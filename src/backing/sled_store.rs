use std::path::Path;

use super::BackingStore;
use crate::error::Result;

/// Persistent backing store on top of sled.
///
/// Saves go into sled's page cache; only a durable sync flushes them to
/// disk.
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn new(db: sled::Db) -> Self {
        Self { db }
    }

    /// Open a sled database at the given directory path.
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(data_dir)?;
        Ok(Self::new(db))
    }
}

impl BackingStore for SledStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key)?.map(|ivec| ivec.to_vec()))
    }

    fn save(&self, key: &str, blob: &[u8]) -> Result<()> {
        self.db.insert(key, blob)?;
        Ok(())
    }

    fn request_durable_sync(&self) -> Result<()> {
        let bytes = self.db.flush()?;
        tracing::trace!(bytes, "sled flushed");
        Ok(())
    }
}
