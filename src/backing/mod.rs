pub mod memory;
#[cfg(feature = "sled")]
pub mod sled_store;

pub use memory::MemoryStore;
#[cfg(feature = "sled")]
pub use sled_store::SledStore;

use crate::error::Result;

/// Durable key/value blob storage the defaults are persisted to.
///
/// Implementations must be thread-safe: the flush worker and callers of
/// a forced sync may use the store at the same time.
pub trait BackingStore: Send + Sync {
    /// Returns the blob previously saved under `key`, if any.
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Persists `blob` under `key`. May be buffered; durability is only
    /// guaranteed after [`BackingStore::request_durable_sync`].
    fn save(&self, key: &str, blob: &[u8]) -> Result<()>;

    /// Best-effort request to make buffered saves durable now.
    fn request_durable_sync(&self) -> Result<()>;
}
