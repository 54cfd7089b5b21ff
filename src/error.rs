//! Error types for the defaults store.
//!
//! Reads and writes against a namespace never fail; these errors only come
//! out of construction, configuration, and flushing to the backing store.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DefaultsError>;

#[derive(Debug, Error)]
pub enum DefaultsError {
    /// Backing store reported a failure it could not express otherwise.
    #[error("backing store error: {0}")]
    Backend(String),

    #[cfg(feature = "sled")]
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Interval in seconds that is zero, negative, or not finite.
    #[error("invalid synchronize interval: {0}s")]
    InvalidInterval(f64),

    #[error("invalid platform version: {0:?}")]
    InvalidVersion(String),

    #[error("unknown scope: {0:?} (expected \"device\" or \"user\")")]
    UnknownScope(String),

    #[error("defaults store already initialized")]
    AlreadyInitialized,

    /// The flush worker has exited (store shut down or thread panicked).
    #[error("flush worker is not running")]
    WorkerStopped,

    #[error("storage backend {0:?} is not available in this build")]
    BackendUnavailable(String),
}
