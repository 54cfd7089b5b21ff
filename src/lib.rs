//! Process-wide, two-tier key/value defaults with debounced persistence.
//!
//! Values live in two independent namespaces, *device* and *user*. Reads and
//! writes are in-memory and synchronous; a background worker saves dirty
//! namespaces to a [`BackingStore`] every few seconds, and
//! `synchronize_*` forces a save plus a durable sync.
//!
//! # Examples
//! ```
//! use std::sync::Arc;
//! use simple_defaults::{DefaultsBuilder, MemoryStore};
//!
//! let store = DefaultsBuilder::default()
//!     .root_key("MyApp")
//!     .backing_store(Arc::new(MemoryStore::new()))
//!     .build()
//!     .unwrap();
//!
//! store.set_user_default("volume", 0.8);
//! assert_eq!(store.get_user_default("volume", 1.0), 0.8);
//! assert_eq!(store.get_user_default("missing", 7), 7);
//! store.synchronize_user_defaults().unwrap();
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

pub mod backing;
pub mod builder;
pub mod config;
pub mod error;
pub mod gateway;
pub mod namespace;
mod scheduler;
pub mod store;
pub mod value;

pub use backing::{BackingStore, MemoryStore};
#[cfg(feature = "sled")]
pub use backing::SledStore;
pub use builder::DefaultsBuilder;
pub use config::DefaultsConfig;
pub use error::{DefaultsError, Result};
pub use gateway::{PlatformVersion, SyncGateway, SyncPolicy};
pub use namespace::{Namespace, Scope};
pub use store::DefaultsStore;
pub use value::{FromValue, Value};

/// Process-wide slot. `Stopped` is left behind by [`teardown`] so that later
/// calls fail instead of building a fresh in-memory store.
enum Slot {
    Empty,
    Running(Arc<DefaultsStore>),
    Stopped,
}

static STORE: RwLock<Slot> = parking_lot::const_rwlock(Slot::Empty);

/// Returns a builder for the process-wide store. Finish with
/// [`DefaultsBuilder::install`].
///
/// ```no_run
/// use std::time::Duration;
///
/// simple_defaults::init()
///     .root_key("MyApp")
///     .synchronize_interval(Duration::from_secs(2))
///     .install()
///     .unwrap();
/// ```
pub fn init() -> DefaultsBuilder {
    builder::create_builder()
}

pub fn is_initialized() -> bool {
    matches!(*STORE.read(), Slot::Running(_))
}

/// Installs `store` globally. Allowed after [`teardown`].
pub(crate) fn install_store(store: DefaultsStore) -> Result<Arc<DefaultsStore>> {
    let mut slot = STORE.write();
    if let Slot::Running(_) = *slot {
        return Err(DefaultsError::AlreadyInitialized);
    }
    let store = Arc::new(store);
    *slot = Slot::Running(store.clone());
    Ok(store)
}

/// The process-wide store. If [`init`] was never called, a store backed by
/// [`MemoryStore`] is created on first access; nothing it holds survives
/// the process. After [`teardown`] this returns
/// [`DefaultsError::WorkerStopped`] until a new store is installed.
pub fn instance() -> Result<Arc<DefaultsStore>> {
    match &*STORE.read() {
        Slot::Running(store) => return Ok(store.clone()),
        Slot::Stopped => return Err(DefaultsError::WorkerStopped),
        Slot::Empty => {}
    }

    let mut slot = STORE.write();
    match &*slot {
        Slot::Running(store) => Ok(store.clone()),
        Slot::Stopped => Err(DefaultsError::WorkerStopped),
        Slot::Empty => {
            tracing::warn!("defaults store used before init(), falling back to an in-memory store");
            let store = Arc::new(builder::create_builder().build()?);
            *slot = Slot::Running(store.clone());
            Ok(store)
        }
    }
}

/// Removes the process-wide store and shuts it down, running the final
/// flush if enabled. Returns `false` if there was no running store.
pub fn teardown() -> bool {
    let store = {
        let mut slot = STORE.write();
        match std::mem::replace(&mut *slot, Slot::Stopped) {
            Slot::Running(store) => store,
            previous => {
                *slot = previous;
                return false;
            }
        }
    };
    store.shutdown();
    true
}

fn with_store<R>(op: &str, f: impl FnOnce(&DefaultsStore) -> R) -> Option<R> {
    match instance() {
        Ok(store) => Some(f(&store)),
        Err(e) => {
            tracing::error!(error = %e, op, "defaults store unavailable");
            None
        }
    }
}

pub fn get_user_default<T: FromValue>(key: &str, fallback: T) -> T {
    match instance() {
        Ok(store) => store.get_user_default(key, fallback),
        Err(_) => fallback,
    }
}

pub fn get_device_default<T: FromValue>(key: &str, fallback: T) -> T {
    match instance() {
        Ok(store) => store.get_device_default(key, fallback),
        Err(_) => fallback,
    }
}

pub fn set_user_default(key: &str, value: impl Into<Value>) {
    let value = value.into();
    with_store("set_user_default", |s| s.set_user_default(key, value));
}

pub fn set_device_default(key: &str, value: impl Into<Value>) {
    let value = value.into();
    with_store("set_device_default", |s| s.set_device_default(key, value));
}

pub fn remove_user_default(key: &str) {
    with_store("remove_user_default", |s| s.remove_user_default(key));
}

pub fn remove_device_default(key: &str) {
    with_store("remove_device_default", |s| s.remove_device_default(key));
}

pub fn reset_user_defaults() {
    with_store("reset_user_defaults", DefaultsStore::reset_user_defaults);
}

pub fn synchronize_user_defaults() -> Result<()> {
    instance()?.synchronize_user_defaults()
}

pub fn synchronize_device_defaults() -> Result<()> {
    instance()?.synchronize_device_defaults()
}

pub fn synchronize_interval() -> Duration {
    with_store("synchronize_interval", DefaultsStore::synchronize_interval)
        .unwrap_or(builder::DEFAULT_SYNCHRONIZE_INTERVAL)
}

pub fn set_synchronize_interval(interval: Duration) -> Result<()> {
    instance()?.set_synchronize_interval(interval)
}
