use std::sync::Arc;
use std::time::Duration;

use crate::backing::{BackingStore, MemoryStore};
use crate::config::{DefaultsConfig, StorageBackend};
use crate::error::{DefaultsError, Result};
use crate::gateway::{SyncGateway, SyncPolicy};
use crate::namespace::{Namespace, Scope};
use crate::store::{self, DefaultsStore, ErrorCallback, Shared};

/// Root storage key used when none is configured.
pub const DEFAULT_ROOT_KEY: &str = "SimpleDefaults";

/// How often dirty namespaces are saved when no interval is configured.
pub const DEFAULT_SYNCHRONIZE_INTERVAL: Duration = Duration::from_secs(5);

pub struct DefaultsBuilder {
    root_key: String,
    interval: Duration,
    backing: Option<Arc<dyn BackingStore>>,
    policy: SyncPolicy,
    final_flush: bool,
    debug: bool,
    on_flush_error: Option<ErrorCallback>,
}

pub fn create_builder() -> DefaultsBuilder {
    DefaultsBuilder {
        root_key: DEFAULT_ROOT_KEY.into(),
        interval: DEFAULT_SYNCHRONIZE_INTERVAL,
        backing: None,
        policy: SyncPolicy::default(),
        final_flush: true,
        debug: false,
        on_flush_error: None,
    }
}

impl Default for DefaultsBuilder {
    fn default() -> Self {
        create_builder()
    }
}

impl DefaultsBuilder {
    /// Builder preconfigured from a config file, with its backing store
    /// already opened.
    pub fn from_config(config: &DefaultsConfig) -> Result<Self> {
        let interval = config.synchronize_interval()?;
        let policy = config.sync.policy()?;

        let backing: Arc<dyn BackingStore> = match config.storage.backend {
            StorageBackend::Memory => Arc::new(MemoryStore::new()),
            #[cfg(feature = "sled")]
            StorageBackend::Sled => {
                Arc::new(crate::backing::SledStore::open(&config.storage.data_dir)?)
            }
            #[cfg(not(feature = "sled"))]
            StorageBackend::Sled => {
                return Err(DefaultsError::BackendUnavailable("sled".to_string()))
            }
        };

        Ok(create_builder()
            .root_key(&config.root_key)
            .synchronize_interval(interval)
            .backing_store(backing)
            .sync_policy(policy)
            .final_flush_on_shutdown(config.final_flush_on_shutdown)
            .debug(config.debug))
    }

    /// Namespace prefix for the storage keys (`<root>.Device`, `<root>.User`).
    pub fn root_key(mut self, root: &str) -> Self {
        self.root_key = root.to_string();
        self
    }

    pub fn synchronize_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn backing_store(mut self, store: Arc<dyn BackingStore>) -> Self {
        self.backing = Some(store);
        self
    }

    pub fn sync_policy(mut self, policy: SyncPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Save and durably sync both namespaces when the store shuts down.
    /// On by default.
    pub fn final_flush_on_shutdown(mut self, enabled: bool) -> Self {
        self.final_flush = enabled;
        self
    }

    /// Emit a `debug` event for every get, set and reset.
    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    /// Register a callback for timer-driven save failures.
    ///
    /// The callback runs on the background flush thread. It must not call
    /// `synchronize_*`, `flush`, `shutdown` or `teardown` on the same store:
    /// those wait on the flush thread and would deadlock it. Reads, writes
    /// and `set_synchronize_interval` are fine.
    pub fn on_flush_error(mut self, cb: impl Fn(&DefaultsError) + Send + Sync + 'static) -> Self {
        self.on_flush_error = Some(Box::new(cb));
        self
    }

    /// Loads both namespaces and starts the flush worker.
    pub fn build(self) -> Result<DefaultsStore> {
        if self.interval.is_zero() {
            return Err(DefaultsError::InvalidInterval(self.interval.as_secs_f64()));
        }

        tracing::info!(root_key = %self.root_key, interval = ?self.interval, "initializing defaults store");

        let backing: Arc<dyn BackingStore> = match self.backing {
            Some(backing) => backing,
            None => Arc::new(MemoryStore::new()),
        };

        let device = store::load_namespace(backing.as_ref(), &self.root_key, Scope::Device);
        let user = store::load_namespace(backing.as_ref(), &self.root_key, Scope::User);

        let shared = Shared {
            device: Namespace::with_entries(Scope::Device, device).with_debug(self.debug),
            user: Namespace::with_entries(Scope::User, user).with_debug(self.debug),
            gateway: SyncGateway::new(backing.clone(), self.policy),
            backing,
            root_key: self.root_key,
            on_flush_error: self.on_flush_error,
        };

        DefaultsStore::start(shared, self.interval, self.final_flush)
    }

    /// Builds the store and installs it as the process-wide instance.
    pub fn install(self) -> Result<Arc<DefaultsStore>> {
        if super::is_initialized() {
            return Err(DefaultsError::AlreadyInitialized);
        }
        let store = self.build()?;
        super::install_store(store)
    }
}
