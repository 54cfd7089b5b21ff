//! The defaults store: two namespaces, the flush worker, and the public
//! read/write/synchronize API.

use std::collections::BTreeMap;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::backing::BackingStore;
use crate::error::{DefaultsError, Result};
use crate::gateway::SyncGateway;
use crate::namespace::{Namespace, Scope};
use crate::scheduler::{self, Command, Scheduler};
use crate::value::{FromValue, Value};

/// Callback for flush failures that have no caller to return to.
pub type ErrorCallback = Box<dyn Fn(&DefaultsError) + Send + Sync + 'static>;

/// State shared between the store handle and the flush worker.
pub(crate) struct Shared {
    pub(crate) root_key: String,
    pub(crate) device: Namespace,
    pub(crate) user: Namespace,
    pub(crate) backing: Arc<dyn BackingStore>,
    pub(crate) gateway: SyncGateway,
    pub(crate) on_flush_error: Option<ErrorCallback>,
}

impl Shared {
    pub(crate) fn namespace(&self, scope: Scope) -> &Namespace {
        match scope {
            Scope::Device => &self.device,
            Scope::User => &self.user,
        }
    }

    /// Saves `scope` if it is dirty. Returns whether anything was written.
    ///
    /// The snapshot is taken and the dirty flag cleared under the namespace
    /// lock; serialization and the save happen after it is released. A
    /// failed save re-dirties the namespace so a later flush retries.
    pub(crate) fn flush(&self, scope: Scope) -> Result<bool> {
        let ns = self.namespace(scope);
        let Some(snapshot) = ns.take_dirty_snapshot() else {
            return Ok(false);
        };

        let key = scope.storage_key(&self.root_key);
        let saved = serde_json::to_vec(&snapshot)
            .map_err(DefaultsError::from)
            .and_then(|blob| self.backing.save(&key, &blob));

        match saved {
            Ok(()) => {
                tracing::debug!(%scope, keys = snapshot.len(), "saved defaults");
                Ok(true)
            }
            Err(e) => {
                ns.mark_dirty();
                Err(e)
            }
        }
    }

    pub(crate) fn report(&self, scope: Scope, error: &DefaultsError) {
        tracing::warn!(%scope, error = %error, "failed to save defaults");
        self.notify(error);
    }

    pub(crate) fn notify(&self, error: &DefaultsError) {
        if let Some(cb) = &self.on_flush_error {
            cb(error);
        }
    }
}

/// Reads one namespace from the backing store. Any failure leaves it empty.
///
/// Entries are decoded one at a time; an entry that does not decode (such
/// as `null`, or a list holding one) is dropped and the rest are kept.
pub(crate) fn load_namespace(
    backing: &dyn BackingStore,
    root_key: &str,
    scope: Scope,
) -> BTreeMap<String, Value> {
    let key = scope.storage_key(root_key);
    match backing.load(&key) {
        Ok(Some(blob)) => match serde_json::from_slice::<BTreeMap<String, serde_json::Value>>(&blob) {
            Ok(raw) => {
                let mut entries = BTreeMap::new();
                for (k, v) in raw {
                    match serde_json::from_value::<Value>(v) {
                        Ok(v) => {
                            entries.insert(k, v);
                        }
                        Err(_) => tracing::warn!(%scope, key = %k, "dropping unreadable stored default"),
                    }
                }
                tracing::info!(%scope, keys = entries.len(), "loaded defaults");
                entries
            }
            Err(e) => {
                tracing::warn!(%scope, error = %e, "stored defaults are unreadable, starting empty");
                BTreeMap::new()
            }
        },
        Ok(None) => {
            tracing::info!(%scope, "no cached defaults");
            BTreeMap::new()
        }
        Err(e) => {
            tracing::warn!(%scope, error = %e, "failed to load defaults, starting empty");
            BTreeMap::new()
        }
    }
}

/// Two-tier defaults cache with debounced persistence.
///
/// Reads and writes only touch memory. A background worker saves dirty
/// namespaces every [`synchronize_interval`](Self::synchronize_interval);
/// `synchronize_*` saves one namespace immediately and requests a durable
/// sync.
pub struct DefaultsStore {
    shared: Arc<Shared>,
    interval: Mutex<Duration>,
    scheduler: Mutex<Option<Scheduler>>,
    final_flush: bool,
}

impl DefaultsStore {
    pub(crate) fn start(shared: Shared, interval: Duration, final_flush: bool) -> Result<Self> {
        let shared = Arc::new(shared);
        let scheduler = Scheduler::spawn(shared.clone(), interval)?;
        Ok(Self {
            shared,
            interval: Mutex::new(interval),
            scheduler: Mutex::new(Some(scheduler)),
            final_flush,
        })
    }

    pub fn root_key(&self) -> &str {
        &self.shared.root_key
    }

    pub fn user(&self) -> &Namespace {
        &self.shared.user
    }

    pub fn device(&self) -> &Namespace {
        &self.shared.device
    }

    pub fn namespace(&self, scope: Scope) -> &Namespace {
        self.shared.namespace(scope)
    }

    pub fn get_user_default<T: FromValue>(&self, key: &str, fallback: T) -> T {
        self.shared.user.get(key, fallback)
    }

    pub fn get_device_default<T: FromValue>(&self, key: &str, fallback: T) -> T {
        self.shared.device.get(key, fallback)
    }

    pub fn set_user_default(&self, key: &str, value: impl Into<Value>) {
        self.shared.user.set(key, Some(value.into()));
    }

    pub fn set_device_default(&self, key: &str, value: impl Into<Value>) {
        self.shared.device.set(key, Some(value.into()));
    }

    pub fn remove_user_default(&self, key: &str) {
        self.shared.user.set(key, None);
    }

    pub fn remove_device_default(&self, key: &str) {
        self.shared.device.set(key, None);
    }

    /// Clears the user namespace. The device namespace has no store-level
    /// reset; use [`Namespace::reset`] through [`device`](Self::device).
    pub fn reset_user_defaults(&self) {
        self.shared.user.reset();
    }

    /// Saves the user namespace now and requests a durable sync.
    pub fn synchronize_user_defaults(&self) -> Result<()> {
        self.synchronize(Scope::User)
    }

    /// Saves the device namespace now and requests a durable sync.
    pub fn synchronize_device_defaults(&self) -> Result<()> {
        self.synchronize(Scope::Device)
    }

    /// Forced sync of one namespace. The other namespace is not flushed.
    pub fn synchronize(&self, scope: Scope) -> Result<()> {
        let tx = self.sender()?;
        scheduler::flush(&tx, scope, true)
    }

    /// Saves `scope` now if dirty, without a durable sync.
    pub fn flush(&self, scope: Scope) -> Result<()> {
        let tx = self.sender()?;
        scheduler::flush(&tx, scope, false)
    }

    pub fn synchronize_interval(&self) -> Duration {
        *self.interval.lock()
    }

    /// Re-arms the timer at `interval`. Dirty namespaces stay dirty and are
    /// saved at the next tick.
    pub fn set_synchronize_interval(&self, interval: Duration) -> Result<()> {
        if interval.is_zero() {
            return Err(DefaultsError::InvalidInterval(interval.as_secs_f64()));
        }
        let mut current = self.interval.lock();
        let tx = self.sender()?;
        scheduler::set_interval(&tx, interval)?;
        *current = interval;
        Ok(())
    }

    pub fn is_dirty(&self, scope: Scope) -> bool {
        self.shared.namespace(scope).is_dirty()
    }

    /// Stops the timer. With final flush enabled (the default), both
    /// namespaces are saved and durably synced first. Safe to call twice.
    pub fn shutdown(&self) {
        let scheduler = self.scheduler.lock().take();
        if let Some(scheduler) = scheduler {
            scheduler.shutdown(self.final_flush);
        }
    }

    fn sender(&self) -> Result<Sender<Command>> {
        self.scheduler
            .lock()
            .as_ref()
            .map(Scheduler::sender)
            .ok_or(DefaultsError::WorkerStopped)
    }
}

impl Drop for DefaultsStore {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Instant;

    use super::*;
    use crate::backing::MemoryStore;
    use crate::builder::DefaultsBuilder;
    use crate::gateway::SyncPolicy;

    const LONG: Duration = Duration::from_secs(3600);

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        cond()
    }

    fn saved_map(backing: &MemoryStore, key: &str) -> Option<BTreeMap<String, Value>> {
        backing
            .blob(key)
            .map(|blob| serde_json::from_slice(&blob).unwrap())
    }

    fn store_with(backing: Arc<MemoryStore>, interval: Duration) -> DefaultsStore {
        DefaultsBuilder::default()
            .backing_store(backing)
            .synchronize_interval(interval)
            .build()
            .unwrap()
    }

    /// Backing store whose saves fail while `failing` is set.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        failing: AtomicBool,
    }

    impl BackingStore for FlakyStore {
        fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
            self.inner.load(key)
        }

        fn save(&self, key: &str, blob: &[u8]) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(DefaultsError::Backend("disk full".into()));
            }
            self.inner.save(key, blob)
        }

        fn request_durable_sync(&self) -> Result<()> {
            self.inner.request_durable_sync()
        }
    }

    #[test]
    fn test_timer_flushes_dirty_user_namespace() {
        let backing = Arc::new(MemoryStore::new());
        let store = store_with(backing.clone(), Duration::from_millis(100));

        store.set_user_default("a", 1);
        assert!(store.is_dirty(Scope::User));

        assert!(wait_until(|| backing.blob("SimpleDefaults.User").is_some()));
        let saved = saved_map(&backing, "SimpleDefaults.User").unwrap();
        assert_eq!(saved, BTreeMap::from([("a".to_string(), Value::Int(1))]));
        assert!(wait_until(|| !store.is_dirty(Scope::User)));

        // Timer flushes never request a durable sync.
        assert_eq!(backing.sync_count(), 0);
        assert!(backing.blob("SimpleDefaults.Device").is_none());
    }

    #[test]
    fn test_clean_namespaces_are_not_saved() {
        let backing = Arc::new(MemoryStore::new());
        let store = store_with(backing.clone(), Duration::from_millis(20));
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(backing.save_count(), 0);
        drop(store);
    }

    #[test]
    fn test_flush_is_idempotent() {
        let backing = Arc::new(MemoryStore::new());
        let store = store_with(backing.clone(), LONG);

        store.set_device_default("x", "y");
        store.flush(Scope::Device).unwrap();
        store.flush(Scope::Device).unwrap();
        assert_eq!(backing.save_count(), 1);
        assert!(!store.is_dirty(Scope::Device));
    }

    #[test]
    fn test_synchronize_flushes_only_its_namespace() {
        let backing = Arc::new(MemoryStore::new());
        let store = store_with(backing.clone(), LONG);

        store.set_user_default("u", true);
        store.set_device_default("d", false);
        store.synchronize_user_defaults().unwrap();

        assert!(backing.blob("SimpleDefaults.User").is_some());
        assert!(backing.blob("SimpleDefaults.Device").is_none());
        assert!(store.is_dirty(Scope::Device));
        assert_eq!(backing.sync_count(), 1);

        store.synchronize_device_defaults().unwrap();
        assert!(backing.blob("SimpleDefaults.Device").is_some());
        assert_eq!(backing.sync_count(), 2);
    }

    #[test]
    fn test_synchronize_respects_policy() {
        let backing = Arc::new(MemoryStore::new());
        let store = DefaultsBuilder::default()
            .backing_store(backing.clone())
            .synchronize_interval(LONG)
            .sync_policy(SyncPolicy::Never)
            .final_flush_on_shutdown(false)
            .build()
            .unwrap();

        store.set_user_default("k", 1);
        store.synchronize_user_defaults().unwrap();
        assert_eq!(backing.save_count(), 1);
        assert_eq!(backing.sync_count(), 0);
    }

    #[test]
    fn test_synchronize_clean_namespace_still_syncs() {
        let backing = Arc::new(MemoryStore::new());
        let store = store_with(backing.clone(), LONG);

        store.set_user_default("k", 1);
        store.synchronize_user_defaults().unwrap();
        assert_eq!(backing.save_count(), 1);
        assert_eq!(backing.sync_count(), 1);

        store.synchronize_user_defaults().unwrap();
        assert_eq!(backing.save_count(), 1);
        assert_eq!(backing.sync_count(), 2);
    }

    fn store_on_platform(backing: Arc<MemoryStore>, platform: &str) -> DefaultsStore {
        DefaultsBuilder::default()
            .backing_store(backing)
            .synchronize_interval(LONG)
            .sync_policy(SyncPolicy::BelowVersion {
                platform: platform.parse().unwrap(),
                threshold: "12.0".parse().unwrap(),
            })
            .final_flush_on_shutdown(false)
            .build()
            .unwrap()
    }

    #[test]
    fn test_below_version_policy_gates_store_sync() {
        let old = Arc::new(MemoryStore::new());
        let store = store_on_platform(old.clone(), "11.4");
        store.set_device_default("k", 1);
        store.synchronize_device_defaults().unwrap();
        assert_eq!(old.save_count(), 1);
        assert_eq!(old.sync_count(), 1);

        let new = Arc::new(MemoryStore::new());
        let store = store_on_platform(new.clone(), "12.0.1");
        store.set_device_default("k", 1);
        store.synchronize_device_defaults().unwrap();
        assert_eq!(new.save_count(), 1);
        assert_eq!(new.sync_count(), 0);
    }

    #[test]
    fn test_non_finite_floats_do_not_lose_other_keys() {
        let backing = Arc::new(MemoryStore::new());
        {
            let store = store_with(backing.clone(), LONG);
            store.set_user_default("theme", "dark");
            store.set_user_default("ratio", f64::NAN);
            store.set_user_default("series", vec![1.0, f64::INFINITY]);
            store.synchronize_user_defaults().unwrap();
        }

        let store = store_with(backing, LONG);
        assert_eq!(store.get_user_default("theme", String::new()), "dark");
        assert_eq!(store.get_user_default("ratio", -1.0), -1.0);
        assert!(!store.user().contains_key("series"));
        assert_eq!(store.user().len(), 1);
    }

    #[test]
    fn test_unreadable_entry_drops_only_itself() {
        let backing = Arc::new(MemoryStore::new());
        backing.insert(
            "SimpleDefaults.User",
            r#"{"ratio":null,"series":[1.0,null],"theme":"dark"}"#,
        );

        let store = store_with(backing, LONG);
        assert_eq!(store.get_user_default("theme", String::new()), "dark");
        assert!(!store.user().contains_key("ratio"));
        assert!(!store.user().contains_key("series"));
        assert!(!store.is_dirty(Scope::User));
    }

    #[test]
    fn test_frequent_interval_changes_still_flush() {
        let backing = Arc::new(MemoryStore::new());
        let store = store_with(backing.clone(), LONG);
        store.set_user_default("pending", 1);

        // Re-set faster than the interval elapses.
        let deadline = Instant::now() + Duration::from_secs(2);
        while backing.blob("SimpleDefaults.User").is_none() && Instant::now() < deadline {
            store
                .set_synchronize_interval(Duration::from_millis(50))
                .unwrap();
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(backing.blob("SimpleDefaults.User").is_some());
    }

    #[test]
    fn test_interval_change_keeps_pending_flush() {
        let backing = Arc::new(MemoryStore::new());
        let store = store_with(backing.clone(), LONG);

        store.set_user_default("pending", 5);
        store
            .set_synchronize_interval(Duration::from_millis(50))
            .unwrap();
        assert_eq!(store.synchronize_interval(), Duration::from_millis(50));

        assert!(wait_until(|| backing.blob("SimpleDefaults.User").is_some()));
        assert!(wait_until(|| !store.is_dirty(Scope::User)));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let store = store_with(Arc::new(MemoryStore::new()), LONG);
        assert!(matches!(
            store.set_synchronize_interval(Duration::ZERO),
            Err(DefaultsError::InvalidInterval(_))
        ));
        assert_eq!(store.synchronize_interval(), LONG);
    }

    #[test]
    fn test_reset_user_leaves_device_untouched() {
        let store = store_with(Arc::new(MemoryStore::new()), LONG);
        store.set_user_default("a", 1);
        store.set_device_default("a", 2);

        store.reset_user_defaults();
        assert_eq!(store.get_user_default("a", 0), 0);
        assert_eq!(store.get_device_default("a", 0), 2);
        assert!(store.is_dirty(Scope::User));
    }

    #[test]
    fn test_missing_device_key_returns_fallback() {
        let store = store_with(Arc::new(MemoryStore::new()), LONG);
        assert_eq!(store.get_device_default("x", "d".to_string()), "d");
        assert!(!store.is_dirty(Scope::Device));
    }

    #[test]
    fn test_loads_existing_namespaces_clean() {
        let backing = Arc::new(MemoryStore::new());
        backing.insert("app.User", r#"{"theme":"dark","gone":null}"#);
        backing.insert("app.Device", "not json");

        let store = DefaultsBuilder::default()
            .root_key("app")
            .backing_store(backing.clone())
            .synchronize_interval(LONG)
            .build()
            .unwrap();

        assert_eq!(store.get_user_default("theme", String::new()), "dark");
        assert!(!store.user().contains_key("gone"));
        assert!(store.device().is_empty());
        assert!(!store.is_dirty(Scope::User));
        assert!(!store.is_dirty(Scope::Device));
    }

    #[test]
    fn test_concurrent_setters_keep_both_keys() {
        let store = Arc::new(store_with(Arc::new(MemoryStore::new()), LONG));
        let a = {
            let store = store.clone();
            std::thread::spawn(move || store.set_user_default("left", 1))
        };
        let b = {
            let store = store.clone();
            std::thread::spawn(move || store.set_user_default("right", 2))
        };
        a.join().unwrap();
        b.join().unwrap();

        assert_eq!(store.get_user_default("left", 0), 1);
        assert_eq!(store.get_user_default("right", 0), 2);
    }

    #[test]
    fn test_failed_save_redirties_and_reports() {
        let backing = Arc::new(FlakyStore::default());
        backing.failing.store(true, Ordering::SeqCst);
        let errors = Arc::new(AtomicUsize::new(0));

        let store = {
            let errors = errors.clone();
            DefaultsBuilder::default()
                .backing_store(backing.clone())
                .synchronize_interval(LONG)
                .final_flush_on_shutdown(false)
                .on_flush_error(move |_| {
                    errors.fetch_add(1, Ordering::SeqCst);
                })
                .build()
                .unwrap()
        };

        store.set_user_default("a", 1);
        assert!(matches!(
            store.synchronize_user_defaults(),
            Err(DefaultsError::Backend(_))
        ));
        assert!(store.is_dirty(Scope::User));
        // Errors returned to a caller are not also sent to the callback.
        assert_eq!(errors.load(Ordering::SeqCst), 0);

        store
            .set_synchronize_interval(Duration::from_millis(20))
            .unwrap();
        assert!(wait_until(|| errors.load(Ordering::SeqCst) > 0));

        backing.failing.store(false, Ordering::SeqCst);
        assert!(wait_until(|| backing.inner.blob("SimpleDefaults.User").is_some()));
        assert!(wait_until(|| !store.is_dirty(Scope::User)));
    }

    #[test]
    fn test_shutdown_final_flush() {
        let backing = Arc::new(MemoryStore::new());
        let store = store_with(backing.clone(), LONG);
        store.set_user_default("last", "write");
        store.set_device_default("d", 1);

        store.shutdown();
        assert!(backing.blob("SimpleDefaults.User").is_some());
        assert!(backing.blob("SimpleDefaults.Device").is_some());
        assert_eq!(backing.sync_count(), 1);

        store.shutdown();
        assert!(matches!(
            store.synchronize_user_defaults(),
            Err(DefaultsError::WorkerStopped)
        ));
    }

    #[test]
    fn test_shutdown_without_final_flush_drops_pending() {
        let backing = Arc::new(MemoryStore::new());
        let store = DefaultsBuilder::default()
            .backing_store(backing.clone())
            .synchronize_interval(LONG)
            .final_flush_on_shutdown(false)
            .build()
            .unwrap();
        store.set_user_default("lost", 1);
        drop(store);
        assert_eq!(backing.save_count(), 0);
    }
}
