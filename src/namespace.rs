//! Device and user namespaces.
//!
//! Each namespace is an in-memory map plus a dirty flag, both behind the
//! namespace's own lock. The lock is held for the map access only and is
//! never taken together with the other namespace's lock.

use core::fmt;
use std::collections::BTreeMap;
use std::str::FromStr;

use parking_lot::Mutex;

use crate::error::DefaultsError;
use crate::value::{FromValue, Value};

/// Which of the two namespaces a key lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Device,
    User,
}

impl Scope {
    pub const ALL: [Scope; 2] = [Scope::Device, Scope::User];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Device => "device",
            Scope::User => "user",
        }
    }

    /// Key under which this namespace is persisted, e.g. `SimpleDefaults.User`.
    pub fn storage_key(&self, root: &str) -> String {
        match self {
            Scope::Device => format!("{root}.Device"),
            Scope::User => format!("{root}.User"),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = DefaultsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "device" => Ok(Scope::Device),
            "user" => Ok(Scope::User),
            _ => Err(DefaultsError::UnknownScope(s.to_string())),
        }
    }
}

#[derive(Default)]
struct NamespaceState {
    entries: BTreeMap<String, Value>,
    dirty: bool,
}

/// One defaults namespace.
pub struct Namespace {
    scope: Scope,
    debug: bool,
    state: Mutex<NamespaceState>,
}

impl Namespace {
    pub fn new(scope: Scope) -> Self {
        Self::with_entries(scope, BTreeMap::new())
    }

    /// Namespace pre-populated from storage. Loaded entries start clean.
    pub fn with_entries(scope: Scope, entries: BTreeMap<String, Value>) -> Self {
        Self {
            scope,
            debug: false,
            state: Mutex::new(NamespaceState {
                entries,
                dirty: false,
            }),
        }
    }

    pub(crate) fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Returns the value stored under `key` if it has type `T`, otherwise
    /// `fallback`. Absence and type mismatch are treated the same.
    pub fn get<T: FromValue>(&self, key: &str, fallback: T) -> T {
        let found = {
            let state = self.state.lock();
            state.entries.get(key).and_then(T::from_value)
        };

        match found {
            Some(value) => {
                if self.debug {
                    tracing::debug!(scope = %self.scope, key, "found default");
                }
                value
            }
            None => {
                if self.debug {
                    tracing::debug!(scope = %self.scope, key, "no default found, returning fallback");
                }
                fallback
            }
        }
    }

    pub fn value(&self, key: &str) -> Option<Value> {
        self.state.lock().entries.get(key).cloned()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    /// Stores `value` under `key`, or removes `key` when `value` is `None`.
    /// Always marks the namespace dirty, even if nothing changed.
    ///
    /// Values holding a NaN or infinite float cannot be persisted; they are
    /// refused with a warning and the previous value is kept.
    pub fn set(&self, key: &str, value: Option<Value>) {
        if value.as_ref().is_some_and(|v| !v.is_finite()) {
            tracing::warn!(scope = %self.scope, key, "refusing non-finite float value");
            return;
        }

        if self.debug {
            match &value {
                Some(v) => tracing::debug!(scope = %self.scope, key, value = %v, "setting default"),
                None => tracing::debug!(scope = %self.scope, key, "removing default"),
            }
        }

        let mut state = self.state.lock();
        match value {
            Some(v) => {
                state.entries.insert(key.to_string(), v);
            }
            None => {
                state.entries.remove(key);
            }
        }
        state.dirty = true;
    }

    /// Removes every entry and marks the namespace dirty.
    pub fn reset(&self) {
        if self.debug {
            tracing::debug!(scope = %self.scope, "resetting defaults");
        }
        let mut state = self.state.lock();
        state.entries.clear();
        state.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.state.lock().dirty
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Copy of the current entries. Does not affect the dirty flag.
    pub fn entries(&self) -> BTreeMap<String, Value> {
        self.state.lock().entries.clone()
    }

    /// If dirty, copies the entries and clears the flag in one critical
    /// section. A write landing after this returns re-dirties the namespace.
    pub(crate) fn take_dirty_snapshot(&self) -> Option<BTreeMap<String, Value>> {
        let mut state = self.state.lock();
        if !state.dirty {
            return None;
        }
        state.dirty = false;
        Some(state.entries.clone())
    }

    /// Re-dirty after a snapshot could not be saved.
    pub(crate) fn mark_dirty(&self) {
        self.state.lock().dirty = true;
    }
}
