//! Hard-sync gateway.
//!
//! Some backing stores already make saves durable quickly on their own, so
//! asking for a forced sync there is wasted I/O. Whether a sync is needed is
//! a capability of the platform, injected as a [`SyncPolicy`].

use core::fmt;
use std::cmp::Ordering;
use std::str::FromStr;
use std::sync::Arc;

use crate::backing::BackingStore;
use crate::error::{DefaultsError, Result};

/// Dotted numeric version such as `7.1.2`.
///
/// Compared component by component with missing components read as zero,
/// so `8` and `8.0` are equal.
#[derive(Debug, Clone)]
pub struct PlatformVersion(Vec<u32>);

impl PlatformVersion {
    pub fn new(components: impl Into<Vec<u32>>) -> Self {
        Self(components.into())
    }

    fn component(&self, i: usize) -> u32 {
        self.0.get(i).copied().unwrap_or(0)
    }
}

impl FromStr for PlatformVersion {
    type Err = DefaultsError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(DefaultsError::InvalidVersion(s.to_string()));
        }
        trimmed
            .split('.')
            .map(|part| part.parse::<u32>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(PlatformVersion)
            .map_err(|_| DefaultsError::InvalidVersion(s.to_string()))
    }
}

impl fmt::Display for PlatformVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(u32::to_string).collect();
        write!(f, "{}", parts.join("."))
    }
}

impl Ord for PlatformVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.0.len().max(other.0.len());
        (0..len)
            .map(|i| self.component(i).cmp(&other.component(i)))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for PlatformVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PlatformVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PlatformVersion {}

/// When a forced sync should reach the backing store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SyncPolicy {
    #[default]
    Always,
    Never,
    /// Sync only when `platform` is older than `threshold`.
    BelowVersion {
        platform: PlatformVersion,
        threshold: PlatformVersion,
    },
}

impl SyncPolicy {
    pub fn requires_sync(&self) -> bool {
        match self {
            SyncPolicy::Always => true,
            SyncPolicy::Never => false,
            SyncPolicy::BelowVersion {
                platform,
                threshold,
            } => platform < threshold,
        }
    }
}

/// Wraps the backing store's durable-sync primitive behind a [`SyncPolicy`].
///
/// Stateless, so the flush worker and callers may use it concurrently.
pub struct SyncGateway {
    store: Arc<dyn BackingStore>,
    policy: SyncPolicy,
}

impl SyncGateway {
    pub fn new(store: Arc<dyn BackingStore>, policy: SyncPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &SyncPolicy {
        &self.policy
    }

    /// Requests a hard sync if the policy calls for one. Returns whether
    /// the backing store was asked to sync.
    pub fn synchronize(&self) -> Result<bool> {
        if !self.policy.requires_sync() {
            tracing::trace!("durable sync not required, skipping");
            return Ok(false);
        }
        self.store.request_durable_sync()?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backing::MemoryStore;

    fn v(s: &str) -> PlatformVersion {
        s.parse().unwrap()
    }

    #[test]
    fn test_version_numeric_compare() {
        assert!(v("7.1") < v("8.0"));
        assert!(v("10.0") > v("9.3"));
        assert!(v("8.0.1") > v("8.0"));
        assert_eq!(v("8"), v("8.0.0"));
    }

    #[test]
    fn test_version_parse_errors() {
        assert!(matches!(
            "".parse::<PlatformVersion>(),
            Err(DefaultsError::InvalidVersion(_))
        ));
        assert!("8.x".parse::<PlatformVersion>().is_err());
        assert!("8..1".parse::<PlatformVersion>().is_err());
        assert_eq!(v(" 8.1 ").to_string(), "8.1");
    }

    #[test]
    fn test_policy_below_version() {
        let old = SyncPolicy::BelowVersion {
            platform: v("7.1"),
            threshold: v("8.0"),
        };
        let new = SyncPolicy::BelowVersion {
            platform: v("8.0"),
            threshold: v("8.0"),
        };
        assert!(old.requires_sync());
        assert!(!new.requires_sync());
        assert!(SyncPolicy::Always.requires_sync());
        assert!(!SyncPolicy::Never.requires_sync());
    }

    #[test]
    fn test_gateway_skips_when_not_required() {
        let store = Arc::new(MemoryStore::new());
        let gateway = SyncGateway::new(store.clone(), SyncPolicy::Never);
        assert!(!gateway.synchronize().unwrap());
        assert_eq!(store.sync_count(), 0);

        let gateway = SyncGateway::new(store.clone(), SyncPolicy::Always);
        assert!(gateway.synchronize().unwrap());
        assert_eq!(store.sync_count(), 1);
    }
}
