use std::env;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::builder::{DEFAULT_ROOT_KEY, DEFAULT_SYNCHRONIZE_INTERVAL};
use crate::error::{DefaultsError, Result};
use crate::gateway::{PlatformVersion, SyncPolicy};

/// Top-level `defaults.toml` configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DefaultsConfig {
    #[serde(default = "default_root_key")]
    pub root_key: String,
    #[serde(default = "default_interval_secs")]
    pub synchronize_interval_secs: f64,
    #[serde(default = "default_true")]
    pub final_flush_on_shutdown: bool,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage")]
    pub backend: StorageBackend,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Sled,
    Memory,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncPolicyKind {
    #[default]
    Always,
    Never,
    BelowVersion,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SyncConfig {
    #[serde(default)]
    pub policy: SyncPolicyKind,
    pub platform_version: Option<String>,
    pub threshold_version: Option<String>,
}

// ── Default value functions ──────────────────────────

fn default_root_key() -> String {
    DEFAULT_ROOT_KEY.to_string()
}

fn default_interval_secs() -> f64 {
    DEFAULT_SYNCHRONIZE_INTERVAL.as_secs_f64()
}

fn default_true() -> bool {
    true
}

fn default_storage() -> StorageBackend {
    StorageBackend::Sled
}

fn default_data_dir() -> String {
    "./defaults-data".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage(),
            data_dir: default_data_dir(),
        }
    }
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            root_key: default_root_key(),
            synchronize_interval_secs: default_interval_secs(),
            final_flush_on_shutdown: true,
            debug: false,
            storage: StorageConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Resolve into a [`SyncPolicy`]. `below_version` needs both versions.
    pub fn policy(&self) -> Result<SyncPolicy> {
        match self.policy {
            SyncPolicyKind::Always => Ok(SyncPolicy::Always),
            SyncPolicyKind::Never => Ok(SyncPolicy::Never),
            SyncPolicyKind::BelowVersion => {
                let platform = required_version(self.platform_version.as_deref(), "platform_version")?;
                let threshold =
                    required_version(self.threshold_version.as_deref(), "threshold_version")?;
                Ok(SyncPolicy::BelowVersion {
                    platform,
                    threshold,
                })
            }
        }
    }
}

fn required_version(raw: Option<&str>, field: &str) -> Result<PlatformVersion> {
    raw.ok_or_else(|| DefaultsError::InvalidVersion(format!("missing sync.{field}")))?
        .parse()
}

impl DefaultsConfig {
    /// Parse a TOML file. A missing file yields the defaults; a malformed
    /// one is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        match std::fs::read_to_string(path.as_ref()) {
            Ok(content) => Self::from_toml(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn synchronize_interval(&self) -> Result<Duration> {
        let secs = self.synchronize_interval_secs;
        match Duration::try_from_secs_f64(secs) {
            Ok(d) if !d.is_zero() => Ok(d),
            _ => Err(DefaultsError::InvalidInterval(secs)),
        }
    }

    /// Apply `SIMPLE_DEFAULTS_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(env::vars());
    }

    pub(crate) fn apply_overrides(&mut self, vars: impl IntoIterator<Item = (String, String)>) {
        for (key, val) in vars {
            match key.as_str() {
                "SIMPLE_DEFAULTS_ROOT_KEY" => self.root_key = val,
                "SIMPLE_DEFAULTS_INTERVAL" => match val.parse::<f64>() {
                    Ok(secs) => self.synchronize_interval_secs = secs,
                    Err(_) => tracing::warn!(value = %val, "ignoring invalid SIMPLE_DEFAULTS_INTERVAL"),
                },
                "SIMPLE_DEFAULTS_STORAGE" => match val.to_lowercase().as_str() {
                    "sled" => self.storage.backend = StorageBackend::Sled,
                    "memory" => self.storage.backend = StorageBackend::Memory,
                    other => tracing::warn!(value = %other, "unknown SIMPLE_DEFAULTS_STORAGE value"),
                },
                "SIMPLE_DEFAULTS_DATA_DIR" => self.storage.data_dir = val,
                "SIMPLE_DEFAULTS_DEBUG" => {
                    self.debug = matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
                }
                _ => {}
            }
        }
    }
}
