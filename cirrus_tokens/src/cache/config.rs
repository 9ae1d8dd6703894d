//! Cache configuration

use std::{env, path::PathBuf, time::Duration};

use super::{
    key::{CacheKey, KeyError},
    CacheError,
};

/// Overrides the directory holding cache and lock files
pub const CACHE_DIR_ENV: &str = "CIRRUS_TOKEN_CACHE_DIR";

/// Supplies a base64-encoded 32-byte cache key, used as is
pub const CACHE_KEY_ENV: &str = "CIRRUS_TOKEN_CACHE_KEY";

/// Supplies a secret from which the cache key is derived
pub const CACHE_SECRET_ENV: &str = "CIRRUS_TOKEN_CACHE_SECRET";

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Where and how an encrypted cache stores its files
#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub(super) directory: PathBuf,
    pub(super) lock_timeout: Duration,
    pub(super) poll_interval: Duration,
    pub(super) key: Option<CacheKey>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: env::temp_dir(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            key: None,
        }
    }
}

impl CacheConfig {
    /// Stores cache files in `directory`
    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = directory.into();
        self
    }

    /// Bounds how long a request waits for another holder of the lock
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// How often a contended lock is retried
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Encrypts with `key` instead of one derived from the source's secret
    pub fn with_key(mut self, key: CacheKey) -> Self {
        self.key = Some(key);
        self
    }

    /// The directory holding cache files
    pub fn directory(&self) -> &std::path::Path {
        &self.directory
    }

    /// The lock acquisition deadline
    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Applies overrides from the process environment
    ///
    /// An explicit key in [`CACHE_KEY_ENV`] takes precedence over a secret in
    /// [`CACHE_SECRET_ENV`].
    pub fn with_env_overrides(self) -> Result<Self, CacheError> {
        Ok(self.with_overrides_from(|name| env::var(name).ok())?)
    }

    fn with_overrides_from(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, KeyError> {
        let lookup = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(dir) = lookup(CACHE_DIR_ENV) {
            tracing::debug!(directory = %dir, "token cache directory overridden");
            self.directory = PathBuf::from(dir);
        }

        if let Some(encoded) = lookup(CACHE_KEY_ENV) {
            tracing::debug!("token cache key overridden");
            self.key = Some(CacheKey::from_base64(&encoded)?);
        } else if let Some(secret) = lookup(CACHE_SECRET_ENV) {
            tracing::debug!("token cache key derived from overriding secret");
            self.key = Some(CacheKey::derive(secret.as_bytes()));
        }

        Ok(self)
    }
}
