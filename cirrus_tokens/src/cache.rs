//! An encrypted token cache shared between processes
//!
//! [`EncryptedCache`] wraps another [`AsyncTokenSource`] and keeps the most
//! recent token in an encrypted file. Every request holds a lock file for
//! the whole read, fetch, and write sequence, so processes configured for
//! the same principal never fetch concurrently and converge on one token.

use std::{
    error, io,
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use cirrus_clock::{Clock, System};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::{
    sources::{AsyncTokenSource, CacheMaterial},
    Token,
};

mod config;
mod entry;
mod key;
mod lock;

pub use config::{CacheConfig, CACHE_DIR_ENV, CACHE_KEY_ENV, CACHE_SECRET_ENV};
pub use entry::{CacheEntry, EntryError, CURRENT_VERSION, LEGACY_VERSION};
pub use key::{CacheKey, KeyError, KEY_LEN};
pub use lock::{FileLock, LockError, LockHandle};

/// An error from an [`EncryptedCache`]
#[derive(Debug, Error)]
pub enum CacheError {
    /// The cache directory could not be created
    #[error("unable to create token cache directory {}", .path.display())]
    Directory {
        /// The cache directory
        path: PathBuf,
        /// The underlying error
        #[source]
        source: io::Error,
    },
    /// The lock file could not be created
    #[error("unable to create token cache lock {}", .path.display())]
    Lock {
        /// The lock file
        path: PathBuf,
        /// The underlying error
        #[source]
        source: io::Error,
    },
    /// Another holder kept the lock past the configured deadline
    #[error("timed out after {waited:?} waiting for token cache lock {}", .path.display())]
    LockTimeout {
        /// The lock file
        path: PathBuf,
        /// How long the request waited
        waited: Duration,
    },
    /// The cache file exists but could not be read
    #[error("unable to read token cache {}", .path.display())]
    Read {
        /// The cache file
        path: PathBuf,
        /// The underlying error
        #[source]
        source: io::Error,
    },
    /// The cache file is not a cache entry
    #[error("token cache {} is corrupt", .path.display())]
    Decode {
        /// The cache file
        path: PathBuf,
        /// The underlying error
        #[source]
        source: serde_json::Error,
    },
    /// The cache entry could not be decrypted
    #[error("unable to decrypt token cache {}", .path.display())]
    Decrypt {
        /// The cache file
        path: PathBuf,
        /// The underlying error
        #[source]
        source: EntryError,
    },
    /// The cache entry was written in a format this release cannot read
    #[error("token cache {} has unsupported version {version}", .path.display())]
    UnsupportedVersion {
        /// The cache file
        path: PathBuf,
        /// The version found in the entry
        version: u8,
    },
    /// A configured cache key is malformed
    #[error("invalid token cache key")]
    InvalidKey(#[from] KeyError),
    /// A fresh token could not be encrypted
    #[error("unable to encrypt token for the cache")]
    Encrypt(#[source] EntryError),
    /// A fresh token could not be written to the cache file
    #[error("unable to write token cache {}", .path.display())]
    Write {
        /// The cache file
        path: PathBuf,
        /// The underlying error
        #[source]
        source: io::Error,
    },
    /// The wrapped source failed to produce a token
    #[error("token source failed")]
    Source(#[source] Box<dyn error::Error + Send + Sync + 'static>),
}

impl CacheError {
    /// Whether the wrapped source, rather than the cache, failed
    pub fn is_source(&self) -> bool {
        matches!(self, Self::Source(_))
    }

    /// Whether the request gave up waiting for another holder of the lock
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }
}

impl From<LockError> for CacheError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Timeout { path, waited } => Self::LockTimeout { path, waited },
            LockError::Io { path, source } => Self::Lock { path, source },
        }
    }
}

/// A token source that consults an encrypted cache file before its inner
/// source
///
/// Within the lock, a cached token that has not expired is returned as is.
/// Otherwise the inner source is asked for a token, which is written back
/// to the cache before the lock is released. A missing cache file, or one
/// holding a token that no longer parses, simply sends the request to the
/// inner source. Any other problem with the file is returned as an error.
#[derive(Debug)]
pub struct EncryptedCache<S, C = System> {
    source: S,
    key: CacheKey,
    directory: PathBuf,
    cache_path: PathBuf,
    lock: FileLock,
    lock_timeout: Duration,
    clock: C,
}

impl<S> EncryptedCache<S, System> {
    /// Wraps `source` with a cache identified by `suffix` and encrypted with
    /// `key`
    ///
    /// A key supplied in `config` takes precedence over `key`.
    pub fn new(source: S, config: CacheConfig, key: CacheKey, suffix: impl AsRef<[u8]>) -> Self {
        let file_name = key::cache_file_name(suffix.as_ref());
        let cache_path = config.directory.join(&file_name);
        let lock_path = config.directory.join(format!("{file_name}.lock"));

        Self {
            source,
            key: config.key.unwrap_or(key),
            lock: FileLock::new(lock_path, config.poll_interval),
            lock_timeout: config.lock_timeout,
            directory: config.directory,
            cache_path,
            clock: System,
        }
    }

    /// Wraps `source` with a cache named and keyed by the source's own
    /// principal
    pub fn for_source(source: S, config: CacheConfig) -> Self
    where
        S: CacheMaterial,
    {
        let key = CacheKey::derive(source.cache_secret());
        let suffix = source.cache_suffix();
        Self::new(source, config, key, suffix)
    }
}

impl<S, C> EncryptedCache<S, C> {
    /// Replaces the clock used to judge expiry of cached tokens
    pub fn with_clock<D: Clock>(self, clock: D) -> EncryptedCache<S, D> {
        EncryptedCache {
            source: self.source,
            key: self.key,
            directory: self.directory,
            cache_path: self.cache_path,
            lock: self.lock,
            lock_timeout: self.lock_timeout,
            clock,
        }
    }

    /// The encrypted cache file
    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// The lock file guarding the cache file
    pub fn lock_path(&self) -> &Path {
        self.lock.path()
    }

    /// The wrapped source
    pub fn inner(&self) -> &S {
        &self.source
    }

    /// Removes the cache file, so the next request goes to the inner source
    ///
    /// Holds the lock while doing so. Clearing an absent cache succeeds.
    pub async fn clear(&self) -> Result<(), CacheError> {
        self.ensure_directory().await?;
        let handle = self.lock.acquire(self.lock_timeout).await?;

        match tokio::fs::remove_file(&self.cache_path).await {
            Ok(()) => tracing::debug!(path = %self.cache_path.display(), "token cache cleared"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(CacheError::Write {
                    path: self.cache_path.clone(),
                    source,
                })
            }
        }

        release(handle);
        Ok(())
    }

    async fn ensure_directory(&self) -> Result<(), CacheError> {
        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|source| CacheError::Directory {
                path: self.directory.clone(),
                source,
            })
    }

    async fn read_cached(&self) -> Result<Option<Token>, CacheError> {
        let data = match tokio::fs::read(&self.cache_path).await {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("no cached token");
                return Ok(None);
            }
            Err(source) => {
                return Err(CacheError::Read {
                    path: self.cache_path.clone(),
                    source,
                })
            }
        };

        let entry: CacheEntry =
            serde_json::from_slice(&data).map_err(|source| CacheError::Decode {
                path: self.cache_path.clone(),
                source,
            })?;

        let plaintext = entry.open(&self.key).map_err(|source| match source {
            EntryError::UnsupportedVersion(version) => CacheError::UnsupportedVersion {
                path: self.cache_path.clone(),
                version,
            },
            source => CacheError::Decrypt {
                path: self.cache_path.clone(),
                source,
            },
        })?;

        // Entries from older formats may decrypt to something that is no
        // longer a token; those are replaced rather than reported.
        let token = String::from_utf8(plaintext)
            .ok()
            .and_then(|raw| Token::parse(raw).ok());
        if token.is_none() {
            tracing::debug!(version = entry.version(), "cached entry is not a usable token");
        }

        Ok(token)
    }

    async fn write_cached(&self, token: &Token) -> Result<(), CacheError> {
        let entry = CacheEntry::seal(&self.key, token.access_token().as_str().as_bytes())
            .map_err(CacheError::Encrypt)?;
        let data = serde_json::to_vec(&entry).map_err(|source| CacheError::Write {
            path: self.cache_path.clone(),
            source: io::Error::new(io::ErrorKind::InvalidData, source),
        })?;

        write_atomically(&self.cache_path, &data)
            .await
            .map_err(|source| CacheError::Write {
                path: self.cache_path.clone(),
                source,
            })
    }
}

#[async_trait]
impl<S, C> AsyncTokenSource for EncryptedCache<S, C>
where
    S: AsyncTokenSource,
    C: Clock + Send + Sync,
{
    type Error = CacheError;

    async fn request_token(&self) -> Result<Token, Self::Error> {
        self.request_through_cache().await
    }
}

impl<S, C> EncryptedCache<S, C>
where
    S: AsyncTokenSource,
    C: Clock + Send + Sync,
{
    #[tracing::instrument(
        err,
        skip(self),
        fields(cache_path = %self.cache_path.display()),
    )]
    async fn request_through_cache(&self) -> Result<Token, CacheError> {
        self.ensure_directory().await?;
        let handle = self.lock.acquire(self.lock_timeout).await?;

        if let Some(token) = self.read_cached().await? {
            if !token.is_expired_with_clock(&self.clock) {
                tracing::debug!(expiry = token.expiry().0, "using cached token");
                release(handle);
                return Ok(token);
            }
            tracing::debug!(expiry = token.expiry().0, "cached token has expired");
        }

        let token = self
            .source
            .request_token()
            .await
            .map_err(|err| CacheError::Source(Box::new(err)))?;

        self.write_cached(&token).await?;
        tracing::debug!(expiry = token.expiry().0, "cached fresh token");

        release(handle);
        Ok(token)
    }
}

fn release(handle: LockHandle) {
    if let Err(error) = handle.release() {
        tracing::warn!(%error, "unable to release token cache lock");
    }
}

/// Replaces `path` with `data` so that readers see the old or the new
/// contents, never a mix
async fn write_atomically(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let mut opts = tokio::fs::OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    opts.mode(0o600);

    let mut file = opts.open(&tmp_path).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&tmp_path, path).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cirrus_clock::{TestClock, UnixTime};

    use super::*;
    use crate::test::{FailingSource, InstrumentedSource};

    const NOW: u64 = 1_700_000_000;

    struct Fixture {
        dir: tempfile::TempDir,
        clock: TestClock,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
                clock: TestClock::new(UnixTime(NOW)),
            }
        }

        fn config(&self) -> CacheConfig {
            CacheConfig::default()
                .with_directory(self.dir.path())
                .with_poll_interval(Duration::from_millis(5))
        }

        fn cache<S>(&self, source: S) -> EncryptedCache<S, TestClock> {
            self.cache_with(source, self.config())
        }

        fn cache_with<S>(&self, source: S, config: CacheConfig) -> EncryptedCache<S, TestClock> {
            EncryptedCache::new(
                source,
                config,
                CacheKey::derive(b"principal secret"),
                "https://auth.example.com/token|client",
            )
            .with_clock(self.clock.clone())
        }
    }

    fn write_entry(path: &Path, entry: &CacheEntry) {
        std::fs::write(path, serde_json::to_vec(entry).unwrap()).unwrap();
    }

    mod when_cold {
        use super::*;

        #[tokio::test]
        async fn fetches_once_and_writes_the_cache() {
            let fx = Fixture::new();
            let source = InstrumentedSource::new(NOW + 3600);
            let cache = fx.cache(source.clone());

            let token = cache.request_token().await.unwrap();

            assert_eq!(source.calls(), 1);
            assert_eq!(token.expiry(), UnixTime(NOW + 3600));
            assert!(cache.cache_path().exists());
            assert!(!cache.lock_path().exists());
        }

        #[tokio::test]
        async fn a_second_request_is_served_from_the_cache() {
            let fx = Fixture::new();
            let source = InstrumentedSource::new(NOW + 3600);
            let cache = fx.cache(source.clone());

            let first = cache.request_token().await.unwrap();
            let second = cache.request_token().await.unwrap();

            assert_eq!(source.calls(), 1);
            assert_eq!(first, second);
        }

        #[tokio::test]
        async fn creates_a_missing_directory() {
            let fx = Fixture::new();
            let source = InstrumentedSource::new(NOW + 3600);
            let config = fx.config().with_directory(fx.dir.path().join("nested/dir"));
            let cache = fx.cache_with(source.clone(), config);

            cache.request_token().await.unwrap();

            assert!(cache.cache_path().starts_with(fx.dir.path().join("nested/dir")));
            assert!(cache.cache_path().exists());
        }

        #[cfg(unix)]
        #[tokio::test]
        async fn the_cache_file_is_private() {
            use std::os::unix::fs::PermissionsExt;

            let fx = Fixture::new();
            let cache = fx.cache(InstrumentedSource::new(NOW + 3600));

            cache.request_token().await.unwrap();

            let mode = std::fs::metadata(cache.cache_path())
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        #[tokio::test]
        async fn the_cache_file_does_not_contain_the_token() {
            let fx = Fixture::new();
            let cache = fx.cache(InstrumentedSource::new(NOW + 3600));

            let token = cache.request_token().await.unwrap();

            let contents = std::fs::read_to_string(cache.cache_path()).unwrap();
            assert!(!contents.contains(token.access_token().as_str()));
            let entry: CacheEntry = serde_json::from_str(&contents).unwrap();
            assert_eq!(entry.version(), CURRENT_VERSION);
        }
    }

    mod when_cached_token_expired {
        use super::*;

        #[tokio::test]
        async fn fetches_exactly_once_and_overwrites() {
            let fx = Fixture::new();
            let source = InstrumentedSource::new(NOW + 60);
            let cache = fx.cache(source.clone());

            let first = cache.request_token().await.unwrap();
            let before = std::fs::read(cache.cache_path()).unwrap();

            fx.clock.set(UnixTime(NOW + 60));
            let second = cache.request_token().await.unwrap();
            let after = std::fs::read(cache.cache_path()).unwrap();

            assert_eq!(source.calls(), 2);
            assert_ne!(first, second);
            assert_eq!(second.expiry(), UnixTime(NOW + 61));
            assert_ne!(before, after);
        }

        #[tokio::test]
        async fn the_fresh_token_is_shared_with_other_instances() {
            let fx = Fixture::new();
            let source = InstrumentedSource::new(NOW + 60);
            let writer = fx.cache(source.clone());
            let reader = fx.cache(source.clone());

            writer.request_token().await.unwrap();
            let from_reader = reader.request_token().await.unwrap();

            assert_eq!(source.calls(), 1);
            assert_eq!(from_reader.expiry(), UnixTime(NOW + 60));
        }
    }

    mod when_locked {
        use super::*;

        #[tokio::test]
        async fn gives_up_after_the_lock_timeout() {
            let fx = Fixture::new();
            let source = InstrumentedSource::new(NOW + 3600);
            let config = fx.config().with_lock_timeout(Duration::from_millis(200));
            let cache = fx.cache_with(source.clone(), config);
            std::fs::write(cache.lock_path(), b"12345").unwrap();

            let started = std::time::Instant::now();
            let err = tokio::time::timeout(Duration::from_secs(5), cache.request_token())
                .await
                .expect("lock wait should be bounded")
                .unwrap_err();

            assert!(err.is_lock_timeout());
            assert!(started.elapsed() >= Duration::from_millis(200));
            assert_eq!(source.calls(), 0);
            assert!(cache.lock_path().exists());
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
        async fn concurrent_instances_fetch_one_at_a_time() {
            let fx = Fixture::new();
            // Tokens already expired force every request to fetch
            let source = InstrumentedSource::new(NOW - 100).with_delay(Duration::from_millis(30));

            let tasks: Vec<_> = (0..4)
                .map(|_| {
                    let cache = fx.cache(source.clone());
                    tokio::spawn(async move { cache.request_token().await })
                })
                .collect();

            for task in tasks {
                task.await.unwrap().unwrap();
            }

            assert_eq!(source.calls(), 4);
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
        async fn concurrent_instances_converge_on_one_token() {
            let fx = Fixture::new();
            let source = InstrumentedSource::new(NOW + 3600).with_delay(Duration::from_millis(30));

            let tasks: Vec<_> = (0..4)
                .map(|_| {
                    let cache = fx.cache(source.clone());
                    tokio::spawn(async move { cache.request_token().await })
                })
                .collect();

            let mut tokens = Vec::new();
            for task in tasks {
                tokens.push(task.await.unwrap().unwrap());
            }

            assert_eq!(source.calls(), 1);
            assert!(tokens.windows(2).all(|w| w[0] == w[1]));
        }
    }

    mod when_cache_file_unusable {
        use super::*;

        #[tokio::test]
        async fn a_corrupt_file_is_a_decode_error() {
            let fx = Fixture::new();
            let source = InstrumentedSource::new(NOW + 3600);
            let cache = fx.cache(source.clone());
            std::fs::write(cache.cache_path(), b"{ not json").unwrap();

            let err = cache.request_token().await.unwrap_err();

            assert!(matches!(err, CacheError::Decode { .. }));
            assert_eq!(source.calls(), 0);
            assert!(!cache.lock_path().exists());
        }

        #[tokio::test]
        async fn an_entry_under_another_key_is_a_decrypt_error() {
            let fx = Fixture::new();
            let source = InstrumentedSource::new(NOW + 3600);
            let cache = fx.cache(source.clone());
            let foreign = CacheEntry::seal(&CacheKey::derive(b"someone else"), b"a.b.c").unwrap();
            write_entry(cache.cache_path(), &foreign);

            let err = cache.request_token().await.unwrap_err();

            assert!(matches!(
                err,
                CacheError::Decrypt {
                    source: EntryError::Authentication,
                    ..
                }
            ));
            assert_eq!(source.calls(), 0);
        }

        #[tokio::test]
        async fn an_unknown_version_is_rejected() {
            let fx = Fixture::new();
            let cache = fx.cache(InstrumentedSource::new(NOW + 3600));
            let key = CacheKey::derive(b"principal secret");
            let entry = CacheEntry::seal(&key, b"a.b.c").unwrap().with_version(2);
            write_entry(cache.cache_path(), &entry);

            let err = cache.request_token().await.unwrap_err();

            assert!(matches!(
                err,
                CacheError::UnsupportedVersion { version: 2, .. }
            ));
        }

        #[tokio::test]
        async fn an_unparsable_token_is_replaced() {
            let fx = Fixture::new();
            let source = InstrumentedSource::new(NOW + 3600);
            let cache = fx.cache(source.clone());
            let key = CacheKey::derive(b"principal secret");
            write_entry(
                cache.cache_path(),
                &CacheEntry::seal(&key, b"not a token").unwrap(),
            );

            let token = cache.request_token().await.unwrap();

            assert_eq!(source.calls(), 1);
            assert_eq!(token.expiry(), UnixTime(NOW + 3600));
            assert_eq!(cache.request_token().await.unwrap(), token);
            assert_eq!(source.calls(), 1);
        }
    }

    mod when_legacy_entry {
        use super::*;
        use crate::test::jwt_with_exp;

        #[tokio::test]
        async fn a_valid_legacy_token_is_used() {
            let fx = Fixture::new();
            let source = InstrumentedSource::new(NOW + 3600);
            let cache = fx.cache(source.clone());
            let key = CacheKey::derive(b"principal secret");
            let jwt = jwt_with_exp(NOW + 500);
            write_entry(
                cache.cache_path(),
                &CacheEntry::seal_legacy(&key, [1u8; 16], jwt.as_bytes()),
            );

            let token = cache.request_token().await.unwrap();

            assert_eq!(source.calls(), 0);
            assert_eq!(token.access_token().as_str(), jwt);
        }

        #[tokio::test]
        async fn an_unversioned_entry_with_escaped_slashes_is_used() {
            let fx = Fixture::new();
            let source = InstrumentedSource::new(NOW + 3600);
            let cache = fx.cache(source.clone());
            let key = CacheKey::derive(b"principal secret");
            let jwt = jwt_with_exp(NOW + 500);

            let entry = CacheEntry::seal_legacy(&key, [0xff; 16], jwt.as_bytes());
            let mut json = serde_json::to_value(&entry).unwrap();
            let fields = json.as_object_mut().unwrap();
            fields.remove("version");
            let iv = fields.remove("nonce").unwrap();
            fields.insert("iv".to_owned(), iv);
            let written = serde_json::to_string(&json).unwrap().replace('/', "\\/");
            assert!(written.contains("\\/"));
            std::fs::write(cache.cache_path(), written).unwrap();

            let token = cache.request_token().await.unwrap();

            assert_eq!(source.calls(), 0);
            assert_eq!(token.access_token().as_str(), jwt);
        }

        #[tokio::test]
        async fn a_legacy_entry_under_another_key_is_replaced() {
            let fx = Fixture::new();
            let source = InstrumentedSource::new(NOW + 3600);
            let cache = fx.cache(source.clone());
            let jwt = jwt_with_exp(NOW + 500);
            write_entry(
                cache.cache_path(),
                &CacheEntry::seal_legacy(&CacheKey::derive(b"old"), [1u8; 16], jwt.as_bytes()),
            );

            let token = cache.request_token().await.unwrap();

            assert_eq!(source.calls(), 1);
            assert_eq!(token.expiry(), UnixTime(NOW + 3600));
            let entry: CacheEntry =
                serde_json::from_slice(&std::fs::read(cache.cache_path()).unwrap()).unwrap();
            assert_eq!(entry.version(), CURRENT_VERSION);
        }
    }

    mod when_source_fails {
        use super::*;

        #[tokio::test]
        async fn the_error_is_returned_and_the_lock_released() {
            let fx = Fixture::new();
            let source = FailingSource::default();
            let cache = fx.cache(source.clone());

            let err = cache.request_token().await.unwrap_err();

            assert!(err.is_source());
            assert_eq!(source.calls(), 1);
            assert!(!cache.lock_path().exists());
            assert!(!cache.cache_path().exists());
        }
    }

    mod when_cancelled {
        use super::*;

        #[tokio::test]
        async fn the_lock_is_released_and_nothing_is_written() {
            let fx = Fixture::new();
            let source = InstrumentedSource::new(NOW + 3600).with_delay(Duration::from_secs(10));
            let cache = fx.cache(source.clone());

            let result =
                tokio::time::timeout(Duration::from_millis(100), cache.request_token()).await;

            assert!(result.is_err());
            assert!(!cache.lock_path().exists());
            assert!(!cache.cache_path().exists());
        }
    }

    mod clearing {
        use super::*;

        #[tokio::test]
        async fn the_next_request_fetches_again() {
            let fx = Fixture::new();
            let source = InstrumentedSource::new(NOW + 3600);
            let cache = fx.cache(source.clone());

            cache.request_token().await.unwrap();
            cache.clear().await.unwrap();
            assert!(!cache.cache_path().exists());

            cache.request_token().await.unwrap();
            assert_eq!(source.calls(), 2);
        }

        #[tokio::test]
        async fn clearing_an_absent_cache_succeeds() {
            let fx = Fixture::new();
            let cache = fx.cache(InstrumentedSource::new(NOW + 3600));

            cache.clear().await.unwrap();
            assert!(!cache.lock_path().exists());
        }
    }

    mod naming {
        use super::*;
        use crate::sources::StaticTokenSource;

        #[test]
        fn distinct_principals_use_distinct_files() {
            let fx = Fixture::new();
            let key = CacheKey::derive(b"k");
            let a = EncryptedCache::new(Arc::new(()), fx.config(), key.clone(), "url|a");
            let b = EncryptedCache::new(Arc::new(()), fx.config(), key.clone(), "url|b");
            let a2 = EncryptedCache::new(Arc::new(()), fx.config(), key, "url|a");

            assert_ne!(a.cache_path(), b.cache_path());
            assert_eq!(a.cache_path(), a2.cache_path());
            assert_eq!(
                a.lock_path().file_name().unwrap().to_string_lossy(),
                format!(
                    "{}.lock",
                    a.cache_path().file_name().unwrap().to_string_lossy()
                )
            );
        }

        #[tokio::test]
        async fn a_configured_key_overrides_the_derived_key() {
            let fx = Fixture::new();
            let override_key = CacheKey::from_bytes(&[7u8; KEY_LEN]).unwrap();
            let token = crate::test::token_with_exp(NOW + 3600);
            let cache = fx.cache_with(
                StaticTokenSource::new(token),
                fx.config().with_key(override_key.clone()),
            );

            cache.request_token().await.unwrap();

            let entry: CacheEntry =
                serde_json::from_slice(&std::fs::read(cache.cache_path()).unwrap()).unwrap();
            assert!(entry.open(&override_key).is_ok());
            assert!(entry.open(&CacheKey::derive(b"principal secret")).is_err());
        }
    }
}
