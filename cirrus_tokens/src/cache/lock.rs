//! Cross-process exclusion through a lock file

use std::{
    fs, io,
    io::Write,
    path::{Path, PathBuf},
    time::Duration,
};

use thiserror::Error;
use tokio::time::Instant;

/// An error acquiring a [`FileLock`]
#[derive(Debug, Error)]
pub enum LockError {
    /// Another holder kept the lock past the deadline
    #[error("timed out after {waited:?} waiting for lock file {}", .path.display())]
    Timeout {
        /// The contended lock file
        path: PathBuf,
        /// How long the caller waited
        waited: Duration,
    },
    /// The lock file could not be created
    #[error("unable to create lock file {}", .path.display())]
    Io {
        /// The lock file
        path: PathBuf,
        /// The underlying error
        #[source]
        source: io::Error,
    },
}

/// A lock held by whoever manages to create its file
///
/// The lock is advisory: it excludes only other holders that use the same
/// path.
#[derive(Clone, Debug)]
pub struct FileLock {
    path: PathBuf,
    poll_interval: Duration,
}

impl FileLock {
    /// Constructs a lock over `path`, polling at `poll_interval` while contended
    pub fn new(path: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            path: path.into(),
            poll_interval,
        }
    }

    /// The lock file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Waits up to `timeout` to become the lock holder
    ///
    /// Dropping the returned future while waiting leaves nothing behind.
    pub async fn acquire(&self, timeout: Duration) -> Result<LockHandle, LockError> {
        let started = Instant::now();
        let deadline = started + timeout;

        loop {
            // Synchronous so that a cancelled caller can never create the
            // file without also receiving the handle that removes it.
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.path)
            {
                Ok(mut file) => {
                    if let Err(error) = writeln!(file, "{}", std::process::id()) {
                        tracing::warn!(
                            path = %self.path.display(),
                            %error,
                            "unable to record owner in lock file"
                        );
                    }
                    tracing::trace!(path = %self.path.display(), "acquired lock");
                    return Ok(LockHandle {
                        path: self.path.clone(),
                        released: false,
                    });
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
                Err(source) => {
                    return Err(LockError::Io {
                        path: self.path.clone(),
                        source,
                    })
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(LockError::Timeout {
                    path: self.path.clone(),
                    waited: now - started,
                });
            }

            tracing::trace!(path = %self.path.display(), "lock is held elsewhere, waiting");
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}

/// Proof of holding a [`FileLock`]
///
/// The lock file is removed on [`release`](LockHandle::release) or when the
/// handle is dropped, whichever comes first.
#[derive(Debug)]
#[must_use = "the lock is released as soon as the handle is dropped"]
pub struct LockHandle {
    path: PathBuf,
    released: bool,
}

impl LockHandle {
    /// Releases the lock, reporting any failure to remove the lock file
    pub fn release(mut self) -> io::Result<()> {
        self.released = true;
        fs::remove_file(&self.path)
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        if let Err(error) = fs::remove_file(&self.path) {
            tracing::warn!(
                path = %self.path.display(),
                %error,
                "unable to remove lock file"
            );
        } else {
            tracing::trace!(path = %self.path.display(), "released lock");
        }
    }
}
