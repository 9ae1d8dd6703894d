//! Cache encryption keys and file naming

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine};
use ring::digest;
use thiserror::Error;

/// Length of a cache encryption key in bytes
pub const KEY_LEN: usize = 32;

const KEY_CONTEXT: &[u8] = b"cirrus token cache key\0";
const FILE_PREFIX: &str = "token-cache-";

/// An error constructing a [`CacheKey`]
#[derive(Debug, Error)]
pub enum KeyError {
    /// The key material was not valid base64
    #[error("cache key is not valid base64")]
    Encoding(#[from] base64::DecodeError),
    /// The key material had the wrong length
    #[error("cache key must be 32 bytes, got {0}")]
    Length(usize),
}

/// A 256-bit key used to encrypt cache entries
#[derive(Clone, PartialEq, Eq)]
pub struct CacheKey([u8; KEY_LEN]);

impl CacheKey {
    /// Derives a key from a long-lived secret
    ///
    /// Every holder of the same secret derives the same key.
    pub fn derive(secret: &[u8]) -> Self {
        let mut ctx = digest::Context::new(&digest::SHA256);
        ctx.update(KEY_CONTEXT);
        ctx.update(secret);

        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(ctx.finish().as_ref());
        Self(key)
    }

    /// Uses raw key bytes directly
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let key = <[u8; KEY_LEN]>::try_from(bytes).map_err(|_| KeyError::Length(bytes.len()))?;
        Ok(Self(key))
    }

    /// Decodes a base64-encoded key
    pub fn from_base64(encoded: &str) -> Result<Self, KeyError> {
        Self::from_bytes(&STANDARD.decode(encoded.trim())?)
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CacheKey(***)")
    }
}

/// The cache file name for a principal
///
/// The suffix is hashed so that neither its length nor its characters leak
/// into the file system.
pub(crate) fn cache_file_name(suffix: &[u8]) -> String {
    let hash = digest::digest(&digest::SHA256, suffix);
    let mut name = String::with_capacity(FILE_PREFIX.len() + 2 * digest::SHA256_OUTPUT_LEN);
    name.push_str(FILE_PREFIX);
    for b in hash.as_ref() {
        name.push_str(&format!("{b:02x}"));
    }
    name
}
