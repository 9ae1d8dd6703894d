//! The versioned, encrypted on-disk cache record

use aes::Aes256;
use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
use ring::{
    aead::{self, Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM},
    rand::{SecureRandom, SystemRandom},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::key::CacheKey;

/// AES-256 in CFB mode; read-only support for entries from older releases
pub const LEGACY_VERSION: u8 = 0;

/// AES-256-GCM; the format written by this release
pub const CURRENT_VERSION: u8 = 1;

const LEGACY_IV_LEN: usize = 16;

/// An error encrypting or decrypting a cache entry
#[derive(Debug, Error)]
pub enum EntryError {
    /// The entry was written in a format this release cannot read
    #[error("unsupported cache entry version {0}")]
    UnsupportedVersion(u8),
    /// The nonce or IV has the wrong length for the entry's version
    #[error("cache entry nonce must be {expected} bytes, got {actual}")]
    InvalidNonce {
        /// The length required by the entry's version
        expected: usize,
        /// The length found in the entry
        actual: usize,
    },
    /// Authenticated decryption failed: wrong key or tampered entry
    #[error("cache entry failed authentication")]
    Authentication,
    /// No randomness was available for a fresh nonce
    #[error("unable to generate cache entry nonce")]
    Randomness,
    /// The cipher rejected the key or input
    #[error("unable to encrypt cache entry")]
    Encryption,
}

/// An encrypted cache record
///
/// `version` selects the cipher; entries written before versioning existed
/// carry no version and are read as [`LEGACY_VERSION`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(default)]
    version: u8,
    #[serde(with = "b64", alias = "iv")]
    nonce: Vec<u8>,
    #[serde(with = "b64")]
    ciphertext: Vec<u8>,
}

impl CacheEntry {
    /// Encrypts `plaintext` with the current format
    pub fn seal(key: &CacheKey, plaintext: &[u8]) -> Result<Self, EntryError> {
        let mut nonce = [0u8; aead::NONCE_LEN];
        SystemRandom::new()
            .fill(&mut nonce)
            .map_err(|_| EntryError::Randomness)?;

        let mut ciphertext = plaintext.to_vec();
        gcm_key(key)?
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce),
                Aad::empty(),
                &mut ciphertext,
            )
            .map_err(|_| EntryError::Encryption)?;

        Ok(Self {
            version: CURRENT_VERSION,
            nonce: nonce.to_vec(),
            ciphertext,
        })
    }

    /// Decrypts the entry with the cipher named by its version
    pub fn open(&self, key: &CacheKey) -> Result<Vec<u8>, EntryError> {
        match self.version {
            LEGACY_VERSION => self.open_legacy(key),
            CURRENT_VERSION => self.open_current(key),
            other => Err(EntryError::UnsupportedVersion(other)),
        }
    }

    /// The format version of the entry
    pub fn version(&self) -> u8 {
        self.version
    }

    fn open_current(&self, key: &CacheKey) -> Result<Vec<u8>, EntryError> {
        let nonce = Nonce::try_assume_unique_for_key(&self.nonce).map_err(|_| {
            EntryError::InvalidNonce {
                expected: aead::NONCE_LEN,
                actual: self.nonce.len(),
            }
        })?;

        let mut buf = self.ciphertext.clone();
        let plaintext = gcm_key(key)?
            .open_in_place(nonce, Aad::empty(), &mut buf)
            .map_err(|_| EntryError::Authentication)?;
        Ok(plaintext.to_vec())
    }

    // Unauthenticated: a wrong key yields garbage rather than an error
    fn open_legacy(&self, key: &CacheKey) -> Result<Vec<u8>, EntryError> {
        let decryptor =
            cfb_mode::Decryptor::<Aes256>::new_from_slices(key.as_bytes(), &self.nonce).map_err(
                |_| EntryError::InvalidNonce {
                    expected: LEGACY_IV_LEN,
                    actual: self.nonce.len(),
                },
            )?;

        let mut buf = self.ciphertext.clone();
        decryptor.decrypt(&mut buf);
        Ok(buf)
    }

    #[cfg(test)]
    pub(crate) fn seal_legacy(key: &CacheKey, iv: [u8; LEGACY_IV_LEN], plaintext: &[u8]) -> Self {
        let mut buf = plaintext.to_vec();
        cfb_mode::Encryptor::<Aes256>::new_from_slices(key.as_bytes(), &iv)
            .unwrap()
            .encrypt(&mut buf);
        Self {
            version: LEGACY_VERSION,
            nonce: iv.to_vec(),
            ciphertext: buf,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }
}

fn gcm_key(key: &CacheKey) -> Result<LessSafeKey, EntryError> {
    UnboundKey::new(&AES_256_GCM, key.as_bytes())
        .map(LessSafeKey::new)
        .map_err(|_| EntryError::Encryption)
}

mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(de::Error::custom)
    }
}
