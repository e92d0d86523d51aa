//! Key material and the session secrets bundle.
//!
//! [`KeyMaterial`] is an owned, fixed-length byte buffer that is wiped when
//! dropped. [`SessionSecrets`] groups the three values a secure channel is
//! constructed from: the AES-128 session key, the HMAC key and the IV.
//!
//! How the peers agree on these values is outside this crate. The bundle
//! can be generated locally and exchanged out of band as hex text.

use crate::random::fill_random;
use crate::{AUTH_KEY_SIZE, CryptoError, IV_SIZE, SESSION_KEY_SIZE};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Owned secret bytes of fixed length.
///
/// The length is set at construction and never changes. The bytes are only
/// reachable through [`KeyMaterial::as_bytes`] and are zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    bytes: Box<[u8]>,
}

impl KeyMaterial {
    /// Generate `len` bytes of fresh key material from the OS CSPRNG.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::RandomFailed`] if the randomness source fails.
    pub fn generate(len: usize) -> Result<Self, CryptoError> {
        let mut bytes = vec![0u8; len].into_boxed_slice();
        fill_random(&mut bytes)?;
        Ok(Self { bytes })
    }

    /// Wrap caller-supplied bytes verbatim.
    ///
    /// No strength or length check is made here.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec().into_boxed_slice(),
        }
    }

    /// Decode key material from a hex string.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidEncoding`] if `text` is not valid hex.
    pub fn from_hex(text: &str) -> Result<Self, CryptoError> {
        let decoded = Zeroizing::new(
            hex::decode(text.trim()).map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?,
        );
        Ok(Self::from_bytes(&decoded))
    }

    /// Read-only view of the key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Key length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the key is zero-length.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Lowercase hex encoding, wiped when the returned string is dropped.
    #[must_use]
    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(&self.bytes))
    }

    /// Check the key has exactly `expected` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyLength`] on mismatch.
    pub fn require_len(&self, expected: usize) -> Result<&Self, CryptoError> {
        if self.bytes.len() != expected {
            return Err(CryptoError::InvalidKeyLength {
                expected,
                actual: self.bytes.len(),
            });
        }
        Ok(self)
    }
}

impl From<Vec<u8>> for KeyMaterial {
    fn from(bytes: Vec<u8>) -> Self {
        Self {
            bytes: bytes.into_boxed_slice(),
        }
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("len", &self.bytes.len())
            .finish_non_exhaustive()
    }
}

/// Secrets a channel is constructed from.
///
/// Both peers must hold the same bundle. The encrypt state on one side
/// mirrors the decrypt state on the other.
#[derive(Clone, Debug)]
pub struct SessionSecrets {
    session_key: KeyMaterial,
    auth_key: KeyMaterial,
    iv: KeyMaterial,
}

impl ZeroizeOnDrop for SessionSecrets {}

impl SessionSecrets {
    /// Generate a fresh bundle from the OS CSPRNG.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::RandomFailed`] if the randomness source fails.
    pub fn generate() -> Result<Self, CryptoError> {
        Ok(Self {
            session_key: KeyMaterial::generate(SESSION_KEY_SIZE)?,
            auth_key: KeyMaterial::generate(AUTH_KEY_SIZE)?,
            iv: KeyMaterial::generate(IV_SIZE)?,
        })
    }

    /// Build a bundle from existing key material.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyLength`] if any part has the wrong size.
    pub fn from_parts(
        session_key: KeyMaterial,
        auth_key: KeyMaterial,
        iv: KeyMaterial,
    ) -> Result<Self, CryptoError> {
        session_key.require_len(SESSION_KEY_SIZE)?;
        auth_key.require_len(AUTH_KEY_SIZE)?;
        iv.require_len(IV_SIZE)?;

        Ok(Self {
            session_key,
            auth_key,
            iv,
        })
    }

    /// AES-128 session key (16 bytes)
    #[must_use]
    pub fn session_key(&self) -> &KeyMaterial {
        &self.session_key
    }

    /// HMAC-SHA-256 key (32 bytes)
    #[must_use]
    pub fn auth_key(&self) -> &KeyMaterial {
        &self.auth_key
    }

    /// CFB initialization vector (16 bytes)
    #[must_use]
    pub fn iv(&self) -> &KeyMaterial {
        &self.iv
    }

    /// Encode as text: one hex line per key, in the order
    /// session key, auth key, IV.
    #[must_use]
    pub fn to_hex_lines(&self) -> Zeroizing<String> {
        let mut text = Zeroizing::new(String::from("# tether session secrets\n"));
        for key in [&self.session_key, &self.auth_key, &self.iv] {
            text.push_str(&key.to_hex());
            text.push('\n');
        }
        text
    }

    /// Parse the text produced by [`SessionSecrets::to_hex_lines`].
    ///
    /// Blank lines and lines starting with `#` are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidEncoding`] if there are not exactly three
    /// hex lines, or [`CryptoError::InvalidKeyLength`] if a key has the wrong size.
    pub fn from_hex_lines(text: &str) -> Result<Self, CryptoError> {
        let mut keys = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(KeyMaterial::from_hex);

        let (Some(session_key), Some(auth_key), Some(iv), None) =
            (keys.next(), keys.next(), keys.next(), keys.next())
        else {
            return Err(CryptoError::InvalidEncoding(
                "expected exactly three key lines".to_string(),
            ));
        };

        Self::from_parts(session_key?, auth_key?, iv?)
    }
}
