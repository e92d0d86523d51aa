//! HMAC-SHA-256 tagging.
//!
//! Tags are always the full 32 bytes and are compared in constant time.

use crate::constant_time::verify_32;
use crate::{AUTH_KEY_SIZE, CryptoError, KeyMaterial, MAC_SIZE};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA-256 tag (32 bytes).
///
/// Compare with [`Tag::ct_eq`]; there is no `PartialEq`.
#[derive(Clone, Copy)]
pub struct Tag([u8; MAC_SIZE]);

impl Tag {
    /// Create a tag from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; MAC_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; MAC_SIZE] {
        &self.0
    }

    /// Timing-safe equality.
    #[must_use]
    pub fn ct_eq(&self, other: &Tag) -> bool {
        verify_32(&self.0, &other.0)
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({})", hex::encode(self.0))
    }
}

/// Compute HMAC-SHA-256 over the concatenation of `parts`.
///
/// # Errors
///
/// Returns [`CryptoError::Computation`] if the HMAC primitive rejects the key.
pub fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> Result<Tag, CryptoError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|_| CryptoError::Computation("HMAC-SHA-256 rejected key"))?;
    for part in parts {
        mac.update(part);
    }
    Ok(Tag(mac.finalize().into_bytes().into()))
}

/// Keyed authenticator holding a copy of the channel's auth key.
#[derive(Clone, Debug)]
pub struct Authenticator {
    key: KeyMaterial,
}

// The only secret is the key, which wipes itself
impl zeroize::ZeroizeOnDrop for Authenticator {}

impl Authenticator {
    /// Create an authenticator from a 32-byte HMAC key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyLength`] if the key is not 32 bytes.
    pub fn new(key: KeyMaterial) -> Result<Self, CryptoError> {
        key.require_len(AUTH_KEY_SIZE)?;
        Ok(Self { key })
    }

    /// Tag the concatenation of `parts`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Computation`] if the HMAC primitive fails.
    pub fn tag(&self, parts: &[&[u8]]) -> Result<Tag, CryptoError> {
        hmac_sha256(self.key.as_bytes(), parts)
    }

    /// Recompute the tag over `parts` and compare it with `received`
    /// in constant time.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Computation`] if the HMAC primitive fails.
    pub fn verify(&self, parts: &[&[u8]], received: &Tag) -> Result<bool, CryptoError> {
        Ok(self.tag(parts)?.ct_eq(received))
    }
}
