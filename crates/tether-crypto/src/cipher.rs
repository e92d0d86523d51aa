//! AES-128-CFB8 stream cipher states.
//!
//! CFB with an 8-bit feedback unit turns AES into a self-synchronizing
//! stream cipher that works on single bytes, so no padding is ever added.
//! The encrypt and decrypt states are separate types: each one advances with
//! every byte it processes and is never reset, so a channel keeps exactly
//! one of each and feeds them bytes in wire order.

use crate::{CryptoError, IV_SIZE, KeyMaterial, SESSION_KEY_SIZE};
use aes::Aes128;
use cfb8::cipher::generic_array::GenericArray;
use cfb8::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use zeroize::ZeroizeOnDrop;

type Aes128Cfb8Enc = cfb8::Encryptor<Aes128>;
type Aes128Cfb8Dec = cfb8::Decryptor<Aes128>;

fn check_lengths(key: &KeyMaterial, iv: &KeyMaterial) -> Result<(), CryptoError> {
    key.require_len(SESSION_KEY_SIZE)?;
    iv.require_len(IV_SIZE)?;
    Ok(())
}

/// Encrypt-direction cipher state.
pub struct StreamEncryptor {
    inner: Aes128Cfb8Enc,
}

impl StreamEncryptor {
    /// Create an encrypt state from a 16-byte key and 16-byte IV.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyLength`] or
    /// [`CryptoError::Computation`] if the cipher rejects the key or IV.
    pub fn new(key: &KeyMaterial, iv: &KeyMaterial) -> Result<Self, CryptoError> {
        check_lengths(key, iv)?;
        let inner = Aes128Cfb8Enc::new_from_slices(key.as_bytes(), iv.as_bytes())
            .map_err(|_| CryptoError::Computation("AES-128-CFB8 rejected key or IV"))?;
        Ok(Self { inner })
    }

    /// Encrypt `buf` in place, advancing the state by `buf.len()` bytes.
    pub fn apply(&mut self, buf: &mut [u8]) {
        for byte in buf.chunks_exact_mut(1) {
            self.inner
                .encrypt_block_mut(GenericArray::from_mut_slice(byte));
        }
    }
}

// cfb8 wipes the feedback register and aes the key schedule on drop
impl ZeroizeOnDrop for StreamEncryptor {}

/// Decrypt-direction cipher state.
pub struct StreamDecryptor {
    inner: Aes128Cfb8Dec,
}

impl StreamDecryptor {
    /// Create a decrypt state from a 16-byte key and 16-byte IV.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyLength`] or
    /// [`CryptoError::Computation`] if the cipher rejects the key or IV.
    pub fn new(key: &KeyMaterial, iv: &KeyMaterial) -> Result<Self, CryptoError> {
        check_lengths(key, iv)?;
        let inner = Aes128Cfb8Dec::new_from_slices(key.as_bytes(), iv.as_bytes())
            .map_err(|_| CryptoError::Computation("AES-128-CFB8 rejected key or IV"))?;
        Ok(Self { inner })
    }

    /// Decrypt `buf` in place, advancing the state by `buf.len()` bytes.
    ///
    /// Only feed bytes that have already been authenticated: any byte
    /// pushed through here that the peer's encryptor did not produce in the
    /// same position desynchronizes every later message.
    pub fn apply(&mut self, buf: &mut [u8]) {
        for byte in buf.chunks_exact_mut(1) {
            self.inner
                .decrypt_block_mut(GenericArray::from_mut_slice(byte));
        }
    }
}

impl ZeroizeOnDrop for StreamDecryptor {}
