//! # Tether Crypto
//!
//! Cryptographic primitives for the Tether secure channel.
//!
//! This crate provides:
//! - Owned, zeroize-on-drop key material
//! - The session secrets bundle handed to a channel at construction
//! - Byte-granular AES-128-CFB8 encrypt/decrypt states
//! - HMAC-SHA-256 tagging with constant-time verification
//! - Secure random number generation
//!
//! ## Cryptographic Suite
//!
//! | Function | Algorithm | Key Size |
//! |----------|-----------|----------|
//! | Stream cipher | AES-128 in CFB mode, 8-bit feedback | 128-bit |
//! | MAC | HMAC-SHA-256, untruncated | 256-bit |
//! | Randomness | OS CSPRNG | N/A |

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod cipher;
pub mod constant_time;
pub mod error;
pub mod key;
pub mod mac;
pub mod random;

pub use cipher::{StreamDecryptor, StreamEncryptor};
pub use error::CryptoError;
pub use key::{KeyMaterial, SessionSecrets};
pub use mac::{Authenticator, Tag};

/// AES-128 session key size
pub const SESSION_KEY_SIZE: usize = 16;

/// HMAC-SHA-256 authentication key size
pub const AUTH_KEY_SIZE: usize = 32;

/// CFB initialization vector size (one AES block)
pub const IV_SIZE: usize = 16;

/// HMAC-SHA-256 tag size (never truncated)
pub const MAC_SIZE: usize = 32;
