//! Cryptographic error types.

use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    /// A cipher or MAC primitive rejected its input
    #[error("crypto computation failed: {0}")]
    Computation(&'static str),

    /// Invalid key length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Random number generation failed
    #[error("random number generation failed")]
    RandomFailed,

    /// Key text could not be decoded
    #[error("invalid key encoding: {0}")]
    InvalidEncoding(String),
}
