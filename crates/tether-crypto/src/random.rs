//! Secure random number generation.
//!
//! All randomness comes from the operating system CSPRNG.

use crate::CryptoError;

/// Fill a buffer with random bytes from the OS CSPRNG.
///
/// # Errors
///
/// Returns [`CryptoError::RandomFailed`] if the underlying OS CSPRNG fails.
pub fn fill_random(buf: &mut [u8]) -> Result<(), CryptoError> {
    getrandom::fill(buf).map_err(|_| CryptoError::RandomFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_random_changes_buffer() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        fill_random(&mut a).unwrap();
        fill_random(&mut b).unwrap();

        // 2^-256 chance of a false failure
        assert_ne!(a, b);
    }

    #[test]
    fn test_fill_random_empty() {
        let mut empty: [u8; 0] = [];
        assert!(fill_random(&mut empty).is_ok());
    }
}
