//! Constant-time comparisons.
//!
//! Tag checks on received frames must not leak how many leading bytes
//! matched, so every comparison here runs in time dependent only on length.

use subtle::ConstantTimeEq;

/// Constant-time comparison of byte slices.
///
/// Returns `true` if slices are equal, `false` otherwise.
/// Execution time depends only on slice length, not content.
#[must_use]
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.ct_eq(b).into()
}

/// Timing-safe 32-byte array comparison.
#[must_use]
#[inline(never)]
pub fn verify_32(a: &[u8; 32], b: &[u8; 32]) -> bool {
    ct_eq(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ct_eq_same() {
        let a = [1u8; 32];
        let b = [1u8; 32];
        assert!(ct_eq(&a, &b));
    }

    #[test]
    fn test_ct_eq_different() {
        let a = [1u8; 32];
        let b = [2u8; 32];
        assert!(!ct_eq(&a, &b));
    }

    #[test]
    fn test_ct_eq_different_lengths() {
        let a = [1u8; 32];
        let b = [1u8; 16];
        assert!(!ct_eq(&a, &b));
    }

    #[test]
    fn test_verify_32_last_byte() {
        let a = [0x42u8; 32];
        let mut b = a;
        assert!(verify_32(&a, &b));

        b[31] ^= 0x01;
        assert!(!verify_32(&a, &b));
    }
}
