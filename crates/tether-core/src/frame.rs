//! Header and payload frames of the Tether wire protocol.
//!
//! Every logical message is a [`HeaderFrame`], a [`PayloadFrame`] and then
//! the ciphertext. Frames are serialized field by field into fixed-size
//! byte arrays; all multi-byte fields are big-endian (network byte order)
//! and MACs are computed over exactly those encoded bytes.

use crate::{HEADER_FRAME_SIZE, PAYLOAD_FRAME_SIZE};
use tether_crypto::{Authenticator, CryptoError, MAC_SIZE, Tag};

/// Authenticated message header: payload length and sequence number.
#[derive(Debug, Clone, Copy)]
pub struct HeaderFrame {
    /// Ciphertext length in bytes
    pub length: u32,
    /// Sequence number of this sub-frame
    pub sequence_number: u32,
    /// HMAC over `length || sequence_number`
    pub mac: Tag,
}

impl HeaderFrame {
    /// Build a header and compute its MAC.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::Computation` if the HMAC primitive fails.
    pub fn seal(
        length: u32,
        sequence_number: u32,
        auth: &Authenticator,
    ) -> Result<Self, CryptoError> {
        let mac = auth.tag(&[&length.to_be_bytes(), &sequence_number.to_be_bytes()])?;
        Ok(Self {
            length,
            sequence_number,
            mac,
        })
    }

    /// Recompute the MAC over the received fields and compare in constant time.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::Computation` if the HMAC primitive fails.
    pub fn verify(&self, auth: &Authenticator) -> Result<bool, CryptoError> {
        auth.verify(
            &[
                &self.length.to_be_bytes(),
                &self.sequence_number.to_be_bytes(),
            ],
            &self.mac,
        )
    }

    /// Serialize to wire bytes.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_FRAME_SIZE] {
        let mut out = [0u8; HEADER_FRAME_SIZE];
        out[0..4].copy_from_slice(&self.length.to_be_bytes());
        out[4..8].copy_from_slice(&self.sequence_number.to_be_bytes());
        out[8..].copy_from_slice(self.mac.as_bytes());
        out
    }

    /// Parse wire bytes. Performs no verification.
    #[must_use]
    pub fn decode(bytes: &[u8; HEADER_FRAME_SIZE]) -> Self {
        let mut mac = [0u8; MAC_SIZE];
        mac.copy_from_slice(&bytes[8..]);
        Self {
            length: u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            sequence_number: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            mac: Tag::from_bytes(mac),
        }
    }
}

/// Authenticated payload descriptor, followed on the wire by the ciphertext.
///
/// The length is not repeated here; it is already covered by the header MAC.
#[derive(Debug, Clone, Copy)]
pub struct PayloadFrame {
    /// Sequence number of this sub-frame
    pub sequence_number: u32,
    /// HMAC over `sequence_number || ciphertext`
    pub mac: Tag,
}

impl PayloadFrame {
    /// Build a payload frame for `ciphertext` and compute its MAC.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::Computation` if the HMAC primitive fails.
    pub fn seal(
        sequence_number: u32,
        ciphertext: &[u8],
        auth: &Authenticator,
    ) -> Result<Self, CryptoError> {
        let mac = auth.tag(&[&sequence_number.to_be_bytes(), ciphertext])?;
        Ok(Self {
            sequence_number,
            mac,
        })
    }

    /// Recompute the MAC over the sequence number and received ciphertext
    /// and compare in constant time.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::Computation` if the HMAC primitive fails.
    pub fn verify(&self, auth: &Authenticator, ciphertext: &[u8]) -> Result<bool, CryptoError> {
        auth.verify(&[&self.sequence_number.to_be_bytes(), ciphertext], &self.mac)
    }

    /// Serialize to wire bytes.
    #[must_use]
    pub fn encode(&self) -> [u8; PAYLOAD_FRAME_SIZE] {
        let mut out = [0u8; PAYLOAD_FRAME_SIZE];
        out[0..4].copy_from_slice(&self.sequence_number.to_be_bytes());
        out[4..].copy_from_slice(self.mac.as_bytes());
        out
    }

    /// Parse wire bytes. Performs no verification.
    #[must_use]
    pub fn decode(bytes: &[u8; PAYLOAD_FRAME_SIZE]) -> Self {
        let mut mac = [0u8; MAC_SIZE];
        mac.copy_from_slice(&bytes[4..]);
        Self {
            sequence_number: u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            mac: Tag::from_bytes(mac),
        }
    }
}
