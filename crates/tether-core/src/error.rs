//! Error types for the Tether secure channel.

use std::fmt;
use tether_crypto::CryptoError;
use tether_transport::TransportError;
use thiserror::Error;

/// Which sub-frame of a message an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Length and sequence header
    Header,
    /// Sequence and ciphertext MAC
    Payload,
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Header => f.write_str("header frame"),
            Self::Payload => f.write_str("payload frame"),
        }
    }
}

/// Secure channel errors.
///
/// Every variant except [`ChannelError::PayloadTooLarge`] is fatal: the
/// direction that raised it is faulted and must be discarded together with
/// its connection.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The cipher or MAC primitive failed internally
    #[error("crypto computation failed: {0}")]
    CryptoComputation(#[from] CryptoError),

    /// Transport write failed or was incomplete
    #[error("send failed: {0}")]
    Send(#[source] TransportError),

    /// Transport read failed, was short, or the peer closed mid-message
    #[error("receive failed: {0}")]
    Receive(#[source] TransportError),

    /// A sub-frame's MAC did not match
    #[error("{frame}: bad hmac")]
    Authentication {
        /// Sub-frame that failed
        frame: FrameKind,
    },

    /// A sub-frame carried an unexpected sequence number
    #[error("{frame}: bad sequence number {actual}, expected {expected}")]
    Sequence {
        /// Sub-frame that failed
        frame: FrameKind,
        /// Counter value the receiver expected
        expected: u32,
        /// Value found on the wire
        actual: u32,
    },

    /// Declared payload length exceeds the configured maximum
    #[error("protocol violation: declared length {length} exceeds maximum {max}")]
    ProtocolViolation {
        /// Length from the header frame
        length: u32,
        /// Configured maximum
        max: usize,
    },

    /// Local caller tried to send more than one message can carry
    #[error("payload of {size} bytes exceeds maximum {max}")]
    PayloadTooLarge {
        /// Requested size
        size: usize,
        /// Configured maximum
        max: usize,
    },

    /// Channel configured with a payload bound outside `1..=MAX_PAYLOAD_SIZE`
    #[error("invalid max payload {max_payload}: must be between 1 and {limit}")]
    InvalidConfig {
        /// Requested bound
        max_payload: usize,
        /// Largest allowed bound
        limit: usize,
    },

    /// Sequence space used up; the session cannot continue
    #[error("sequence counter exhausted")]
    SequenceExhausted,

    /// The channel already failed and refuses further use
    #[error("channel is faulted")]
    Faulted,
}

impl ChannelError {
    /// Whether this error leaves the channel unusable.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::PayloadTooLarge { .. })
    }

    /// Whether the peer closed the stream cleanly between messages.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Receive(TransportError::Closed))
    }
}
