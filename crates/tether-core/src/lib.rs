//! # Tether Core
//!
//! Secure channel for the Tether protocol: turns an untrusted ordered byte
//! stream into an authenticated, confidential, replay-protected message
//! channel.
//!
//! This crate provides:
//! - Header and payload frame encoding (network byte order)
//! - Per-direction sequence counters
//! - The encrypt-then-MAC send pipeline
//! - The verify-then-decrypt receive pipeline with streaming reassembly
//! - A terminal faulted state after any protocol error
//!
//! ## Wire Format
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ HeaderFrame   length(u32) | sequence(u32) | mac(32)   40 B   │
//! ├──────────────────────────────────────────────────────────────┤
//! │ PayloadFrame  sequence(u32) | mac(32)                 36 B   │
//! ├──────────────────────────────────────────────────────────────┤
//! │ ciphertext    exactly `length` bytes                         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The header MAC covers `length || sequence`; the payload MAC covers
//! `sequence || ciphertext`. Each message consumes two sequence numbers
//! per direction, one per sub-frame.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod channel;
pub mod error;
pub mod frame;
pub mod sequence;

pub use channel::{ChannelConfig, ChannelReceiver, ChannelSender, ChannelStats, SecureChannel};
pub use error::{ChannelError, FrameKind};
pub use frame::{HeaderFrame, PayloadFrame};
pub use sequence::SequenceCounter;

/// Largest plaintext a single message may carry
pub const MAX_PAYLOAD_SIZE: usize = 4096;

/// Encoded HeaderFrame size in bytes
pub const HEADER_FRAME_SIZE: usize = 40;

/// Encoded PayloadFrame size in bytes
pub const PAYLOAD_FRAME_SIZE: usize = 36;

/// Bytes of framing added to every message
pub const MESSAGE_OVERHEAD: usize = HEADER_FRAME_SIZE + PAYLOAD_FRAME_SIZE;
