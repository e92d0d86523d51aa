//! # Tether Transport
//!
//! Raw ordered byte transport underneath the Tether secure channel.
//!
//! This crate provides:
//! - `ConnectionRead` / `ConnectionWrite`: exact-length `recv`/`send`
//!   for any tokio byte stream
//! - A TCP `Connection` and `ConnectionListener`
//!
//! Timeouts and cancellation live here, not in the channel above.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connection;

pub use connection::{
    Connection, ConnectionListener, ConnectionRead, ConnectionWrite, TransportError,
    TransportResult,
};

use std::time::Duration;

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Disable Nagle's algorithm on TCP sockets
    pub nodelay: bool,
    /// Connect timeout (`None` = wait for the OS)
    pub connect_timeout: Option<Duration>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            nodelay: true,
            connect_timeout: Some(Duration::from_secs(10)),
        }
    }
}
