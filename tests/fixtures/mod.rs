//! Loopback TCP fixtures.

mod loopback;

pub use loopback::{ServerFixture, TcpChannel, tcp_channel_pair};
