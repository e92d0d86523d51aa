//! # Tether CLI
//!
//! File transfer over the Tether secure channel.
//!
//! This crate provides:
//! - The request/response protocol (`LIST`, `RETR`, `STOR`, `DELE`)
//! - A multi-client server serving one directory
//! - A client, both one-shot and as an interactive shell
//! - Pre-shared key files, TOML configuration and progress display

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod keyfile;
pub mod progress;
pub mod protocol;
pub mod server;
pub mod shell;
pub mod transfer;

pub use client::{Client, Refused, RemoteFile};
pub use config::Config;
pub use protocol::{ProtocolError, Request, Response};
pub use server::{Server, Storage};
