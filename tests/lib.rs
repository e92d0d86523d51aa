//! Shared fixtures for the Tether integration tests.

pub mod fixtures;
