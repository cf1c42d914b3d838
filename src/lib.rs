//! Streamrelay - stream relay and transcode gateway
//!
//! This library crate exposes the core functionality for integration testing.

pub mod config;
pub mod relay;
pub mod server;
pub mod transcode;
