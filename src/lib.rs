//! Castforge - upload-to-stream conversion service
//!
//! This library crate exposes the core functionality for integration testing.

pub mod config;
pub mod conversion;
pub mod server;
pub mod state;
pub mod streaming;
