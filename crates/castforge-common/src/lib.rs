//! Castforge-Common: Shared types, constants, and utilities.
//!
//! This crate provides common functionality used across castforge:
//!
//! - **Typed IDs**: [`TaskId`] (monotonic, never reused) and [`StreamId`]
//! - **Core Types**: media formats, streaming protocols and task status
//! - **Path Utilities**: chunk classification and delivery content types
//! - **Error Handling**: the unified error type and its [`ErrorKind`]
//!
//! # Examples
//!
//! ```
//! use castforge_common::{Error, MediaFormat, Result, StreamingProtocol, TaskId};
//! use castforge_common::paths::is_hls_chunk;
//! use std::path::Path;
//!
//! let id = TaskId::from(7);
//! assert_eq!(id.to_string(), "7");
//!
//! let format: MediaFormat = "hls".parse().unwrap();
//! assert!(format.pairs_with(StreamingProtocol::Hls));
//!
//! assert!(is_hls_chunk(Path::new("playlist_000.ts")));
//!
//! fn lookup(id: TaskId) -> Result<()> {
//!     Err(Error::TaskNotFound(id))
//! }
//! assert!(lookup(id).is_err());
//! ```

pub mod error;
pub mod ids;
pub mod paths;
pub mod types;

pub use error::{Error, ErrorKind, Result};
pub use ids::*;
pub use types::*;
