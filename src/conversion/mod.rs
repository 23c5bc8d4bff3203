//! Conversion dispatch.
//!
//! The upload handler creates a task in the [`TaskRegistry`] and hands its id
//! to [`ConversionDispatcher::spawn`]. The dispatcher:
//!
//! - waits for one of `conversion.max_concurrent` slots (the task stays
//!   `pending` meanwhile),
//! - checks the input exists and builds the ffmpeg profile,
//! - runs HLS/DASH transcodes to completion, or hands RTSP streams to the
//!   [`castforge_av::ProcessSupervisor`],
//! - records `completed` with a playback URL or `failed` with the error.
//!
//! [`TaskRegistry`]: crate::state::TaskRegistry

mod dispatcher;

pub use dispatcher::{ConversionDispatcher, DispatchSettings};
