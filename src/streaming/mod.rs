//! Discovery of produced output.
//!
//! - [`ChunkIndex`] lists the segment and manifest files of a completed task.
//! - [`get_playback_info`] combines the listing with the task's playback URL.

mod chunk_index;
mod playback;

pub use chunk_index::{output_path, ChunkIndex, ChunkKind, ChunkListing, DASH_SUBDIR};
pub use playback::{get_playback_info, PlaybackInfo};
