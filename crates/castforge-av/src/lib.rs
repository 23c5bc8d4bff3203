//! # castforge-av
//!
//! Everything that touches the external transcoder.
//!
//! - **Profiles** ([`ProfileBuilder`]) -- pure mapping from a conversion
//!   request to the ffmpeg argument list for HLS, DASH or RTSP.
//! - **Command execution** ([`ToolCommand`]) -- async builder for one-shot
//!   transcodes with bounded stderr capture, timeout and cancellation.
//! - **Live streams** ([`ProcessSupervisor`]) -- at most one process per
//!   stream id, with replace-on-start and process-group teardown.
//! - **Progress** ([`ProgressTracker`]) -- percentage from ffmpeg's stderr.
//! - **Tool discovery** ([`Transcoder`]) -- locate ffmpeg.

pub mod command;
pub mod process;
pub mod profile;
pub mod progress;
pub mod stderr;
pub mod supervisor;
pub mod tools;

// ---- Re-exports for convenience ----

pub use command::{ToolCommand, ToolOutput};
pub use profile::{
    default_ladder, EncodeSettings, ProfileBuilder, ProfileRequest, Rendition, RtspEndpoint,
    TranscodeProfile,
};
pub use progress::ProgressTracker;
pub use stderr::StderrTail;
pub use supervisor::{ProcessSupervisor, StreamInfo, SupervisorConfig};
pub use tools::{ToolInfo, Transcoder};
