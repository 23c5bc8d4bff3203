//! Unified error type for castforge.
//!
//! Every failure the orchestrator can record on a task, or surface at a
//! synchronous boundary, is a variant of [`Error`]. [`Error::kind`] yields a
//! copyable [`ErrorKind`] that task records keep as the failure reason, and
//! [`Error::http_status`] lets API handlers derive a status code.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::{MediaFormat, StreamingProtocol, TaskId, TaskStatus};

/// Unified error type covering all failure modes in castforge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A conversion request failed validation.
    #[error("Invalid spec: {0}")]
    InvalidSpec(String),

    /// No task exists with the given identifier.
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    /// Some other entity (stream, chunk) could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "stream", "chunk").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// The task exists but has not reached `completed`.
    #[error("Task {task_id} is not ready (status: {status})")]
    NotReady {
        /// Task that was queried.
        task_id: TaskId,
        /// Its current status.
        status: TaskStatus,
    },

    /// A status change would leave a terminal state or skip a state.
    #[error("Invalid transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        /// Task whose status was being changed.
        task_id: TaskId,
        /// Current status.
        from: TaskStatus,
        /// Requested status.
        to: TaskStatus,
    },

    /// The task's input file does not exist.
    #[error("Input file not found: {}", .0.display())]
    InputMissing(PathBuf),

    /// The format/protocol pairing has no transcoding profile.
    #[error("Unsupported combination: {format} output over {protocol}")]
    UnsupportedCombination {
        /// Requested media format.
        format: MediaFormat,
        /// Requested streaming protocol.
        protocol: StreamingProtocol,
    },

    /// A supervised process exited during its start-up grace interval.
    #[error("Process for stream {stream_id} exited during start-up: {stderr}")]
    ProcessStartFailure {
        /// Stream the process was started for.
        stream_id: String,
        /// Captured standard-error tail.
        stderr: String,
    },

    /// A one-shot transcode did not exit successfully.
    #[error("Transcode failed ({status}): {stderr}")]
    TranscodeFailure {
        /// Exit status, or the reason the process was stopped.
        status: String,
        /// Captured standard-error text (bounded).
        stderr: String,
    },

    /// A live stream could not be started.
    #[error("Stream start failed: {0}")]
    StreamStartFailure(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// An external tool could not be located or launched.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Discriminant of [`Error`], stored on failed task records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidSpec,
    TaskNotFound,
    NotFound,
    NotReady,
    InvalidTransition,
    InputMissing,
    UnsupportedCombination,
    ProcessStartFailure,
    TranscodeFailure,
    StreamStartFailure,
    InternalError,
}

impl ErrorKind {
    /// Stable snake_case code used in API responses.
    pub fn code(self) -> &'static str {
        match self {
            Self::InvalidSpec => "invalid_spec",
            Self::TaskNotFound => "task_not_found",
            Self::NotFound => "not_found",
            Self::NotReady => "not_ready",
            Self::InvalidTransition => "invalid_transition",
            Self::InputMissing => "input_missing",
            Self::UnsupportedCombination => "unsupported_combination",
            Self::ProcessStartFailure => "process_start_failure",
            Self::TranscodeFailure => "transcode_failure",
            Self::StreamStartFailure => "stream_start_failure",
            Self::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl Error {
    /// Create a new InvalidSpec error.
    pub fn invalid_spec<S: Into<String>>(msg: S) -> Self {
        Self::InvalidSpec(msg.into())
    }

    /// Create a new NotFound error.
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Create a new Tool error.
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Create a new Internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// The kind recorded on a task that fails with this error.
    ///
    /// Errors without a dedicated dispatch kind (I/O, tool lookup) are
    /// recorded as [`ErrorKind::InternalError`].
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidSpec(_) => ErrorKind::InvalidSpec,
            Self::TaskNotFound(_) => ErrorKind::TaskNotFound,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::NotReady { .. } => ErrorKind::NotReady,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::InputMissing(_) => ErrorKind::InputMissing,
            Self::UnsupportedCombination { .. } => ErrorKind::UnsupportedCombination,
            Self::ProcessStartFailure { .. } => ErrorKind::ProcessStartFailure,
            Self::TranscodeFailure { .. } => ErrorKind::TranscodeFailure,
            Self::StreamStartFailure(_) => ErrorKind::StreamStartFailure,
            Self::Io { .. } | Self::Tool { .. } | Self::Internal(_) => ErrorKind::InternalError,
        }
    }

    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidSpec(_) | Self::UnsupportedCombination { .. } | Self::NotReady { .. } => {
                400
            }
            Self::InputMissing(_) => 422,
            Self::TaskNotFound(_) | Self::NotFound { .. } => 404,
            Self::InvalidTransition { .. } => 409,
            _ => 500,
        }
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::TaskNotFound(TaskId::from(4));
        assert_eq!(err.to_string(), "Task not found: 4");

        let err = Error::UnsupportedCombination {
            format: MediaFormat::Dash,
            protocol: StreamingProtocol::Rtsp,
        };
        assert_eq!(err.to_string(), "Unsupported combination: dash output over rtsp");

        let err = Error::not_found("stream", "cam-1");
        assert_eq!(err.to_string(), "stream not found: cam-1");

        let err = Error::InputMissing(PathBuf::from("/nope.mp4"));
        assert_eq!(err.to_string(), "Input file not found: /nope.mp4");
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::invalid_spec("x").kind(), ErrorKind::InvalidSpec);
        assert_eq!(Error::internal("x").kind(), ErrorKind::InternalError);
        assert_eq!(Error::tool("ffmpeg", "missing").kind(), ErrorKind::InternalError);
        let err = Error::TranscodeFailure {
            status: "exit status: 1".into(),
            stderr: "boom".into(),
        };
        assert_eq!(err.kind(), ErrorKind::TranscodeFailure);
        assert_eq!(err.kind().code(), "transcode_failure");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn test_http_status() {
        assert_eq!(Error::TaskNotFound(TaskId::from(1)).http_status(), 404);
        assert_eq!(Error::invalid_spec("bad").http_status(), 400);
        let not_ready = Error::NotReady {
            task_id: TaskId::from(1),
            status: TaskStatus::Processing,
        };
        assert_eq!(not_ready.http_status(), 400);
        assert_eq!(Error::internal("oops").http_status(), 500);
    }
}
