use castforge_common::{
    Error, ErrorKind, MediaFormat, Renditions, Result, StreamId, StreamingProtocol, TaskId,
    TaskStatus,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What the upload handler asks the registry to track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionSpec {
    pub input: PathBuf,
    pub output: PathBuf,
    pub media_format: MediaFormat,
    pub streaming_protocol: StreamingProtocol,
    pub segment_duration: u32,
    #[serde(default)]
    pub renditions: Renditions,
    /// RTSP only; defaults to the task id.
    #[serde(default)]
    pub stream_id: Option<StreamId>,
}

impl ConversionSpec {
    pub fn new(
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        media_format: MediaFormat,
        streaming_protocol: StreamingProtocol,
    ) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            media_format,
            streaming_protocol,
            segment_duration: 6,
            renditions: Renditions::Single,
            stream_id: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.input.as_os_str().is_empty() {
            return Err(Error::invalid_spec("input path cannot be empty"));
        }
        if self.output.as_os_str().is_empty() {
            return Err(Error::invalid_spec("output path cannot be empty"));
        }
        if self.segment_duration == 0 {
            return Err(Error::invalid_spec("segment duration must be a positive integer"));
        }
        Ok(())
    }
}

/// A tracked conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionTask {
    pub id: TaskId,
    pub input: PathBuf,
    pub output: PathBuf,
    pub media_format: MediaFormat,
    pub streaming_protocol: StreamingProtocol,
    pub segment_duration: u32,
    pub renditions: Renditions,
    pub status: TaskStatus,
    /// Best effort, 0..=100.
    pub progress: f32,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub stream_id: Option<StreamId>,
    pub playback_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ConversionTask {
    pub fn new(id: TaskId, spec: ConversionSpec) -> Self {
        Self {
            id,
            input: spec.input,
            output: spec.output,
            media_format: spec.media_format,
            streaming_protocol: spec.streaming_protocol,
            segment_duration: spec.segment_duration,
            renditions: spec.renditions,
            status: TaskStatus::Pending,
            progress: 0.0,
            error: None,
            error_kind: None,
            stream_id: spec.stream_id,
            playback_url: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub(crate) fn transition(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                task_id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        match next {
            TaskStatus::Processing => self.started_at = Some(Utc::now()),
            TaskStatus::Completed => {
                self.progress = 100.0;
                self.completed_at = Some(Utc::now());
            }
            TaskStatus::Failed => self.completed_at = Some(Utc::now()),
            TaskStatus::Pending => {}
        }
        Ok(())
    }

    pub fn status_view(&self) -> TaskStatusView {
        TaskStatusView {
            task_id: self.id,
            status: self.status,
            progress: self.progress,
            error: self.error.clone(),
            error_kind: self.error_kind,
        }
    }
}

/// Answer to a status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusView {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub progress: f32,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

/// Task lifecycle event, streamed to SSE clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum TaskEvent {
    TaskCreated {
        task_id: TaskId,
        media_format: MediaFormat,
        streaming_protocol: StreamingProtocol,
    },
    TaskStarted {
        task_id: TaskId,
    },
    TaskProgress {
        task_id: TaskId,
        progress: f32,
    },
    TaskCompleted {
        task_id: TaskId,
        playback_url: Option<String>,
    },
    TaskFailed {
        task_id: TaskId,
        error: String,
        error_kind: ErrorKind,
    },
}

impl TaskEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            Self::TaskCreated { task_id, .. }
            | Self::TaskStarted { task_id }
            | Self::TaskProgress { task_id, .. }
            | Self::TaskCompleted { task_id, .. }
            | Self::TaskFailed { task_id, .. } => *task_id,
        }
    }
}
