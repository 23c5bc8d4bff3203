//! The task registry: the authoritative record of every conversion.
//!
//! Records live in a [`DashMap`], so updates to one task hold that entry's
//! shard lock for the duration of the change while unrelated tasks proceed
//! in parallel. Nothing outside the registry holds a mutable copy; readers
//! get clones.

mod types;

pub use types::*;

use castforge_common::{Error, ErrorKind, Result, StreamId, TaskId, TaskStatus};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 256;

pub struct TaskRegistry {
    tasks: DashMap<TaskId, ConversionTask>,
    next_id: AtomicU64,
    event_tx: broadcast::Sender<TaskEvent>,
}

impl TaskRegistry {
    pub fn new() -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            tasks: DashMap::new(),
            next_id: AtomicU64::new(1),
            event_tx,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.event_tx.subscribe()
    }

    fn broadcast(&self, event: TaskEvent) {
        if self.event_tx.send(event).is_err() {
            tracing::trace!("No subscribers for task event");
        }
    }

    /// Register a new task in `pending`.
    pub fn create(&self, spec: ConversionSpec) -> Result<TaskId> {
        spec.validate()?;

        let id = TaskId::from(self.next_id.fetch_add(1, Ordering::SeqCst));
        let task = ConversionTask::new(id, spec);
        let event = TaskEvent::TaskCreated {
            task_id: id,
            media_format: task.media_format,
            streaming_protocol: task.streaming_protocol,
        };
        tracing::info!(
            task_id = %id,
            format = %task.media_format,
            protocol = %task.streaming_protocol,
            input = %task.input.display(),
            "Task created"
        );
        self.tasks.insert(id, task);
        self.broadcast(event);
        Ok(id)
    }

    pub fn get(&self, id: TaskId) -> Result<ConversionTask> {
        self.tasks
            .get(&id)
            .map(|t| t.value().clone())
            .ok_or(Error::TaskNotFound(id))
    }

    pub fn get_status(&self, id: TaskId) -> Result<TaskStatusView> {
        self.tasks
            .get(&id)
            .map(|t| t.status_view())
            .ok_or(Error::TaskNotFound(id))
    }

    /// All tasks in creation order.
    pub fn list(&self) -> Vec<ConversionTask> {
        let mut tasks: Vec<ConversionTask> =
            self.tasks.iter().map(|t| t.value().clone()).collect();
        tasks.sort_by_key(|t| t.id);
        tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Move a task along the state machine.
    ///
    /// `error` is recorded when moving to `failed`. A transition out of a
    /// terminal state, or one that skips a state, is refused with
    /// [`Error::InvalidTransition`] and logged.
    pub fn set_status(&self, id: TaskId, status: TaskStatus, error: Option<&Error>) -> Result<()> {
        self.apply(id, status, error, None)
    }

    fn apply(
        &self,
        id: TaskId,
        status: TaskStatus,
        error: Option<&Error>,
        playback_url: Option<String>,
    ) -> Result<()> {
        let event = {
            let mut task = self.tasks.get_mut(&id).ok_or(Error::TaskNotFound(id))?;
            if let Err(e) = task.transition(status) {
                tracing::warn!(task_id = %id, error = %e, "Rejected status change");
                return Err(e);
            }

            match status {
                TaskStatus::Processing => TaskEvent::TaskStarted { task_id: id },
                TaskStatus::Completed => {
                    if playback_url.is_some() {
                        task.playback_url = playback_url;
                    }
                    TaskEvent::TaskCompleted {
                        task_id: id,
                        playback_url: task.playback_url.clone(),
                    }
                }
                TaskStatus::Failed => {
                    let (message, kind) = match error {
                        Some(e) => (e.to_string(), e.kind()),
                        None => ("unknown error".to_string(), ErrorKind::InternalError),
                    };
                    task.error = Some(message.clone());
                    task.error_kind = Some(kind);
                    TaskEvent::TaskFailed {
                        task_id: id,
                        error: message,
                        error_kind: kind,
                    }
                }
                TaskStatus::Pending => return Ok(()),
            }
        };

        tracing::debug!(task_id = %id, %status, "Task status changed");
        self.broadcast(event);
        Ok(())
    }

    /// `pending -> processing`.
    pub fn start(&self, id: TaskId) -> Result<()> {
        self.set_status(id, TaskStatus::Processing, None)
    }

    /// `processing -> completed`, recording where the output can be played.
    pub fn complete(&self, id: TaskId, playback_url: Option<String>) -> Result<()> {
        self.apply(id, TaskStatus::Completed, None, playback_url)
    }

    /// `processing -> failed` with the error's message and kind.
    pub fn fail(&self, id: TaskId, error: &Error) -> Result<()> {
        self.set_status(id, TaskStatus::Failed, Some(error))
    }

    /// Record best-effort progress. Ignored once the task is terminal.
    pub fn update_progress(&self, id: TaskId, percent: f64) {
        let progress = percent.clamp(0.0, 100.0) as f32;
        {
            let Some(mut task) = self.tasks.get_mut(&id) else {
                return;
            };
            if task.status.is_terminal() {
                return;
            }
            task.progress = progress;
        }
        self.broadcast(TaskEvent::TaskProgress {
            task_id: id,
            progress,
        });
    }

    pub fn set_stream_id(&self, id: TaskId, stream_id: StreamId) -> Result<()> {
        let mut task = self.tasks.get_mut(&id).ok_or(Error::TaskNotFound(id))?;
        task.stream_id = Some(stream_id);
        Ok(())
    }

    pub fn set_playback_url(&self, id: TaskId, url: String) -> Result<()> {
        let mut task = self.tasks.get_mut(&id).ok_or(Error::TaskNotFound(id))?;
        task.playback_url = Some(url);
        Ok(())
    }
}
