use castforge_common::{Error, Result, StreamingProtocol, TaskId, TaskStatus};
use serde::Serialize;

use super::ChunkIndex;

/// Where and how a completed conversion can be played.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaybackInfo {
    pub task_id: TaskId,
    pub protocol: StreamingProtocol,
    pub url: String,
    pub chunks_available: bool,
    pub hls: Vec<String>,
    pub dash: Vec<String>,
}

/// Playback details for a completed task.
///
/// Fails with `TaskNotFound` for unknown tasks and `NotReady` until the task
/// has completed.
pub async fn get_playback_info(index: &ChunkIndex, task_id: TaskId) -> Result<PlaybackInfo> {
    let task = index.registry().get(task_id)?;
    if task.status != TaskStatus::Completed {
        return Err(Error::NotReady {
            task_id,
            status: task.status,
        });
    }

    let url = task
        .playback_url
        .clone()
        .ok_or_else(|| Error::internal(format!("task {task_id} completed without a playback URL")))?;

    let listing = index.list_chunks(task_id).await?;
    Ok(PlaybackInfo {
        task_id,
        protocol: task.streaming_protocol,
        url,
        chunks_available: !listing.is_empty(),
        hls: listing.hls.clone(),
        dash: listing.dash.clone(),
    })
}
