//! Runs conversion tasks to a terminal state.
//!
//! A dispatch is fire-and-forget for the caller: every error is recorded on
//! the task record and nothing propagates out of [`ConversionDispatcher::run`].

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Component, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use castforge_av::{
    ProcessSupervisor, ProfileBuilder, ProfileRequest, ProgressTracker, ToolCommand,
    TranscodeProfile, Transcoder,
};
use castforge_common::{Error, Result, StreamId, StreamingProtocol, TaskId};
use futures::FutureExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::Config;
use crate::state::{ConversionTask, TaskRegistry};

/// Runtime knobs for the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub transcoder: Transcoder,
    /// Outputs under this directory get a static URL.
    pub static_dir: PathBuf,
    pub static_url_prefix: String,
    /// Host and port advertised in `rtsp://` URLs.
    pub rtsp_public_host: String,
    pub rtsp_port: u16,
    pub max_concurrent: usize,
    pub transcode_timeout: Option<Duration>,
    pub stderr_limit: usize,
    pub stop_timeout: Duration,
}

impl DispatchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            transcoder: Transcoder::discover(config.tools.ffmpeg.as_deref()),
            static_dir: config.server.static_dir.clone(),
            static_url_prefix: config.server.static_url_prefix.clone(),
            rtsp_public_host: config.rtsp.public_host.clone(),
            rtsp_port: config.rtsp.port,
            max_concurrent: config.conversion.max_concurrent,
            transcode_timeout: config.conversion.transcode_timeout(),
            stderr_limit: config.conversion.stderr_limit_bytes,
            stop_timeout: Duration::from_secs(config.rtsp.stop_timeout_secs),
        }
    }
}

pub struct ConversionDispatcher {
    registry: Arc<TaskRegistry>,
    supervisor: Arc<ProcessSupervisor>,
    profiles: ProfileBuilder,
    settings: DispatchSettings,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl ConversionDispatcher {
    pub fn new(
        registry: Arc<TaskRegistry>,
        supervisor: Arc<ProcessSupervisor>,
        profiles: ProfileBuilder,
        settings: DispatchSettings,
    ) -> Arc<Self> {
        let permits = Arc::new(Semaphore::new(settings.max_concurrent.max(1)));
        Arc::new(Self {
            registry,
            supervisor,
            profiles,
            settings,
            permits,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        })
    }

    /// Wire a dispatcher (and its supervisor) from configuration.
    pub fn from_config(config: &Config, registry: Arc<TaskRegistry>) -> Arc<Self> {
        let supervisor = Arc::new(ProcessSupervisor::new(config.rtsp.supervisor_config()));
        let profiles = ProfileBuilder::new(config.conversion.encode_settings(), config.rtsp.endpoint());
        Self::new(registry, supervisor, profiles, DispatchSettings::from_config(config))
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.supervisor
    }

    /// Dispatch `task_id` in the background.
    pub fn spawn(self: &Arc<Self>, task_id: TaskId) {
        let this = Arc::clone(self);
        self.tracker.spawn(async move { this.run(task_id).await });
    }

    /// Run one task to a terminal state. Never fails; outcomes are recorded
    /// on the task.
    pub async fn run(&self, task_id: TaskId) {
        let outcome = AssertUnwindSafe(self.dispatch(task_id)).catch_unwind().await;
        if let Err(panic) = outcome {
            let err = Error::internal(format!("dispatch panicked: {}", panic_message(&*panic)));
            tracing::error!(task_id = %task_id, error = %err, "Dispatch panicked");
            if let Err(e) = self.registry.fail(task_id, &err) {
                tracing::warn!(task_id = %task_id, error = %e, "Could not record panic");
            }
        }
    }

    async fn dispatch(&self, task_id: TaskId) {
        let task = match self.registry.get(task_id) {
            Ok(task) => task,
            Err(e) => {
                tracing::error!(task_id = %task_id, error = %e, "Cannot dispatch");
                return;
            }
        };

        let permit = tokio::select! {
            permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    tracing::warn!(task_id = %task_id, "Dispatch slots closed; task stays pending");
                    return;
                }
            },
            _ = self.cancel.cancelled() => {
                tracing::info!(task_id = %task_id, "Shutting down; task stays pending");
                return;
            }
        };

        if let Err(e) = self.registry.start(task_id) {
            tracing::warn!(task_id = %task_id, error = %e, "Task already dispatched");
            return;
        }
        tracing::info!(
            task_id = %task_id,
            format = %task.media_format,
            protocol = %task.streaming_protocol,
            "Conversion started"
        );

        match self.execute(&task, permit).await {
            Ok(url) => {
                tracing::info!(task_id = %task_id, url = %url, "Conversion completed");
                if let Err(e) = self.registry.complete(task_id, Some(url)) {
                    tracing::warn!(task_id = %task_id, error = %e, "Could not record completion");
                }
            }
            Err(err) => {
                tracing::error!(task_id = %task_id, kind = %err.kind(), error = %err, "Conversion failed");
                if let Err(e) = self.registry.fail(task_id, &err) {
                    tracing::warn!(task_id = %task_id, error = %e, "Could not record failure");
                }
            }
        }
    }

    /// Returns the playback URL.
    async fn execute(&self, task: &ConversionTask, permit: OwnedSemaphorePermit) -> Result<String> {
        if !tokio::fs::try_exists(&task.input).await? {
            return Err(Error::InputMissing(task.input.clone()));
        }

        let stream_id = match task.streaming_protocol {
            StreamingProtocol::Rtsp => Some(
                task.stream_id
                    .clone()
                    .unwrap_or_else(|| StreamId::from(task.id)),
            ),
            _ => None,
        };

        let profile = self.profiles.build(&ProfileRequest {
            format: task.media_format,
            protocol: task.streaming_protocol,
            input: &task.input,
            output: &task.output,
            segment_duration: task.segment_duration,
            renditions: task.renditions,
            stream_id: stream_id.as_ref(),
        })?;
        let ffmpeg = self.settings.transcoder.require()?.to_path_buf();

        match profile {
            TranscodeProfile::OneShot { args } => {
                if let Some(parent) = task.output.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }

                let mut cmd = ToolCommand::new(ffmpeg);
                cmd.args(args)
                    .cancel_on(self.cancel.child_token())
                    .stderr_limit(self.settings.stderr_limit)
                    .stop_timeout(self.settings.stop_timeout);
                if let Some(timeout) = self.settings.transcode_timeout {
                    cmd.timeout(timeout);
                }

                let mut progress = ProgressTracker::new();
                let registry = &self.registry;
                cmd.execute_with_stderr_callback(|line| {
                    if let Some(percent) = progress.observe(line) {
                        registry.update_progress(task.id, percent);
                    }
                })
                .await?;
                drop(permit);

                Ok(self.playback_url(task))
            }
            TranscodeProfile::Live {
                stream_id,
                publish_url,
                args,
            } => {
                self.registry.set_stream_id(task.id, stream_id.clone())?;

                let mut cmd = ToolCommand::new(ffmpeg);
                cmd.args(args)
                    .stderr_limit(self.settings.stderr_limit)
                    .stop_timeout(self.settings.stop_timeout);

                let started = self.supervisor.start(&stream_id, &cmd).await;
                // The live process is owned by the supervisor from here on.
                drop(permit);
                let info = started.map_err(|e| Error::StreamStartFailure(e.to_string()))?;

                tracing::info!(
                    task_id = %task.id,
                    stream_id = %stream_id,
                    pid = ?info.pid,
                    publish_url = %publish_url,
                    "Live stream running"
                );
                Ok(self.rtsp_url(&stream_id))
            }
        }
    }

    /// Client-facing URL of a live stream.
    pub fn rtsp_url(&self, stream_id: &StreamId) -> String {
        format!(
            "rtsp://{}:{}/{}",
            self.settings.rtsp_public_host, self.settings.rtsp_port, stream_id
        )
    }

    /// Client-facing URL of a one-shot output's manifest.
    ///
    /// Outputs under the static directory are addressed through the static
    /// prefix; anything else goes through the chunk endpoint.
    pub fn playback_url(&self, task: &ConversionTask) -> String {
        if let Ok(rel) = task.output.strip_prefix(&self.settings.static_dir) {
            let parts: Vec<String> = rel
                .components()
                .filter_map(|c| match c {
                    Component::Normal(part) => Some(part.to_string_lossy().to_string()),
                    _ => None,
                })
                .collect();
            if !parts.is_empty() {
                return format!(
                    "{}/{}",
                    self.settings.static_url_prefix.trim_end_matches('/'),
                    parts.join("/")
                );
            }
        }

        let name = task
            .output
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let kind = match task.streaming_protocol {
            StreamingProtocol::Dash => "dash",
            _ => "hls",
        };
        format!("/api/v1/chunks/{}?chunk_name={name}&chunk_type={kind}", task.id)
    }

    /// Cancel in-flight transcodes, wait for dispatches to settle, then stop
    /// every live stream.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down conversion dispatcher");
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        self.supervisor.stop_all().await;
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
