//! Supervision of long-running live stream processes.
//!
//! The [`ProcessSupervisor`] owns every live transcoder, keyed by stream id.
//! Each stream id has a slot guarded by an async mutex; `start` and `stop`
//! hold that lock for their whole sequence, so replacing a stream (stop the
//! old process, spawn the new one, wait out the start grace) is atomic with
//! respect to other calls for the same id while different ids proceed
//! independently.
//!
//! A slot is removed from the table, under its lock, as soon as it is empty.
//! Callers revalidate a slot after locking it and retry if it was detached,
//! so a process is only ever registered into a slot the table still holds.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use castforge_common::{Error, Result, StreamId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::StreamExt;
use serde::Serialize;
use tokio::process::{Child, Command};
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;

use crate::command::ToolCommand;
use crate::process::{self, DEFAULT_STOP_TIMEOUT};
use crate::stderr::{self, StderrTail, DEFAULT_STDERR_LIMIT};

/// How long a failed process gets to flush its stderr before it is reported.
const FAILED_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Timing knobs for the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Time a new process gets to bind its socket or fail.
    pub start_grace: Duration,
    /// SIGTERM to SIGKILL escalation delay.
    pub stop_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            start_grace: Duration::from_secs(1),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

/// A live stream as reported by [`ProcessSupervisor::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamInfo {
    pub stream_id: StreamId,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
}

struct StreamProcess {
    child: Child,
    /// Leader pid, kept after the child is reaped.
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    stderr: Arc<parking_lot::Mutex<StderrTail>>,
    drain: JoinHandle<()>,
}

impl StreamProcess {
    fn info(&self, stream_id: &StreamId) -> StreamInfo {
        StreamInfo {
            stream_id: stream_id.clone(),
            pid: self.pid,
            started_at: self.started_at,
        }
    }
}

type Slot = Arc<tokio::sync::Mutex<Option<StreamProcess>>>;
type SlotGuard = OwnedMutexGuard<Option<StreamProcess>>;

/// Registry of live stream processes, at most one per stream id.
#[derive(Default)]
pub struct ProcessSupervisor {
    slots: DashMap<StreamId, Slot>,
    config: SupervisorConfig,
}

impl ProcessSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            slots: DashMap::new(),
            config,
        }
    }

    /// Lock the slot for `stream_id`, creating it if needed.
    async fn lock_slot(&self, stream_id: &StreamId) -> (Slot, SlotGuard) {
        loop {
            let slot = self.slots.entry(stream_id.clone()).or_default().value().clone();
            let guard = Arc::clone(&slot).lock_owned().await;
            if self.holds(stream_id, &slot) {
                return (slot, guard);
            }
        }
    }

    /// Lock the slot for `stream_id` only if one exists.
    async fn lock_existing(&self, stream_id: &StreamId) -> Option<(Slot, SlotGuard)> {
        loop {
            let slot = self.slots.get(stream_id).map(|slot| slot.value().clone())?;
            let guard = Arc::clone(&slot).lock_owned().await;
            if self.holds(stream_id, &slot) {
                return Some((slot, guard));
            }
        }
    }

    fn holds(&self, stream_id: &StreamId, slot: &Slot) -> bool {
        self.slots
            .get(stream_id)
            .is_some_and(|current| Arc::ptr_eq(current.value(), slot))
    }

    /// Drop an empty slot from the table. Call with the slot's lock held.
    fn release(&self, stream_id: &StreamId, slot: &Slot, guard: &SlotGuard) {
        if guard.is_none() {
            self.slots.remove_if(stream_id, |_, current| Arc::ptr_eq(current, slot));
        }
    }

    /// Start `command` as the live process for `stream_id`.
    ///
    /// A process already registered for the id is fully terminated first.
    /// If the new process exits within the start grace interval, the call
    /// fails with [`Error::ProcessStartFailure`] carrying its stderr tail.
    pub async fn start(&self, stream_id: &StreamId, command: &ToolCommand) -> Result<StreamInfo> {
        let (slot, mut guard) = self.lock_slot(stream_id).await;

        if let Some(old) = guard.take() {
            tracing::info!(stream_id = %stream_id, pid = ?old.pid, "Replacing live stream");
            self.shutdown(stream_id, old).await;
        }

        let result = self.spawn_into(stream_id, command, &mut guard).await;
        self.release(stream_id, &slot, &guard);
        result
    }

    async fn spawn_into(
        &self,
        stream_id: &StreamId,
        command: &ToolCommand,
        guard: &mut SlotGuard,
    ) -> Result<StreamInfo> {
        let mut cmd = Command::new(command.get_program());
        cmd.args(command.get_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        process::isolate(&mut cmd);

        let mut child = cmd.spawn().map_err(|e| Error::ProcessStartFailure {
            stream_id: stream_id.to_string(),
            stderr: format!("failed to spawn {}: {e}", command.get_program().display()),
        })?;
        let pid = child.id();
        let started_at = Utc::now();

        let limit = match command.get_stderr_limit() {
            0 => DEFAULT_STDERR_LIMIT,
            n => n,
        };
        let tail = Arc::new(parking_lot::Mutex::new(StderrTail::new(limit)));
        let drain = match child.stderr.take() {
            Some(pipe) => {
                let tail = Arc::clone(&tail);
                let id = stream_id.clone();
                tokio::spawn(async move {
                    let mut lines = stderr::lines(pipe);
                    while let Some(line) = lines.next().await {
                        tracing::trace!(stream_id = %id, "{line}");
                        tail.lock().push(&line);
                    }
                })
            }
            None => tokio::spawn(async {}),
        };

        tracing::info!(
            stream_id = %stream_id,
            pid = ?child.id(),
            grace = ?self.config.start_grace,
            "Started live stream process"
        );
        tokio::time::sleep(self.config.start_grace).await;

        match child.try_wait() {
            Ok(None) => {
                let process = StreamProcess {
                    child,
                    pid,
                    started_at,
                    stderr: tail,
                    drain,
                };
                let info = process.info(stream_id);
                **guard = Some(process);
                Ok(info)
            }
            Ok(Some(status)) => {
                // Helpers forked by the leader would hold the pipe open.
                if let Some(pid) = pid {
                    process::kill_group(pid);
                }
                let _ = tokio::time::timeout(FAILED_DRAIN_TIMEOUT, drain).await;
                let stderr = tail.lock().contents();
                tracing::error!(
                    stream_id = %stream_id,
                    %status,
                    stderr = %stderr,
                    "Live stream process exited during start-up"
                );
                Err(Error::ProcessStartFailure {
                    stream_id: stream_id.to_string(),
                    stderr,
                })
            }
            Err(e) => {
                drain.abort();
                if let Err(kill_err) = process::terminate_group(&mut child, self.config.stop_timeout).await {
                    tracing::warn!(stream_id = %stream_id, error = %kill_err, "Failed to stop process");
                }
                Err(Error::ProcessStartFailure {
                    stream_id: stream_id.to_string(),
                    stderr: format!("failed to poll process: {e}"),
                })
            }
        }
    }

    /// Stop the live process for `stream_id`, if any.
    ///
    /// Idempotent. Teardown failures are logged, never returned.
    pub async fn stop(&self, stream_id: &StreamId) {
        let Some((slot, mut guard)) = self.lock_existing(stream_id).await else {
            tracing::debug!(stream_id = %stream_id, "No live stream to stop");
            return;
        };
        match guard.take() {
            Some(process) => self.shutdown(stream_id, process).await,
            None => tracing::debug!(stream_id = %stream_id, "Stream already stopped"),
        }
        self.release(stream_id, &slot, &guard);
    }

    /// Stop every live process. Called once on shutdown.
    pub async fn stop_all(&self) {
        let ids: Vec<StreamId> = self.slots.iter().map(|entry| entry.key().clone()).collect();
        tracing::info!(count = ids.len(), "Stopping all live streams");
        futures::future::join_all(ids.iter().map(|id| self.stop(id))).await;
    }

    /// Whether a live process is registered and still running for the id.
    ///
    /// A process found to have exited on its own is unregistered.
    pub async fn is_running(&self, stream_id: &StreamId) -> bool {
        let Some((slot, mut guard)) = self.lock_existing(stream_id).await else {
            return false;
        };
        let exited = match guard.as_mut() {
            None => return false,
            Some(process) => match process.child.try_wait() {
                Ok(None) => false,
                Ok(Some(status)) => {
                    tracing::warn!(
                        stream_id = %stream_id,
                        %status,
                        stderr = %process.stderr.lock().contents(),
                        "Live stream process exited"
                    );
                    if let Some(pid) = process.pid {
                        process::kill_group(pid);
                    }
                    true
                }
                Err(e) => {
                    tracing::warn!(stream_id = %stream_id, error = %e, "Failed to poll process");
                    false
                }
            },
        };
        if exited {
            *guard = None;
            self.release(stream_id, &slot, &guard);
        }
        !exited
    }

    /// Registered live streams, ordered by stream id.
    pub async fn list(&self) -> Vec<StreamInfo> {
        let slots: Vec<(StreamId, Slot)> = self
            .slots
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut streams = Vec::new();
        for (stream_id, slot) in slots {
            if let Some(process) = slot.lock().await.as_ref() {
                streams.push(process.info(&stream_id));
            }
        }
        streams.sort_by(|a, b| a.stream_id.cmp(&b.stream_id));
        streams
    }

    async fn shutdown(&self, stream_id: &StreamId, mut process: StreamProcess) {
        match process.child.try_wait() {
            Ok(Some(status)) => {
                tracing::debug!(stream_id = %stream_id, %status, "Stream process had already exited");
                if let Some(pid) = process.pid {
                    process::kill_group(pid);
                }
            }
            _ => match process::terminate_group(&mut process.child, self.config.stop_timeout).await {
                Ok(status) => {
                    tracing::info!(stream_id = %stream_id, %status, "Stopped live stream")
                }
                Err(e) => {
                    tracing::error!(stream_id = %stream_id, error = %e, "Error stopping live stream")
                }
            },
        }
        process.drain.abort();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn supervisor() -> ProcessSupervisor {
        ProcessSupervisor::new(SupervisorConfig {
            start_grace: Duration::from_millis(200),
            stop_timeout: Duration::from_secs(2),
        })
    }

    fn sh(script: &str) -> ToolCommand {
        let mut cmd = ToolCommand::new(PathBuf::from("sh"));
        cmd.args(["-c", script]);
        cmd
    }

    fn id(s: &str) -> StreamId {
        StreamId::new(s).unwrap()
    }

    #[tokio::test]
    async fn start_and_stop() {
        let sup = supervisor();
        let info = sup.start(&id("cam"), &sh("sleep 30")).await.unwrap();
        assert!(info.pid.is_some());
        assert!(sup.is_running(&id("cam")).await);

        sup.stop(&id("cam")).await;
        assert!(!sup.is_running(&id("cam")).await);
        assert!(sup.list().await.is_empty());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let sup = supervisor();
        sup.stop(&id("unknown")).await;
        sup.start(&id("cam"), &sh("sleep 30")).await.unwrap();
        sup.stop(&id("cam")).await;
        sup.stop(&id("cam")).await;
        assert!(sup.list().await.is_empty());
    }

    #[tokio::test]
    async fn start_failure_carries_stderr() {
        let sup = supervisor();
        let err = sup
            .start(&id("cam"), &sh("echo 'Connection refused' >&2; exit 1"))
            .await
            .unwrap_err();
        match err {
            Error::ProcessStartFailure { stream_id, stderr } => {
                assert_eq!(stream_id, "cam");
                assert!(stderr.contains("Connection refused"), "stderr: {stderr}");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!sup.is_running(&id("cam")).await);
    }

    #[tokio::test]
    async fn spawn_failure_is_start_failure() {
        let sup = supervisor();
        let cmd = ToolCommand::new(PathBuf::from("/nonexistent/ffmpeg_xyz"));
        let err = sup.start(&id("cam"), &cmd).await.unwrap_err();
        assert!(matches!(err, Error::ProcessStartFailure { .. }));
    }

    #[tokio::test]
    async fn restart_replaces_process() {
        let sup = supervisor();
        let first = sup.start(&id("cam"), &sh("sleep 30")).await.unwrap();
        let second = sup.start(&id("cam"), &sh("sleep 30")).await.unwrap();
        assert_ne!(first.pid, second.pid);

        let live = sup.list().await;
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].pid, second.pid);
        sup.stop_all().await;
    }

    #[tokio::test]
    async fn stop_all_drains_table() {
        let sup = supervisor();
        sup.start(&id("a"), &sh("sleep 30")).await.unwrap();
        sup.start(&id("b"), &sh("sleep 30")).await.unwrap();
        assert_eq!(sup.list().await.len(), 2);

        sup.stop_all().await;
        assert!(sup.list().await.is_empty());
    }

    #[tokio::test]
    async fn exited_process_is_unregistered() {
        let sup = supervisor();
        sup.start(&id("cam"), &sh("sleep 0.5")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(800)).await;
        assert!(!sup.is_running(&id("cam")).await);
        assert!(sup.list().await.is_empty());
    }

    #[tokio::test]
    async fn empty_slots_leave_the_table() {
        let sup = supervisor();
        sup.start(&id("a"), &sh("sleep 30")).await.unwrap();
        sup.start(&id("b"), &sh("sleep 0.3")).await.unwrap();
        let _ = sup.start(&id("c"), &sh("exit 1")).await.unwrap_err();
        sup.stop(&id("never-started")).await;
        assert_eq!(sup.slots.len(), 2);

        sup.stop(&id("a")).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!sup.is_running(&id("b")).await);
        assert!(sup.slots.is_empty());

        sup.start(&id("a"), &sh("sleep 30")).await.unwrap();
        assert!(sup.is_running(&id("a")).await);
        sup.stop_all().await;
        assert!(sup.slots.is_empty());
    }
}
