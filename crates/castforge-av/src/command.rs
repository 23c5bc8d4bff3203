//! Builder for executing one-shot transcoder invocations.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use castforge_common::{Error, Result};
use futures::StreamExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::process::{self, DEFAULT_STOP_TIMEOUT};
use crate::stderr::{self, StderrTail, DEFAULT_STDERR_LIMIT};

/// How long to keep reading stderr after the process exits. Forked helpers
/// can hold the pipe open past the leader's exit.
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Output captured from a successful execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Process exit status.
    pub status: ExitStatus,
    /// Tail of standard error (bounded by the stderr limit).
    pub stderr: String,
}

/// A builder for constructing and executing external tool invocations.
///
/// The process runs in its own process group. When the optional timeout
/// elapses or the cancellation token fires, the whole group is terminated.
///
/// # Example
///
/// ```no_run
/// use castforge_av::ToolCommand;
/// use std::path::PathBuf;
///
/// # async fn example() -> castforge_common::Result<()> {
/// let output = ToolCommand::new(PathBuf::from("ffmpeg"))
///     .args(["-y", "-i", "in.mp4", "out.m3u8"])
///     .execute()
///     .await?;
/// println!("{}", output.stderr);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Option<Duration>,
    cancel: Option<CancellationToken>,
    stderr_limit: usize,
    stop_timeout: Duration,
}

impl ToolCommand {
    /// Create a new command for the given program path.
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: None,
            cancel: None,
            stderr_limit: DEFAULT_STDERR_LIMIT,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set the maximum execution time. No limit by default.
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = Some(d);
        self
    }

    /// Terminate the process when `token` is cancelled.
    pub fn cancel_on(&mut self, token: CancellationToken) -> &mut Self {
        self.cancel = Some(token);
        self
    }

    /// Number of stderr bytes retained for the result or error.
    pub fn stderr_limit(&mut self, bytes: usize) -> &mut Self {
        self.stderr_limit = bytes;
        self
    }

    /// Grace period between SIGTERM and SIGKILL when the process is stopped.
    pub fn stop_timeout(&mut self, d: Duration) -> &mut Self {
        self.stop_timeout = d;
        self
    }

    /// The program path.
    pub fn get_program(&self) -> &std::path::Path {
        &self.program
    }

    /// The argument list, without the program.
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub(crate) fn get_stderr_limit(&self) -> usize {
        self.stderr_limit
    }

    pub(crate) fn get_stop_timeout(&self) -> Duration {
        self.stop_timeout
    }

    /// Execute the command, capturing the tail of stderr.
    pub async fn execute(&self) -> Result<ToolOutput> {
        self.execute_with_stderr_callback(|_| {}).await
    }

    /// Execute the command, passing every stderr line to `on_line`.
    ///
    /// # Errors
    ///
    /// - [`Error::Tool`] if the process cannot be spawned.
    /// - [`Error::TranscodeFailure`] if it exits unsuccessfully, times out or
    ///   is cancelled; `stderr` carries the captured tail.
    pub async fn execute_with_stderr_callback<F>(&self, mut on_line: F) -> Result<ToolOutput>
    where
        F: FnMut(&str) + Send,
    {
        let program_name = self.program_name();

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        process::isolate(&mut cmd);

        let mut child = cmd.spawn().map_err(|e| Error::Tool {
            tool: program_name.clone(),
            message: format!("failed to spawn: {e}"),
        })?;
        let pid = child.id();
        tracing::debug!(tool = %program_name, pid = ?pid, args = ?self.args, "Spawned");

        let stderr_pipe = child
            .stderr
            .take()
            .ok_or_else(|| Error::internal("stderr pipe missing"))?;
        let mut lines = stderr::lines(stderr_pipe);
        let mut tail = StderrTail::new(self.stderr_limit);
        let mut stderr_open = true;

        let cancel = self.cancel.clone().unwrap_or_default();
        let deadline = async {
            match self.timeout {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);

        let outcome = loop {
            tokio::select! {
                line = lines.next(), if stderr_open => match line {
                    Some(line) => {
                        on_line(&line);
                        tail.push(&line);
                    }
                    None => stderr_open = false,
                },
                status = child.wait() => break Outcome::Exited(status?),
                _ = cancel.cancelled() => break Outcome::Cancelled,
                _ = &mut deadline => break Outcome::TimedOut,
            }
        };

        let status = match outcome {
            Outcome::Exited(status) => {
                // Nothing in the group outlives its leader.
                if let Some(pid) = pid {
                    process::kill_group(pid);
                }
                if stderr_open {
                    let drain = async {
                        while let Some(line) = lines.next().await {
                            on_line(&line);
                            tail.push(&line);
                        }
                    };
                    let _ = tokio::time::timeout(STDERR_DRAIN_TIMEOUT, drain).await;
                }
                status
            }
            Outcome::Cancelled | Outcome::TimedOut => {
                if let Err(e) = process::terminate_group(&mut child, self.stop_timeout).await {
                    tracing::warn!(tool = %program_name, error = %e, "Failed to stop process");
                }
                let reason = match outcome {
                    Outcome::TimedOut => match self.timeout {
                        Some(d) => format!("timed out after {}s", d.as_secs_f64()),
                        None => "timed out".to_string(),
                    },
                    _ => "cancelled".to_string(),
                };
                tracing::warn!(tool = %program_name, %reason, "Process stopped");
                return Err(Error::TranscodeFailure {
                    status: reason,
                    stderr: tail.contents(),
                });
            }
        };

        if !status.success() {
            return Err(Error::TranscodeFailure {
                status: status.to_string(),
                stderr: tail.contents(),
            });
        }

        Ok(ToolOutput {
            status,
            stderr: tail.contents(),
        })
    }

    fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }
}

#[derive(Clone, Copy)]
enum Outcome {
    Exited(ExitStatus),
    Cancelled,
    TimedOut,
}
