//! Process-group spawning and termination.
//!
//! Every transcoder is started as the leader of a fresh process group, so a
//! single signal reaches ffmpeg and any helpers it forks. Both the live stream
//! supervisor and the one-shot transcode path tear processes down through
//! [`terminate_group`].

use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::{Child, Command};

/// Default time a process group gets to exit after SIGTERM.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Put the command in its own process group and kill it if its handle drops.
pub fn isolate(cmd: &mut Command) {
    #[cfg(unix)]
    cmd.process_group(0);
    cmd.kill_on_drop(true);
}

/// Terminate the process group led by `child`.
///
/// Sends SIGTERM to the group, waits up to `timeout` for the leader to exit,
/// then SIGKILLs the group. A final SIGKILL is always sent to the group so
/// that helpers that ignored SIGTERM do not outlive their leader.
pub async fn terminate_group(child: &mut Child, timeout: Duration) -> std::io::Result<ExitStatus> {
    let Some(pid) = child.id() else {
        // Already reaped.
        return child.wait().await;
    };

    #[cfg(unix)]
    {
        use nix::sys::signal::Signal;

        signal_group(pid, Signal::SIGTERM);
        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                tracing::warn!(pid, ?timeout, "Process group ignored SIGTERM, killing");
                signal_group(pid, Signal::SIGKILL);
                child.wait().await?
            }
        };
        signal_group(pid, Signal::SIGKILL);
        Ok(status)
    }

    #[cfg(not(unix))]
    {
        let _ = timeout;
        tracing::debug!(pid, "Killing process");
        child.start_kill()?;
        child.wait().await
    }
}

/// SIGKILL whatever is left of a group whose leader was already reaped.
pub fn kill_group(pid: u32) {
    #[cfg(unix)]
    signal_group(pid, nix::sys::signal::Signal::SIGKILL);
    #[cfg(not(unix))]
    let _ = pid;
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) {
    use nix::errno::Errno;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    match nix::sys::signal::killpg(Pid::from_raw(raw), signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => tracing::warn!(pid, %signal, error = %e, "Failed to signal process group"),
    }
}
