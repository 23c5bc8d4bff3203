//! Process-tree termination of supervised live streams.

#![cfg(target_os = "linux")]

use std::path::Path;
use std::time::Duration;

use castforge_av::{ProcessSupervisor, SupervisorConfig, ToolCommand};
use castforge_common::{Error, StreamId};

fn supervisor() -> ProcessSupervisor {
    ProcessSupervisor::new(SupervisorConfig {
        start_grace: Duration::from_millis(300),
        stop_timeout: Duration::from_secs(2),
    })
}

/// A shell that backgrounds a grandchild, records its pid and waits on it.
fn tree_command(pid_file: &Path) -> ToolCommand {
    let mut cmd = ToolCommand::new("sh".into());
    cmd.args([
        "-c".to_string(),
        format!("sleep 60 & echo $! > {}; wait", pid_file.display()),
    ]);
    cmd
}

/// Like [`tree_command`], but the leader fails right away and leaves its
/// grandchild behind.
fn failing_tree_command(pid_file: &Path) -> ToolCommand {
    let mut cmd = ToolCommand::new("sh".into());
    cmd.args([
        "-c".to_string(),
        format!(
            "sleep 60 & echo $! > {}; echo 'bind failed' >&2; exit 1",
            pid_file.display()
        ),
    ]);
    cmd
}

async fn read_pid(pid_file: &Path) -> i32 {
    for _ in 0..100 {
        if let Ok(text) = tokio::fs::read_to_string(pid_file).await {
            if let Ok(pid) = text.trim().parse() {
                return pid;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("grandchild pid never written to {}", pid_file.display());
}

/// Gone, or a zombie waiting for its new parent to reap it.
fn is_dead(pid: i32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Err(_) => true,
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .map(|state| state == "Z" || state == "X")
            .unwrap_or(true),
    }
}

async fn wait_dead(pid: i32) -> bool {
    for _ in 0..100 {
        if is_dead(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn stop_kills_descendants() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("grandchild.pid");
    let supervisor = supervisor();
    let id = StreamId::new("tree").unwrap();

    supervisor.start(&id, &tree_command(&pid_file)).await.unwrap();
    let grandchild = read_pid(&pid_file).await;
    assert!(!is_dead(grandchild));

    supervisor.stop(&id).await;

    assert!(wait_dead(grandchild).await, "grandchild {grandchild} survived stop");
    assert!(!supervisor.is_running(&id).await);
}

#[tokio::test]
async fn replacing_a_stream_kills_the_old_tree() {
    let dir = tempfile::tempdir().unwrap();
    let first_pid_file = dir.path().join("first.pid");
    let second_pid_file = dir.path().join("second.pid");
    let supervisor = supervisor();
    let id = StreamId::new("replace").unwrap();

    supervisor.start(&id, &tree_command(&first_pid_file)).await.unwrap();
    let old = read_pid(&first_pid_file).await;

    supervisor.start(&id, &tree_command(&second_pid_file)).await.unwrap();
    let new = read_pid(&second_pid_file).await;

    assert!(wait_dead(old).await, "old grandchild {old} survived replacement");
    assert!(!is_dead(new));
    assert_eq!(supervisor.list().await.len(), 1);

    supervisor.stop_all().await;
    assert!(wait_dead(new).await);
}

#[tokio::test]
async fn streams_are_independent() {
    let supervisor = supervisor();
    let a = StreamId::new("a").unwrap();
    let b = StreamId::new("b").unwrap();
    let mut cmd = ToolCommand::new("sleep".into());
    cmd.arg("60");

    supervisor.start(&a, &cmd).await.unwrap();
    supervisor.start(&b, &cmd).await.unwrap();
    supervisor.stop(&a).await;

    assert!(!supervisor.is_running(&a).await);
    assert!(supervisor.is_running(&b).await);
    let ids: Vec<_> = supervisor.list().await.into_iter().map(|s| s.stream_id).collect();
    assert_eq!(ids, vec![b.clone()]);

    supervisor.stop_all().await;
    assert!(supervisor.list().await.is_empty());
}

#[tokio::test]
async fn failed_start_kills_forked_helpers() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("helper.pid");
    let supervisor = supervisor();
    let id = StreamId::new("refused").unwrap();

    let err = supervisor
        .start(&id, &failing_tree_command(&pid_file))
        .await
        .unwrap_err();
    match err {
        Error::ProcessStartFailure { stderr, .. } => assert!(stderr.contains("bind failed")),
        other => panic!("unexpected error: {other}"),
    }

    let helper = read_pid(&pid_file).await;
    assert!(wait_dead(helper).await, "helper {helper} outlived a failed start");
    assert!(supervisor.list().await.is_empty());
}

#[tokio::test]
async fn failed_transcode_kills_forked_helpers() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("helper.pid");

    let err = failing_tree_command(&pid_file).execute().await.unwrap_err();
    assert!(matches!(err, Error::TranscodeFailure { .. }), "{err}");

    let helper = read_pid(&pid_file).await;
    assert!(wait_dead(helper).await, "helper {helper} outlived its transcoder");
}

#[tokio::test]
async fn concurrent_starts_leave_one_live_tree() {
    let dir = tempfile::tempdir().unwrap();
    let pid_files: Vec<_> = (0..3)
        .map(|i| dir.path().join(format!("tree{i}.pid")))
        .collect();
    let commands: Vec<_> = pid_files.iter().map(|p| tree_command(p)).collect();
    let supervisor = supervisor();
    let id = StreamId::new("contended").unwrap();

    let (a, b, c) = tokio::join!(
        supervisor.start(&id, &commands[0]),
        supervisor.start(&id, &commands[1]),
        supervisor.start(&id, &commands[2]),
    );
    let started = [a.unwrap(), b.unwrap(), c.unwrap()];

    let live = supervisor.list().await;
    assert_eq!(live.len(), 1);
    let winner = live[0].pid;

    for (info, pid_file) in started.iter().zip(&pid_files) {
        let grandchild = read_pid(pid_file).await;
        if info.pid == winner {
            assert!(!is_dead(grandchild));
        } else {
            let leader = info.pid.unwrap() as i32;
            assert!(wait_dead(leader).await, "replaced leader {leader} survived");
            assert!(wait_dead(grandchild).await, "replaced grandchild {grandchild} survived");
        }
    }

    supervisor.stop_all().await;
    assert!(supervisor.list().await.is_empty());
}
