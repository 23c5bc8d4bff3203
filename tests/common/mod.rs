//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which lays out a temporary upload/static tree and
//! builds a full [`AppContext`] whose "ffmpeg" is one of the shell scripts in
//! [`FakeTool`]. Scripts are written once per test binary, before any test
//! spawns a process, so no child ever inherits a script's write handle.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use castforge::config::Config;
use castforge::server::AppContext;
use castforge::state::{ConversionSpec, ConversionTask, TaskRegistry};
use castforge_common::{MediaFormat, StreamingProtocol, TaskId, TaskStatus};
use tempfile::TempDir;

/// Stand-ins for ffmpeg. The last argument is always the output target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeTool {
    /// Writes the manifest plus one segment next to it and exits 0.
    Succeed,
    /// Sleeps one second, then behaves like `Succeed`.
    SucceedSlowly,
    /// Prints an error to stderr and exits 1.
    Fail,
    /// Sleeps far longer than any test waits.
    Hang,
    /// Runs like a live publisher until killed.
    Live,
    /// Exits immediately, like a publisher that could not connect.
    LiveRefused,
}

impl FakeTool {
    fn file_name(self) -> &'static str {
        match self {
            Self::Succeed => "ffmpeg-succeed",
            Self::SucceedSlowly => "ffmpeg-slow",
            Self::Fail => "ffmpeg-fail",
            Self::Hang => "ffmpeg-hang",
            Self::Live => "ffmpeg-live",
            Self::LiveRefused => "ffmpeg-refused",
        }
    }

    fn script(self) -> &'static str {
        match self {
            Self::Succeed => SUCCEED,
            Self::SucceedSlowly => SUCCEED_SLOWLY,
            Self::Fail => FAIL,
            Self::Hang => "#!/bin/sh\nsleep 60\n",
            Self::Live => "#!/bin/sh\necho 'Press [q] to stop' >&2\nsleep 60\n",
            Self::LiveRefused => {
                "#!/bin/sh\necho 'rtsp://0.0.0.0:8554: Connection refused' >&2\nexit 1\n"
            }
        }
    }

    pub fn path(self) -> PathBuf {
        fake_tools().path().join(self.file_name())
    }
}

const SUCCEED: &str = concat!("#!/bin/sh\n", r#"
for out in "$@"; do :; done
dir=$(dirname "$out")
mkdir -p "$dir"
echo "  Duration: 00:00:10.00, start: 0.000000, bitrate: 1000 kb/s" >&2
echo "frame=  120 fps=30 q=28.0 size=512kB time=00:00:05.00 bitrate=800kbits/s speed=2x" >&2
case "$out" in
  *.m3u8)
    stem=$(basename "$out" .m3u8)
    printf '#EXTM3U\n#EXT-X-ENDLIST\n' > "$out"
    printf 'ts' > "$dir/${stem}_000.ts"
    ;;
  *.mpd)
    printf '<MPD/>' > "$out"
    printf 'm4s' > "$dir/chunk-stream0-00001.m4s"
    ;;
  *)
    printf 'mp4' > "$out"
    ;;
esac
"#);

const SUCCEED_SLOWLY: &str = concat!("#!/bin/sh\nsleep 1\n", r#"
for out in "$@"; do :; done
dir=$(dirname "$out")
mkdir -p "$dir"
case "$out" in
  *.m3u8)
    stem=$(basename "$out" .m3u8)
    printf '#EXTM3U\n#EXT-X-ENDLIST\n' > "$out"
    printf 'ts' > "$dir/${stem}_000.ts"
    ;;
  *)
    printf 'out' > "$out"
    ;;
esac
"#);

const FAIL: &str = "#!/bin/sh\necho 'in.mp4: Invalid data found when processing input' >&2\nexit 1\n";

fn fake_tools() -> &'static TempDir {
    static TOOLS: OnceLock<TempDir> = OnceLock::new();
    TOOLS.get_or_init(|| {
        let dir = tempfile::Builder::new()
            .prefix("castforge-fake-ffmpeg")
            .tempdir()
            .unwrap();
        for tool in [
            FakeTool::Succeed,
            FakeTool::SucceedSlowly,
            FakeTool::Fail,
            FakeTool::Hang,
            FakeTool::Live,
            FakeTool::LiveRefused,
        ] {
            let path = dir.path().join(tool.file_name());
            std::fs::write(&path, tool.script()).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        dir
    })
}

/// Test harness wrapping a fully-constructed [`AppContext`] rooted in a
/// temporary directory.
pub struct TestHarness {
    pub ctx: AppContext,
    pub root: TempDir,
}

impl TestHarness {
    pub fn new(tool: FakeTool) -> Self {
        Self::with_config(tool, |_| {})
    }

    /// Build a harness, letting the caller adjust the config first.
    pub fn with_config(tool: FakeTool, adjust: impl FnOnce(&mut Config)) -> Self {
        let root = tempfile::tempdir().unwrap();
        let mut config = test_config(root.path(), tool);
        adjust(&mut config);
        std::fs::create_dir_all(&config.server.upload_dir).unwrap();
        std::fs::create_dir_all(&config.server.media_root).unwrap();

        Self {
            ctx: AppContext::new(config),
            root,
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.ctx.registry
    }

    /// Write a placeholder input video into the upload directory.
    pub fn input(&self, name: &str) -> PathBuf {
        let path = self.ctx.config.server.upload_dir.join(name);
        std::fs::write(&path, b"not really a video").unwrap();
        path
    }

    /// Register a task converting `input` to the standard layout for `stem`.
    pub fn create_task(
        &self,
        input: &Path,
        stem: &str,
        format: MediaFormat,
        protocol: StreamingProtocol,
    ) -> TaskId {
        let output = castforge::streaming::output_path(&self.ctx.config.server.media_root, stem, format);
        self.registry()
            .create(ConversionSpec::new(input, output, format, protocol))
            .unwrap()
    }

    /// Poll until the task reaches a terminal state.
    pub async fn wait_terminal(&self, id: TaskId) -> ConversionTask {
        self.wait_for(id, |task| task.status.is_terminal()).await
    }

    pub async fn wait_for(
        &self,
        id: TaskId,
        done: impl Fn(&ConversionTask) -> bool,
    ) -> ConversionTask {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
        loop {
            let task = self.registry().get(id).unwrap();
            if done(&task) {
                return task;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "task {id} stuck in {:?}",
                task.status
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

pub fn test_config(root: &Path, tool: FakeTool) -> Config {
    let mut config = Config::default();
    config.server.upload_dir = root.join("uploads");
    config.server.static_dir = root.join("static");
    config.server.media_root = root.join("static").join("output");
    config.tools.ffmpeg = Some(tool.path());
    config.rtsp.start_grace_ms = 300;
    config.rtsp.stop_timeout_secs = 2;
    config
}

pub fn status_of(registry: &TaskRegistry, id: TaskId) -> TaskStatus {
    registry.get(id).unwrap().status
}
