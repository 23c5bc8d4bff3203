//! Lazily built, cached listings of the files a conversion produced.
//!
//! A listing is built on the first query for a completed task and never
//! rebuilt. Completion is only recorded after the transcoder exits, so the
//! files are final by then. Listings are never invalidated; tasks cannot be
//! removed or re-run.

use castforge_common::paths::{is_dash_chunk, is_hls_chunk, is_safe_file_name};
use castforge_common::{Error, MediaFormat, Result, StreamingProtocol, TaskId, TaskStatus};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::state::{ConversionTask, TaskRegistry};

/// Name of the subdirectory DASH output may live in.
pub const DASH_SUBDIR: &str = "dash";

/// Manifest path for a conversion of `stem` under `media_root`.
///
/// HLS writes `<stem>/playlist.m3u8`, DASH `<stem>/dash/playlist.mpd` and raw
/// output `<stem>/output.mp4`.
pub fn output_path(media_root: &Path, stem: &str, format: MediaFormat) -> PathBuf {
    let dir = media_root.join(stem);
    match format {
        MediaFormat::Hls => dir.join("playlist.m3u8"),
        MediaFormat::Dash => dir.join(DASH_SUBDIR).join("playlist.mpd"),
        MediaFormat::Raw => dir.join("output.mp4"),
    }
}

/// Which listing a chunk belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Hls,
    Dash,
}

impl std::str::FromStr for ChunkKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "hls" => Ok(Self::Hls),
            "dash" => Ok(Self::Dash),
            other => Err(Error::invalid_spec(format!("unknown chunk type: {other}"))),
        }
    }
}

/// Produced files of one task, sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChunkListing {
    pub hls: Vec<String>,
    pub dash: Vec<String>,
}

impl ChunkListing {
    pub fn is_empty(&self) -> bool {
        self.hls.is_empty() && self.dash.is_empty()
    }

    pub fn contains(&self, kind: ChunkKind, name: &str) -> bool {
        let names = match kind {
            ChunkKind::Hls => &self.hls,
            ChunkKind::Dash => &self.dash,
        };
        names.binary_search_by(|n| n.as_str().cmp(name)).is_ok()
    }
}

type Entry = Arc<OnceCell<Arc<ChunkListing>>>;

pub struct ChunkIndex {
    registry: Arc<TaskRegistry>,
    listings: DashMap<TaskId, Entry>,
}

impl ChunkIndex {
    pub fn new(registry: Arc<TaskRegistry>) -> Self {
        Self {
            registry,
            listings: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// The task's produced files. Scans the output directory on the first
    /// call and returns the cached listing afterwards.
    ///
    /// Fails with `TaskNotFound` for unknown tasks and `NotReady` until the
    /// task has completed. Live (RTSP) tasks have an empty listing.
    pub async fn list_chunks(&self, task_id: TaskId) -> Result<Arc<ChunkListing>> {
        let task = self.registry.get(task_id)?;
        if task.status != TaskStatus::Completed {
            return Err(Error::NotReady {
                task_id,
                status: task.status,
            });
        }

        let entry: Entry = self
            .listings
            .entry(task_id)
            .or_default()
            .value()
            .clone();

        entry
            .get_or_try_init(|| async {
                let listing = scan_task(&task).await?;
                tracing::debug!(
                    task_id = %task_id,
                    hls = listing.hls.len(),
                    dash = listing.dash.len(),
                    "Indexed chunks"
                );
                Ok::<_, Error>(Arc::new(listing))
            })
            .await
            .cloned()
    }

    /// Whether the task produced any segment or manifest.
    pub async fn chunks_available(&self, task_id: TaskId) -> Result<bool> {
        Ok(!self.list_chunks(task_id).await?.is_empty())
    }

    /// Resolve a chunk name to a file on disk.
    ///
    /// Only names present in the task's listing resolve, so a request can
    /// never reach outside the task's output directory.
    pub async fn chunk_path(&self, task_id: TaskId, kind: ChunkKind, name: &str) -> Result<PathBuf> {
        if !is_safe_file_name(name) {
            return Err(Error::invalid_spec(format!("invalid chunk name: {name:?}")));
        }
        let listing = self.list_chunks(task_id).await?;
        if !listing.contains(kind, name) {
            return Err(Error::not_found("chunk", name));
        }

        let task = self.registry.get(task_id)?;
        let dir = output_dir(&task.output);
        for candidate in [dir.join(name), dir.join(DASH_SUBDIR).join(name)] {
            if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                return Ok(candidate);
            }
        }
        Err(Error::not_found("chunk", name))
    }
}

fn output_dir(output: &Path) -> &Path {
    output.parent().unwrap_or_else(|| Path::new("."))
}

async fn scan_task(task: &ConversionTask) -> Result<ChunkListing> {
    if task.streaming_protocol == StreamingProtocol::Rtsp {
        return Ok(ChunkListing::default());
    }

    let dir = output_dir(&task.output);
    let mut hls = BTreeSet::new();
    let mut dash = BTreeSet::new();
    for scan_dir in [dir.to_path_buf(), dir.join(DASH_SUBDIR)] {
        scan_dir_into(&scan_dir, &mut hls, &mut dash).await?;
    }

    Ok(ChunkListing {
        hls: hls.into_iter().collect(),
        dash: dash.into_iter().collect(),
    })
}

async fn scan_dir_into(
    dir: &Path,
    hls: &mut BTreeSet<String>,
    dash: &mut BTreeSet<String>,
) -> Result<()> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if is_hls_chunk(&path) {
            hls.insert(name.to_string());
        } else if is_dash_chunk(&path) {
            dash.insert(name.to_string());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ConversionSpec;
    use assert_matches::assert_matches;

    fn completed_task(
        registry: &TaskRegistry,
        output: PathBuf,
        format: MediaFormat,
        protocol: StreamingProtocol,
    ) -> TaskId {
        let id = registry
            .create(ConversionSpec::new("/uploads/in.mp4", output, format, protocol))
            .unwrap();
        registry.start(id).unwrap();
        registry.complete(id, None).unwrap();
        id
    }

    #[test]
    fn output_layout() {
        let root = Path::new("static/output");
        assert_eq!(
            output_path(root, "clip", MediaFormat::Hls),
            Path::new("static/output/clip/playlist.m3u8")
        );
        assert_eq!(
            output_path(root, "clip", MediaFormat::Dash),
            Path::new("static/output/clip/dash/playlist.mpd")
        );
        assert_eq!(
            output_path(root, "clip", MediaFormat::Raw),
            Path::new("static/output/clip/output.mp4")
        );
    }

    #[tokio::test]
    async fn lists_hls_and_dash_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["playlist_001.ts", "playlist.m3u8", "playlist_000.ts", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("dash")).unwrap();
        for name in ["playlist.mpd", "init-stream0.m4s", "chunk-stream0-00001.m4s"] {
            std::fs::write(dir.path().join("dash").join(name), b"x").unwrap();
        }

        let registry = TaskRegistry::new();
        let id = completed_task(
            &registry,
            dir.path().join("playlist.m3u8"),
            MediaFormat::Hls,
            StreamingProtocol::Hls,
        );
        let index = ChunkIndex::new(registry);

        let listing = index.list_chunks(id).await.unwrap();
        assert_eq!(
            listing.hls,
            vec!["playlist.m3u8", "playlist_000.ts", "playlist_001.ts"]
        );
        assert_eq!(
            listing.dash,
            vec!["chunk-stream0-00001.m4s", "init-stream0.m4s", "playlist.mpd"]
        );
        assert!(index.chunks_available(id).await.unwrap());
    }

    #[tokio::test]
    async fn listing_is_cached_after_first_scan() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("playlist.m3u8"), b"x").unwrap();

        let registry = TaskRegistry::new();
        let id = completed_task(
            &registry,
            dir.path().join("playlist.m3u8"),
            MediaFormat::Hls,
            StreamingProtocol::Hls,
        );
        let index = ChunkIndex::new(registry);

        let first = index.list_chunks(id).await.unwrap();
        std::fs::write(dir.path().join("playlist_000.ts"), b"x").unwrap();
        let second = index.list_chunks(id).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.hls, vec!["playlist.m3u8"]);
    }

    #[tokio::test]
    async fn pending_task_is_not_ready() {
        let registry = TaskRegistry::new();
        let id = registry
            .create(ConversionSpec::new(
                "/uploads/in.mp4",
                "/tmp/none/playlist.m3u8",
                MediaFormat::Hls,
                StreamingProtocol::Hls,
            ))
            .unwrap();
        let index = ChunkIndex::new(registry);
        assert_matches!(index.list_chunks(id).await, Err(Error::NotReady { .. }));
        assert_matches!(
            index.list_chunks(TaskId::from(42)).await,
            Err(Error::TaskNotFound(_))
        );
    }

    #[tokio::test]
    async fn missing_output_dir_is_empty_listing() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TaskRegistry::new();
        let id = completed_task(
            &registry,
            dir.path().join("gone").join("playlist.m3u8"),
            MediaFormat::Hls,
            StreamingProtocol::Hls,
        );
        let index = ChunkIndex::new(registry);
        assert!(!index.chunks_available(id).await.unwrap());
    }

    #[tokio::test]
    async fn chunk_path_resolves_only_indexed_names() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("dash")).unwrap();
        std::fs::write(dir.path().join("dash").join("playlist.mpd"), b"<MPD/>").unwrap();
        std::fs::write(dir.path().join("secret.txt"), b"x").unwrap();

        let registry = TaskRegistry::new();
        let id = completed_task(
            &registry,
            dir.path().join("dash").join("playlist.mpd"),
            MediaFormat::Dash,
            StreamingProtocol::Dash,
        );
        let index = ChunkIndex::new(registry);

        let path = index.chunk_path(id, ChunkKind::Dash, "playlist.mpd").await.unwrap();
        assert_eq!(path, dir.path().join("dash").join("playlist.mpd"));

        assert_matches!(
            index.chunk_path(id, ChunkKind::Hls, "playlist.mpd").await,
            Err(Error::NotFound { .. })
        );
        assert_matches!(
            index.chunk_path(id, ChunkKind::Dash, "secret.txt").await,
            Err(Error::NotFound { .. })
        );
        assert_matches!(
            index.chunk_path(id, ChunkKind::Dash, "../secret.txt").await,
            Err(Error::InvalidSpec(_))
        );
    }

    #[tokio::test]
    async fn rtsp_tasks_have_no_chunks() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stray.ts"), b"x").unwrap();
        let registry = TaskRegistry::new();
        let id = completed_task(
            &registry,
            dir.path().join("output.mp4"),
            MediaFormat::Raw,
            StreamingProtocol::Rtsp,
        );
        let index = ChunkIndex::new(registry);
        assert!(index.list_chunks(id).await.unwrap().is_empty());
    }
}
