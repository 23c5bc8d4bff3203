//! Path utilities for classifying produced segment files.
//!
//! The chunk index and the static file layer both need to know which files an
//! HLS or DASH conversion produces and what content type each is served with.

use std::path::Path;

/// Extensions produced by an HLS conversion.
const HLS_EXTENSIONS: &[&str] = &["ts", "m3u8"];

/// Extensions produced by a DASH conversion.
const DASH_EXTENSIONS: &[&str] = &["m4s", "mpd"];

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Check if a path is an HLS playlist or transport-stream segment.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use castforge_common::paths::is_hls_chunk;
///
/// assert!(is_hls_chunk(Path::new("playlist.m3u8")));
/// assert!(is_hls_chunk(Path::new("playlist_000.ts")));
/// assert!(!is_hls_chunk(Path::new("playlist.mpd")));
/// ```
pub fn is_hls_chunk(path: &Path) -> bool {
    extension(path)
        .map(|ext| HLS_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Check if a path is a DASH manifest, media segment or initialization
/// segment.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use castforge_common::paths::is_dash_chunk;
///
/// assert!(is_dash_chunk(Path::new("playlist.mpd")));
/// assert!(is_dash_chunk(Path::new("chunk-stream0-00001.m4s")));
/// assert!(is_dash_chunk(Path::new("init-stream1.mp4")));
/// assert!(!is_dash_chunk(Path::new("output.mp4")));
/// ```
pub fn is_dash_chunk(path: &Path) -> bool {
    let Some(ext) = extension(path) else {
        return false;
    };
    if DASH_EXTENSIONS.contains(&ext.as_str()) {
        return true;
    }
    // Initialization segments written as MP4 rather than m4s.
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    ext == "mp4" && (name.starts_with("init-") || name.ends_with(".init.mp4"))
}

/// Content type to serve a delivery file with, based on its extension.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use castforge_common::paths::content_type_for;
///
/// assert_eq!(content_type_for(Path::new("a.m3u8")), "application/vnd.apple.mpegurl");
/// assert_eq!(content_type_for(Path::new("a.bin")), "application/octet-stream");
/// ```
pub fn content_type_for(path: &Path) -> &'static str {
    match extension(path).as_deref() {
        Some("m3u8") => "application/vnd.apple.mpegurl",
        Some("ts") => "video/MP2T",
        Some("mpd") => "application/dash+xml",
        Some("m4s") | Some("mp4") => "video/mp4",
        _ => "application/octet-stream",
    }
}

/// Whether a client-supplied file name is a single, plain path component.
///
/// Rejects anything that could walk out of the task's output directory.
pub fn is_safe_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains("..")
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}
