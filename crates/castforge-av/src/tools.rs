//! Locating the transcoder executable.

use std::path::{Path, PathBuf};

use castforge_common::{Error, Result};
use serde::{Deserialize, Serialize};

/// Name of the transcoder binary searched for on `PATH`.
pub const FFMPEG: &str = "ffmpeg";

/// Availability information reported by `check-tools`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub available: bool,
    /// First line of `-version` output, if the tool ran.
    pub version: Option<String>,
    pub path: Option<PathBuf>,
}

/// Resolved location of ffmpeg.
#[derive(Debug, Clone, Default)]
pub struct Transcoder {
    path: Option<PathBuf>,
}

impl Transcoder {
    /// Resolve ffmpeg from an explicit path, falling back to `PATH` when the
    /// override is unset or does not exist.
    pub fn discover(custom: Option<&Path>) -> Self {
        let path = match custom {
            Some(p) if p.exists() => Some(p.to_path_buf()),
            Some(p) => {
                tracing::warn!(path = %p.display(), "Configured ffmpeg not found, searching PATH");
                which::which(FFMPEG).ok()
            }
            None => which::which(FFMPEG).ok(),
        };
        Self { path }
    }

    /// Use `path` as-is, without checking it exists.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// The resolved path, or [`Error::Tool`] when ffmpeg was not found.
    pub fn require(&self) -> Result<&Path> {
        self.path
            .as_deref()
            .ok_or_else(|| Error::tool(FFMPEG, "ffmpeg not found; is it installed and in PATH?"))
    }

    pub fn check(&self) -> ToolInfo {
        ToolInfo {
            name: FFMPEG.to_string(),
            available: self.path.is_some(),
            version: self.path.as_deref().and_then(detect_version),
            path: self.path.clone(),
        }
    }
}

/// Run `ffmpeg -version` and return the first line of stdout.
fn detect_version(path: &Path) -> Option<String> {
    let output = std::process::Command::new(path)
        .arg("-version")
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(|s| s.to_string())
}
