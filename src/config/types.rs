use castforge_av::{EncodeSettings, Rendition, RtspEndpoint, SupervisorConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub conversion: ConversionConfig,

    #[serde(default)]
    pub rtsp: RtspConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Where uploaded source files are written.
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,

    /// Root of the conversion output tree (one folder per upload).
    #[serde(default = "default_media_root")]
    pub media_root: PathBuf,

    /// Directory served under `static_url_prefix`.
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,

    #[serde(default = "default_static_url_prefix")]
    pub static_url_prefix: String,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}
fn default_media_root() -> PathBuf {
    PathBuf::from("static/output")
}
fn default_static_dir() -> PathBuf {
    PathBuf::from("static")
}
fn default_static_url_prefix() -> String {
    "/static".to_string()
}
fn default_max_upload_bytes() -> usize {
    2 * 1024 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            upload_dir: default_upload_dir(),
            media_root: default_media_root(),
            static_dir: default_static_dir(),
            static_url_prefix: default_static_url_prefix(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ToolsConfig {
    /// Explicit ffmpeg path; searched on PATH when unset.
    #[serde(default)]
    pub ffmpeg: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConversionConfig {
    /// Maximum number of transcodes running at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Kill one-shot transcodes that run longer than this.
    #[serde(default)]
    pub transcode_timeout_secs: Option<u64>,

    /// Bytes of ffmpeg stderr kept for error reports.
    #[serde(default = "default_stderr_limit")]
    pub stderr_limit_bytes: usize,

    #[serde(default = "default_segment_duration")]
    pub default_segment_duration: u32,

    /// Assumed frame rate used to align keyframes with segment boundaries.
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,

    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,

    #[serde(default = "default_audio_channels")]
    pub audio_channels: u32,

    /// HLS renditions, highest first. The first entry is the single-rendition
    /// profile.
    #[serde(default = "castforge_av::default_ladder")]
    pub hls_ladder: Vec<Rendition>,
}

fn default_max_concurrent() -> usize {
    4
}
fn default_stderr_limit() -> usize {
    16 * 1024
}
fn default_segment_duration() -> u32 {
    6
}
fn default_frame_rate() -> u32 {
    30
}
fn default_audio_bitrate() -> String {
    "128k".to_string()
}
fn default_audio_channels() -> u32 {
    2
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            transcode_timeout_secs: None,
            stderr_limit_bytes: default_stderr_limit(),
            default_segment_duration: default_segment_duration(),
            frame_rate: default_frame_rate(),
            audio_bitrate: default_audio_bitrate(),
            audio_channels: default_audio_channels(),
            hls_ladder: castforge_av::default_ladder(),
        }
    }
}

impl ConversionConfig {
    pub fn encode_settings(&self) -> EncodeSettings {
        EncodeSettings {
            frame_rate: self.frame_rate,
            audio_bitrate: self.audio_bitrate.clone(),
            audio_channels: self.audio_channels,
            ladder: self.hls_ladder.clone(),
        }
    }

    pub fn transcode_timeout(&self) -> Option<Duration> {
        self.transcode_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RtspConfig {
    /// Port shared by every published stream; streams differ by path.
    #[serde(default = "default_rtsp_port")]
    pub port: u16,

    /// Host ffmpeg publishes to.
    #[serde(default = "default_rtsp_bind_host")]
    pub bind_host: String,

    /// Host advertised to clients in `rtsp://` URLs.
    #[serde(default = "default_rtsp_public_host")]
    pub public_host: String,

    #[serde(default = "default_start_grace_ms")]
    pub start_grace_ms: u64,

    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
}

fn default_rtsp_port() -> u16 {
    8554
}
fn default_rtsp_bind_host() -> String {
    "0.0.0.0".to_string()
}
fn default_rtsp_public_host() -> String {
    "localhost".to_string()
}
fn default_start_grace_ms() -> u64 {
    1000
}
fn default_stop_timeout_secs() -> u64 {
    5
}

impl Default for RtspConfig {
    fn default() -> Self {
        Self {
            port: default_rtsp_port(),
            bind_host: default_rtsp_bind_host(),
            public_host: default_rtsp_public_host(),
            start_grace_ms: default_start_grace_ms(),
            stop_timeout_secs: default_stop_timeout_secs(),
        }
    }
}

impl RtspConfig {
    pub fn endpoint(&self) -> RtspEndpoint {
        RtspEndpoint {
            bind_host: self.bind_host.clone(),
            port: self.port,
        }
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            start_grace: Duration::from_millis(self.start_grace_ms),
            stop_timeout: Duration::from_secs(self.stop_timeout_secs),
        }
    }
}
