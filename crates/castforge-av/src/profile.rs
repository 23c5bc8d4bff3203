//! ffmpeg argument profiles for each supported delivery format.
//!
//! [`ProfileBuilder::build`] is a pure mapping from a conversion request to
//! the argument list handed to ffmpeg. It never touches the filesystem and
//! never spawns anything, so an unsupported request is rejected before any
//! process exists.

use std::path::Path;

use castforge_common::{Error, MediaFormat, Renditions, Result, StreamId, StreamingProtocol};
use serde::{Deserialize, Serialize};

/// One rung of the HLS bitrate ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rendition {
    /// Variant name, used in variant playlist and segment file names.
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// Target video bitrate, in ffmpeg notation (e.g. `2800k`).
    pub video_bitrate: String,
    pub maxrate: String,
    pub bufsize: String,
}

impl Rendition {
    fn new(name: &str, width: u32, height: u32, bitrate: &str, maxrate: &str, bufsize: &str) -> Self {
        Self {
            name: name.to_string(),
            width,
            height,
            video_bitrate: bitrate.to_string(),
            maxrate: maxrate.to_string(),
            bufsize: bufsize.to_string(),
        }
    }

    fn scale_filter(&self) -> String {
        format!(
            "scale=w='min({w},iw)':h='min({h},ih)':force_original_aspect_ratio=decrease:force_divisible_by=2",
            w = self.width,
            h = self.height
        )
    }
}

/// Default ladder: 1080p, 720p, 480p.
pub fn default_ladder() -> Vec<Rendition> {
    vec![
        Rendition::new("1080p", 1920, 1080, "5000k", "5350k", "7500k"),
        Rendition::new("720p", 1280, 720, "2800k", "2996k", "4200k"),
        Rendition::new("480p", 854, 480, "1400k", "1498k", "2100k"),
    ]
}

/// Encoder parameters shared by every HLS invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeSettings {
    /// Assumed source frame rate, used to size the GOP to one segment.
    pub frame_rate: u32,
    pub audio_bitrate: String,
    pub audio_channels: u32,
    /// The first rung is the single-rendition profile.
    pub ladder: Vec<Rendition>,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            frame_rate: 30,
            audio_bitrate: "128k".to_string(),
            audio_channels: 2,
            ladder: default_ladder(),
        }
    }
}

/// Where live RTSP feeds are published. All streams share one port and are
/// distinguished by path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtspEndpoint {
    pub bind_host: String,
    pub port: u16,
}

impl RtspEndpoint {
    /// The URL ffmpeg publishes `stream_id` to.
    pub fn publish_url(&self, stream_id: &StreamId) -> String {
        format!("rtsp://{}:{}/{}", self.bind_host, self.port, stream_id)
    }
}

impl Default for RtspEndpoint {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: 8554,
        }
    }
}

/// Everything a profile depends on.
#[derive(Debug, Clone, Copy)]
pub struct ProfileRequest<'a> {
    pub format: MediaFormat,
    pub protocol: StreamingProtocol,
    pub input: &'a Path,
    pub output: &'a Path,
    pub segment_duration: u32,
    pub renditions: Renditions,
    /// Required for RTSP.
    pub stream_id: Option<&'a StreamId>,
}

/// A concrete ffmpeg invocation (arguments only, without the program).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscodeProfile {
    /// Runs to completion and leaves files behind.
    OneShot { args: Vec<String> },
    /// Never exits on its own; owned by the stream supervisor.
    Live {
        stream_id: StreamId,
        publish_url: String,
        args: Vec<String>,
    },
}

impl TranscodeProfile {
    pub fn args(&self) -> &[String] {
        match self {
            Self::OneShot { args } | Self::Live { args, .. } => args,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live { .. })
    }
}

/// Maps conversion requests to ffmpeg argument lists.
#[derive(Debug, Clone, Default)]
pub struct ProfileBuilder {
    settings: EncodeSettings,
    rtsp: RtspEndpoint,
}

impl ProfileBuilder {
    pub fn new(settings: EncodeSettings, rtsp: RtspEndpoint) -> Self {
        Self { settings, rtsp }
    }

    pub fn settings(&self) -> &EncodeSettings {
        &self.settings
    }

    pub fn rtsp(&self) -> &RtspEndpoint {
        &self.rtsp
    }

    /// Build the invocation for `req`.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedCombination`] unless the pairing is hls/hls,
    ///   dash/dash or raw/rtsp.
    /// - [`Error::InvalidSpec`] for a zero segment duration, an empty ladder,
    ///   or an RTSP request without a stream id.
    pub fn build(&self, req: &ProfileRequest<'_>) -> Result<TranscodeProfile> {
        if !req.format.pairs_with(req.protocol) {
            return Err(Error::UnsupportedCombination {
                format: req.format,
                protocol: req.protocol,
            });
        }
        if req.segment_duration == 0 {
            return Err(Error::invalid_spec("segment duration must be positive"));
        }

        match req.protocol {
            StreamingProtocol::Hls => {
                let args = match req.renditions {
                    Renditions::Single => self.hls_single(req)?,
                    Renditions::Ladder => self.hls_ladder(req)?,
                };
                Ok(TranscodeProfile::OneShot { args })
            }
            StreamingProtocol::Dash => Ok(TranscodeProfile::OneShot {
                args: dash_args(req),
            }),
            StreamingProtocol::Rtsp => {
                let stream_id = req
                    .stream_id
                    .ok_or_else(|| Error::invalid_spec("rtsp requires a stream id"))?;
                let publish_url = self.rtsp.publish_url(stream_id);
                let args = rtsp_args(req.input, &publish_url);
                Ok(TranscodeProfile::Live {
                    stream_id: stream_id.clone(),
                    publish_url,
                    args,
                })
            }
        }
    }

    /// Keyframe interval in frames: one GOP per segment.
    fn gop(&self, segment_duration: u32) -> Result<String> {
        segment_duration
            .checked_mul(self.settings.frame_rate.max(1))
            .map(|frames| frames.to_string())
            .ok_or_else(|| Error::invalid_spec("segment duration too large"))
    }

    fn hls_single(&self, req: &ProfileRequest<'_>) -> Result<Vec<String>> {
        let rung = self
            .settings
            .ladder
            .first()
            .ok_or_else(|| Error::invalid_spec("HLS ladder is empty"))?;
        let gop = self.gop(req.segment_duration)?;
        let stem = file_stem(req.output);
        let segments = req.output.with_file_name(format!("{stem}_%03d.ts"));

        let mut args = strings(["-y", "-i"]);
        args.push(path_arg(req.input));
        args.extend(strings(["-c:v", "libx264"]));
        args.extend(["-b:v".into(), rung.video_bitrate.clone()]);
        args.extend(["-maxrate".into(), rung.maxrate.clone()]);
        args.extend(["-bufsize".into(), rung.bufsize.clone()]);
        args.extend(["-vf".into(), rung.scale_filter()]);
        args.extend(["-g".into(), gop.clone(), "-keyint_min".into(), gop]);
        args.extend(strings(["-sc_threshold", "0"]));
        args.extend(self.audio_args(None));
        args.extend(strings(["-f", "hls"]));
        args.extend(["-hls_time".into(), req.segment_duration.to_string()]);
        args.extend(strings(["-hls_playlist_type", "vod"]));
        args.extend(["-hls_segment_filename".into(), path_arg(&segments)]);
        args.extend(strings(["-hls_flags", "independent_segments"]));
        args.extend(strings(["-start_number", "0"]));
        args.push(path_arg(req.output));
        Ok(args)
    }

    fn hls_ladder(&self, req: &ProfileRequest<'_>) -> Result<Vec<String>> {
        let ladder = &self.settings.ladder;
        if ladder.is_empty() {
            return Err(Error::invalid_spec("HLS ladder is empty"));
        }
        let gop = self.gop(req.segment_duration)?;
        let dir = req.output.parent().unwrap_or_else(|| Path::new("."));
        let master = req
            .output
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "playlist.m3u8".to_string());

        let splits: String = (0..ladder.len()).map(|i| format!("[v{i}]")).collect();
        let mut graph = format!("[0:v]split={}{splits}", ladder.len());
        for (i, rung) in ladder.iter().enumerate() {
            graph.push_str(&format!(";[v{i}]{}[v{i}out]", rung.scale_filter()));
        }

        let mut args = strings(["-y", "-i"]);
        args.push(path_arg(req.input));
        args.extend(["-filter_complex".into(), graph]);

        for (i, rung) in ladder.iter().enumerate() {
            args.extend(["-map".into(), format!("[v{i}out]")]);
            args.extend([format!("-c:v:{i}"), "libx264".into()]);
            args.extend([format!("-b:v:{i}"), rung.video_bitrate.clone()]);
            args.extend([format!("-maxrate:v:{i}"), rung.maxrate.clone()]);
            args.extend([format!("-bufsize:v:{i}"), rung.bufsize.clone()]);
        }
        for i in 0..ladder.len() {
            args.extend(strings(["-map", "0:a:0"]));
            args.extend(self.audio_args(Some(i)));
        }

        let var_stream_map = ladder
            .iter()
            .enumerate()
            .map(|(i, rung)| format!("v:{i},a:{i},name:{}", rung.name))
            .collect::<Vec<_>>()
            .join(" ");

        args.extend(["-g".into(), gop.clone(), "-keyint_min".into(), gop]);
        args.extend(strings(["-sc_threshold", "0"]));
        args.extend(strings(["-f", "hls"]));
        args.extend(["-hls_time".into(), req.segment_duration.to_string()]);
        args.extend(strings(["-hls_playlist_type", "vod"]));
        args.extend(strings(["-hls_flags", "independent_segments"]));
        args.extend(strings(["-start_number", "0"]));
        args.extend([
            "-hls_segment_filename".into(),
            path_arg(&dir.join("stream_%v_%03d.ts")),
        ]);
        args.extend(["-master_pl_name".into(), master]);
        args.extend(["-var_stream_map".into(), var_stream_map]);
        args.push(path_arg(&dir.join("stream_%v.m3u8")));
        Ok(args)
    }

    fn audio_args(&self, stream: Option<usize>) -> Vec<String> {
        let suffix = stream.map(|i| format!(":{i}")).unwrap_or_default();
        vec![
            format!("-c:a{suffix}"),
            "aac".into(),
            format!("-b:a{suffix}"),
            self.settings.audio_bitrate.clone(),
            format!("-ac{suffix}"),
            self.settings.audio_channels.to_string(),
        ]
    }
}

fn dash_args(req: &ProfileRequest<'_>) -> Vec<String> {
    let seg = req.segment_duration.to_string();
    let mut args = strings(["-y", "-i"]);
    args.push(path_arg(req.input));
    args.extend(strings(["-map", "0:v:0", "-map", "0:a:0"]));
    args.extend(strings(["-c:v", "libx264", "-c:a", "aac"]));
    args.extend(strings(["-f", "dash", "-use_timeline", "1", "-use_template", "1"]));
    args.extend(["-seg_duration".into(), seg.clone(), "-frag_duration".into(), seg]);
    args.extend(strings(["-window_size", "5"]));
    args.extend(strings(["-adaptation_sets", "id=0,streams=v id=1,streams=a"]));
    args.extend(strings(["-init_seg_name", "init-stream$RepresentationID$.$ext$"]));
    args.extend(strings([
        "-media_seg_name",
        "chunk-stream$RepresentationID$-$Number%05d$.$ext$",
    ]));
    args.push(path_arg(req.output));
    args
}

fn rtsp_args(input: &Path, publish_url: &str) -> Vec<String> {
    let mut args = strings(["-re", "-stream_loop", "-1", "-i"]);
    args.push(path_arg(input));
    args.extend(strings(["-c:v", "libx264", "-preset", "veryfast", "-tune", "zerolatency"]));
    args.extend(strings(["-f", "rtsp"]));
    args.push(publish_url.to_string());
    args
}

fn strings<const N: usize>(items: [&str; N]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "playlist".to_string())
}
