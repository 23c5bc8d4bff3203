use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "castforge")]
#[command(author, version, about = "Convert uploaded video to HLS, DASH or RTSP streams")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the upload and streaming server
    Start {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Convert a single file in the foreground
    Convert {
        /// Input video file
        #[arg(required = true)]
        input: PathBuf,

        /// Media format: hls, dash or raw
        #[arg(short, long, default_value = "hls")]
        format: String,

        /// Streaming protocol: hls, dash or rtsp
        #[arg(long, default_value = "hls")]
        protocol: String,

        /// Output manifest path (defaults to the media root layout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Segment duration in seconds
        #[arg(long)]
        segment_duration: Option<u32>,

        /// RTSP stream id (defaults to the task id)
        #[arg(long)]
        stream_id: Option<String>,

        /// Encode the full HLS rendition ladder
        #[arg(long)]
        adaptive: bool,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
