mod cli;

use castforge::{
    config,
    conversion::ConversionDispatcher,
    server,
    state::{ConversionSpec, TaskRegistry},
    streaming,
};
use castforge_av::Transcoder;
use castforge_common::{MediaFormat, Renditions, StreamId, StreamingProtocol, TaskStatus};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::{Path, PathBuf};
use std::sync::Arc;

async fn start_server(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    // Override host/port from CLI if specified
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    config::validate_config(&config)?;

    tracing::info!("Starting castforge server");
    tracing::info!(
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );

    server::start_server(config).await
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "castforge=trace,castforge_av=trace,tower_http=debug".to_string()
        } else {
            "castforge=debug,castforge_av=debug,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::Convert {
            input,
            format,
            protocol,
            output,
            segment_duration,
            stream_id,
            adaptive,
        } => {
            let request = ConvertRequest {
                input,
                format,
                protocol,
                output,
                segment_duration,
                stream_id,
                adaptive,
            };
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(convert_file(request, cli.config.as_deref()))
        }
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("castforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

struct ConvertRequest {
    input: PathBuf,
    format: String,
    protocol: String,
    output: Option<PathBuf>,
    segment_duration: Option<u32>,
    stream_id: Option<String>,
    adaptive: bool,
}

async fn convert_file(request: ConvertRequest, config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;

    if !request.input.exists() {
        anyhow::bail!("Input file does not exist: {:?}", request.input);
    }

    let media_format: MediaFormat = request.format.parse()?;
    let protocol: StreamingProtocol = request.protocol.parse()?;
    let output = match request.output {
        Some(path) => path,
        None => {
            let stem = request
                .input
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .context("Input path has no file name")?;
            streaming::output_path(&config.server.media_root, &stem, media_format)
        }
    };

    let mut spec = ConversionSpec::new(&request.input, &output, media_format, protocol);
    spec.segment_duration = request
        .segment_duration
        .unwrap_or(config.conversion.default_segment_duration);
    spec.stream_id = request.stream_id.map(StreamId::new).transpose()?;
    if request.adaptive {
        spec.renditions = Renditions::Ladder;
    }

    let registry = TaskRegistry::new();
    let dispatcher = ConversionDispatcher::from_config(&config, Arc::clone(&registry));
    let task_id = registry.create(spec)?;

    println!("Converting {} -> {}", request.input.display(), output.display());

    let run = dispatcher.run(task_id);
    tokio::pin!(run);
    tokio::select! {
        _ = &mut run => {}
        _ = server::shutdown_signal() => {
            tracing::warn!(task_id = %task_id, "Interrupted, cancelling conversion");
            tokio::join!(run, dispatcher.shutdown());
        }
    }

    let task = registry.get(task_id)?;
    match task.status {
        TaskStatus::Completed => {
            let url = task.playback_url.unwrap_or_default();
            if protocol.is_live() {
                println!("✓ Streaming at {url} (Ctrl-C to stop)");
                server::shutdown_signal().await;
            } else {
                println!("✓ Conversion complete: {}", output.display());
                println!("  Playback URL: {url}");
            }
            dispatcher.shutdown().await;
            Ok(())
        }
        status => {
            dispatcher.shutdown().await;
            anyhow::bail!(
                "Conversion {}: {}",
                status,
                task.error.unwrap_or_else(|| "no error recorded".to_string())
            )
        }
    }
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = config::load_config_or_default(config_path)?;
    let tool = Transcoder::discover(config.tools.ffmpeg.as_deref()).check();

    let status = if tool.available { "✓" } else { "✗" };
    print!("{} {}", status, tool.name);
    if let Some(ref version) = tool.version {
        print!(" ({})", version.lines().next().unwrap_or(""));
    }
    if let Some(ref path) = tool.path {
        print!(" - {}", path.display());
    }
    println!();

    println!();
    if tool.available {
        println!("All required tools are available!");
    } else {
        println!("ffmpeg is missing. Install it or set tools.ffmpeg in the config.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            config::Config::default()
        }
    };

    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!("  Uploads: {}", config.server.upload_dir.display());
    println!("  Media root: {}", config.server.media_root.display());
    println!(
        "  Conversions: {} concurrent, {}s segments",
        config.conversion.max_concurrent, config.conversion.default_segment_duration
    );
    println!("  HLS ladder: {} renditions", config.conversion.hls_ladder.len());
    println!(
        "  RTSP: {}:{} (public {})",
        config.rtsp.bind_host, config.rtsp.port, config.rtsp.public_host
    );

    Ok(())
}
