mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./config.toml",
        "./castforge.toml",
        "~/.config/castforge/config.toml",
        "/etc/castforge/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    if !config.server.static_url_prefix.starts_with('/') {
        anyhow::bail!(
            "static_url_prefix must start with '/': {:?}",
            config.server.static_url_prefix
        );
    }

    if config.conversion.max_concurrent == 0 {
        anyhow::bail!("conversion.max_concurrent must be at least 1");
    }

    if config.conversion.default_segment_duration == 0 {
        anyhow::bail!("conversion.default_segment_duration must be positive");
    }

    if config.conversion.hls_ladder.is_empty() {
        anyhow::bail!("conversion.hls_ladder needs at least one rendition");
    }

    for rung in &config.conversion.hls_ladder {
        if rung.name.is_empty() || rung.width == 0 || rung.height == 0 {
            anyhow::bail!("Invalid HLS rendition: {:?}", rung);
        }
    }

    if config.rtsp.port == 0 {
        anyhow::bail!("RTSP port cannot be 0");
    }

    if !config.server.media_root.starts_with(&config.server.static_dir) {
        tracing::warn!(
            "media_root {:?} is outside static_dir {:?}; outputs will be served through the chunk endpoint",
            config.server.media_root,
            config.server.static_dir
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        validate_config(&config).unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.rtsp.port, 8554);
        assert_eq!(config.conversion.default_segment_duration, 6);
        assert_eq!(config.conversion.hls_ladder.len(), 3);
    }

    #[test]
    fn parses_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 9000

[conversion]
max_concurrent = 2
transcode_timeout_secs = 3600

[[conversion.hls_ladder]]
name = "360p"
width = 640
height = 360
video_bitrate = "800k"
maxrate = "856k"
bufsize = "1200k"

[rtsp]
public_host = "media.example.com"
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.conversion.max_concurrent, 2);
        assert_eq!(
            config.conversion.transcode_timeout(),
            Some(std::time::Duration::from_secs(3600))
        );
        assert_eq!(config.conversion.hls_ladder.len(), 1);
        assert_eq!(config.conversion.hls_ladder[0].name, "360p");
        assert_eq!(config.rtsp.public_host, "media.example.com");
        assert_eq!(config.rtsp.port, 8554);
    }

    #[test]
    fn rejects_zero_concurrency() {
        let mut config = Config::default();
        config.conversion.max_concurrent = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_empty_ladder() {
        let mut config = Config::default();
        config.conversion.hls_ladder.clear();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_zero_ports() {
        let mut config = Config::default();
        config.rtsp.port = 0;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.server.port = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn missing_file_is_error() {
        assert!(load_config(Path::new("/nonexistent/castforge.toml")).is_err());
    }
}
