mod types;

pub use types::*;

use anyhow::{Context, Result};
use packsound_common::TargetFormat;
use std::path::{Path, PathBuf};

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    apply_env_overrides(&mut config)?;
    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    // Try default locations
    let default_paths = [
        "./config.toml",
        "./packsound.toml",
        "~/.config/packsound/config.toml",
        "/etc/packsound/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    // Return default config if no file found
    let mut config = Config::default();
    apply_env_overrides(&mut config)?;
    validate_config(&config)?;
    Ok(config)
}

/// Apply the deployment environment variables on top of file values.
pub fn apply_env_overrides(config: &mut Config) -> Result<()> {
    apply_overrides_from(config, |key| std::env::var(key).ok())
}

/// Apply overrides from an arbitrary variable source.
pub fn apply_overrides_from<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(host) = get("HOST") {
        config.server.host = host;
    }
    if let Some(port) = get("PORT") {
        config.server.port = port
            .trim()
            .parse()
            .with_context(|| format!("Invalid PORT: {port:?}"))?;
    }
    if let Some(path) = get("FFMPEG_PATH") {
        config.tools.ffmpeg_path = Some(PathBuf::from(path));
    }
    if let Some(path) = get("YTDLP_PATH") {
        config.tools.ytdlp_path = Some(PathBuf::from(path));
    }
    if let Some(dir) = get("DATA_FOLDER") {
        config.cache.dir = PathBuf::from(shellexpand::tilde(&dir).as_ref());
    }
    if let Some(secs) = get("DATA_CACHE_CLEANUP_INTERVAL") {
        config.cache.sweep_interval_secs = secs
            .trim()
            .parse()
            .with_context(|| format!("Invalid DATA_CACHE_CLEANUP_INTERVAL: {secs:?}"))?;
    }
    if let Some(secs) = get("DATA_CACHE_CLEANUP_AFTER") {
        config.cache.max_idle_secs = secs
            .trim()
            .parse()
            .with_context(|| format!("Invalid DATA_CACHE_CLEANUP_AFTER: {secs:?}"))?;
    }

    Ok(())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    if config.cache.dir.as_os_str().is_empty() {
        anyhow::bail!("Cache directory cannot be empty");
    }

    if config.extract.format.trim().is_empty() {
        anyhow::bail!("Extract format selector cannot be empty");
    }
    if config.extract.timeout_secs == 0 {
        anyhow::bail!("Extract timeout cannot be 0");
    }

    if config.transcode.sample_rate == 0 {
        anyhow::bail!("Transcode sample rate cannot be 0");
    }
    if !(1..=2).contains(&config.transcode.channels) {
        anyhow::bail!(
            "Transcode channels must be 1 or 2, got {}",
            config.transcode.channels
        );
    }
    if config.transcode.format == TargetFormat::Dfpwm && config.transcode.channels != 1 {
        anyhow::bail!("DFPWM output is mono only");
    }
    if config.transcode.timeout_secs == 0 {
        anyhow::bail!("Transcode timeout cannot be 0");
    }

    if config.streaming.chunk_size == 0 {
        anyhow::bail!("Streaming chunk size cannot be 0");
    }
    if config.streaming.tail_poll_ms == 0 {
        anyhow::bail!("Streaming tail poll interval cannot be 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        validate_config(&config).unwrap();
        assert_eq!(config.streaming.chunk_size, 4096);
        assert_eq!(config.cache.max_idle_secs, 3600);
        assert_eq!(config.cache.sweep_interval_secs, 300);
        assert_eq!(config.transcode.format, TargetFormat::Dfpwm);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 9000

            [transcode]
            format = "ogg"
            channels = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.transcode.format, TargetFormat::Ogg);
        assert_eq!(config.transcode.sample_rate, 48_000);
        validate_config(&config).unwrap();
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("HOST", "127.0.0.1"),
            ("PORT", "5000"),
            ("FFMPEG_PATH", "/opt/ffmpeg"),
            ("DATA_FOLDER", "/var/cache/packsound"),
            ("DATA_CACHE_CLEANUP_INTERVAL", "60"),
            ("DATA_CACHE_CLEANUP_AFTER", "120"),
            ("YTDLP_PATH", ""),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        apply_overrides_from(&mut config, |k| vars.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.tools.ffmpeg_path, Some(PathBuf::from("/opt/ffmpeg")));
        assert_eq!(config.tools.ytdlp_path, None);
        assert_eq!(config.cache.dir, PathBuf::from("/var/cache/packsound"));
        assert_eq!(config.cache.sweep_interval_secs, 60);
        assert_eq!(config.cache.max_idle_secs, 120);
    }

    #[test]
    fn bad_port_override_is_an_error() {
        let mut config = Config::default();
        let err = apply_overrides_from(&mut config, |k| (k == "PORT").then(|| "http".into()))
            .unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn stereo_dfpwm_rejected() {
        let mut config = Config::default();
        config.transcode.channels = 2;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn zero_chunk_size_rejected() {
        let mut config = Config::default();
        config.streaming.chunk_size = 0;
        assert!(validate_config(&config).is_err());
    }
}
