use packsound_common::{AudioSpec, TargetFormat};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub extract: ExtractConfig,

    #[serde(default)]
    pub transcode: TranscodeConfig,

    #[serde(default)]
    pub streaming: StreamingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Directory holding transcoded files and their sidecars
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,

    /// Total size bound over Ready entries in bytes (0 = unbounded)
    #[serde(default = "default_max_total_bytes")]
    pub max_total_bytes: u64,

    /// Evict Ready entries not accessed for this long (0 = never)
    #[serde(default = "default_max_idle_secs")]
    pub max_idle_secs: u64,

    /// How often the sweeper runs (0 = disabled)
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// How long SourceUnavailable/UnsupportedFormat results are remembered
    #[serde(default = "default_negative_ttl_secs")]
    pub negative_ttl_secs: u64,

    /// Backoff after a rate-limited extraction when the backend gave no hint
    #[serde(default = "default_rate_limit_backoff_secs")]
    pub rate_limit_backoff_secs: u64,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_max_total_bytes() -> u64 {
    2 * 1024 * 1024 * 1024
}

fn default_max_idle_secs() -> u64 {
    3600
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_negative_ttl_secs() -> u64 {
    600
}

fn default_rate_limit_backoff_secs() -> u64 {
    30
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            max_total_bytes: default_max_total_bytes(),
            max_idle_secs: default_max_idle_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            negative_ttl_secs: default_negative_ttl_secs(),
            rate_limit_backoff_secs: default_rate_limit_backoff_secs(),
        }
    }
}

impl CacheConfig {
    pub fn negative_ttl(&self) -> Duration {
        Duration::from_secs(self.negative_ttl_secs)
    }

    pub fn rate_limit_backoff(&self) -> Duration {
        Duration::from_secs(self.rate_limit_backoff_secs)
    }

    /// Idle bound, or `None` when disabled.
    pub fn max_idle(&self) -> Option<Duration> {
        (self.max_idle_secs > 0).then(|| Duration::from_secs(self.max_idle_secs))
    }

    /// Size bound, or `None` when disabled.
    pub fn max_total(&self) -> Option<u64> {
        (self.max_total_bytes > 0).then_some(self.max_total_bytes)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub ytdlp_path: Option<PathBuf>,

    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExtractConfig {
    /// yt-dlp format selector (default: "worstaudio/worst")
    #[serde(default = "default_extract_format")]
    pub format: String,

    /// Maximum time a single yt-dlp run may take
    #[serde(default = "default_extract_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_extract_format() -> String {
    "worstaudio/worst".to_string()
}

fn default_extract_timeout_secs() -> u64 {
    60
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            format: default_extract_format(),
            timeout_secs: default_extract_timeout_secs(),
        }
    }
}

impl ExtractConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TranscodeConfig {
    /// Output format served by this instance (default: dfpwm)
    #[serde(default)]
    pub format: TargetFormat,

    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    #[serde(default = "default_channels")]
    pub channels: u8,

    /// Maximum wall time of one transcode
    #[serde(default = "default_transcode_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_sample_rate() -> u32 {
    48_000
}

fn default_channels() -> u8 {
    1
}

fn default_transcode_timeout_secs() -> u64 {
    900
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            format: TargetFormat::default(),
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            timeout_secs: default_transcode_timeout_secs(),
        }
    }
}

impl TranscodeConfig {
    pub fn audio_spec(&self) -> AudioSpec {
        AudioSpec {
            format: self.format,
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamingConfig {
    /// Block size of the `/chunk` endpoint (default: 4096)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Tailing readers re-check the file at least this often
    #[serde(default = "default_tail_poll_ms")]
    pub tail_poll_ms: u64,
}

fn default_chunk_size() -> u64 {
    16 * 256
}

fn default_tail_poll_ms() -> u64 {
    250
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            tail_poll_ms: default_tail_poll_ms(),
        }
    }
}

impl StreamingConfig {
    pub fn tail_poll(&self) -> Duration {
        Duration::from_millis(self.tail_poll_ms)
    }
}
