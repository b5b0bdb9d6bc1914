//! yt-dlp invocation, JSON parsing and failure classification.
//!
//! The JSON yt-dlp prints with `-J` is treated as untrusted input: only the
//! fields below are read, and [`validate`] decides whether the result is
//! something the transcoder can be pointed at.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use packsound_common::{CanonicalId, ExtractedStream, MediaError, SourceInfo};
use serde::Deserialize;

use crate::command::ToolCommand;

/// Subset of the yt-dlp info dict that extraction relies on.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct YtDlpInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub uploader: Option<String>,
    /// Direct stream URL of the selected format, or the page URL of a flat
    /// playlist entry.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub ext: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub filesize: Option<u64>,
    #[serde(default)]
    pub filesize_approx: Option<u64>,
    #[serde(default)]
    pub is_live: Option<bool>,
    #[serde(default)]
    pub live_status: Option<String>,
    #[serde(default)]
    pub http_headers: BTreeMap<String, String>,
    /// Present when a format selector picked several formats to merge.
    #[serde(default)]
    pub requested_formats: Vec<YtDlpFormat>,
    #[serde(rename = "_type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub entries: Vec<YtDlpInfo>,
}

/// One entry of `requested_formats`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct YtDlpFormat {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub ext: Option<String>,
    #[serde(default)]
    pub vcodec: Option<String>,
    #[serde(default)]
    pub filesize: Option<u64>,
    #[serde(default)]
    pub filesize_approx: Option<u64>,
    #[serde(default)]
    pub http_headers: BTreeMap<String, String>,
}

/// yt-dlp output reduced to the item to play.
#[derive(Debug, Clone, Default)]
pub struct ParsedInfo {
    pub info: YtDlpInfo,
    /// Ids of the playlist items after `info`, in playlist order.
    pub rest: Vec<CanonicalId>,
}

impl YtDlpInfo {
    /// Locator to re-extract a flat playlist entry with.
    pub fn flat_locator(&self) -> Option<&str> {
        match self.kind.as_deref() {
            Some("url") | Some("url_transparent") => self.url.as_deref().or(self.id.as_deref()),
            _ => None,
        }
    }

    fn is_livestream(&self) -> bool {
        self.is_live == Some(true)
            || matches!(
                self.live_status.as_deref(),
                Some("is_live") | Some("is_upcoming")
            )
    }
}

/// Build the yt-dlp argument list for a locator.
pub fn extract_args(locator: &str, format: &str) -> Vec<String> {
    vec![
        "-J".to_string(),
        "--no-playlist".to_string(),
        "--flat-playlist".to_string(),
        "--no-warnings".to_string(),
        "-f".to_string(),
        format.to_string(),
        "--default-search".to_string(),
        "ytsearch".to_string(),
        "--".to_string(),
        locator.to_string(),
    ]
}

/// Parse yt-dlp JSON output, flattening a playlist or search result to its
/// first entry and keeping the ids of the rest.
pub fn parse_info(json: &str) -> Result<ParsedInfo, MediaError> {
    let info: YtDlpInfo = serde_json::from_str(json).map_err(|e| {
        tracing::warn!(error = %e, "yt-dlp produced unparseable JSON");
        MediaError::SourceUnavailable
    })?;

    if info.kind.as_deref() == Some("playlist") || (info.url.is_none() && !info.entries.is_empty())
    {
        let mut entries = info.entries.into_iter();
        let first = entries.next().ok_or(MediaError::SourceUnavailable)?;
        let rest = entries
            .filter_map(|entry| entry.id.as_deref().and_then(CanonicalId::parse))
            .collect();
        return Ok(ParsedInfo { info: first, rest });
    }
    Ok(ParsedInfo {
        info,
        rest: Vec::new(),
    })
}

/// Check a parsed info dict and turn it into an [`ExtractedStream`].
pub fn validate(info: YtDlpInfo) -> Result<ExtractedStream, MediaError> {
    if info.is_livestream() {
        tracing::debug!(id = ?info.id, "rejecting livestream");
        return Err(MediaError::UnsupportedFormat);
    }

    // Prefer the top-level URL; fall back to the audio part of a merge.
    let fallback = info
        .requested_formats
        .iter()
        .find(|f| f.vcodec.as_deref() == Some("none"))
        .or_else(|| info.requested_formats.first());

    let (url, headers, ext, size) = match info.url.as_deref() {
        Some(url) if !url.is_empty() => (
            url.to_string(),
            info.http_headers.clone(),
            info.ext.clone(),
            info.filesize.or(info.filesize_approx),
        ),
        _ => match fallback.and_then(|f| f.url.as_deref().map(|u| (f, u))) {
            Some((f, url)) if !url.is_empty() => (
                url.to_string(),
                if f.http_headers.is_empty() {
                    info.http_headers.clone()
                } else {
                    f.http_headers.clone()
                },
                f.ext.clone(),
                f.filesize.or(f.filesize_approx),
            ),
            _ => return Err(MediaError::UnsupportedFormat),
        },
    };

    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(MediaError::UnsupportedFormat);
    }

    let duration = info.duration.filter(|d| d.is_finite() && *d > 0.0);
    if duration.is_none() && size.is_none() {
        return Err(MediaError::UnsupportedFormat);
    }

    Ok(ExtractedStream {
        url,
        http_headers: headers.into_iter().collect(),
        size_hint: size,
        source_format: ext,
        info: SourceInfo {
            title: info.title,
            uploader: info.uploader,
            duration_secs: duration,
            playlist: Vec::new(),
        },
    })
}

/// Map yt-dlp stderr from a failed run to a [`MediaError`].
pub fn classify_failure(stderr: &str) -> MediaError {
    let lower = stderr.to_lowercase();

    if lower.contains("http error 429")
        || lower.contains("too many requests")
        || lower.contains("rate limit")
        || lower.contains("rate-limit")
        || lower.contains("sign in to confirm you")
    {
        return MediaError::RateLimited {
            retry_after: parse_retry_after(&lower),
        };
    }

    if lower.contains("unsupported url") {
        return MediaError::UnsupportedFormat;
    }

    MediaError::SourceUnavailable
}

/// Find a "retry after N" hint (seconds) in lowercased stderr.
fn parse_retry_after(lower: &str) -> Option<Duration> {
    let rest = lower
        .find("retry-after")
        .map(|i| &lower[i + "retry-after".len()..])
        .or_else(|| lower.find("retry after").map(|i| &lower[i + "retry after".len()..]))?;
    let digits: String = rest
        .trim_start_matches(|c: char| c == ':' || c.is_whitespace())
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse::<u64>().ok().map(Duration::from_secs)
}

/// Run yt-dlp for a locator and return the validated stream.
///
/// Playlists are listed flat; their first entry is extracted with a second
/// run and the remaining ids are reported in [`SourceInfo::playlist`].
/// Spawn failures and timeouts count as `SourceUnavailable`; stderr is logged
/// and never surfaced.
pub async fn extract(
    program: &Path,
    locator: &str,
    format: &str,
    timeout: Duration,
) -> Result<ExtractedStream, MediaError> {
    let parsed = parse_info(&run(program, locator, format, timeout).await?)?;

    let flat_entry = parsed.info.flat_locator().map(str::to_string);
    let info = match flat_entry {
        Some(entry) => {
            tracing::debug!(
                locator,
                entry = %entry,
                queued = parsed.rest.len(),
                "extracting first playlist entry"
            );
            parse_info(&run(program, &entry, format, timeout).await?)?.info
        }
        None => parsed.info,
    };

    let mut stream = validate(info)?;
    stream.info.playlist = parsed.rest;
    Ok(stream)
}

/// One yt-dlp invocation; returns its stdout.
async fn run(
    program: &Path,
    locator: &str,
    format: &str,
    timeout: Duration,
) -> Result<String, MediaError> {
    let mut cmd = ToolCommand::new(program.to_path_buf());
    cmd.args(extract_args(locator, format)).timeout(timeout);

    tracing::debug!(locator, format, "running yt-dlp");

    let output = cmd.execute().await.map_err(|e| {
        tracing::warn!(locator, error = %e, "yt-dlp did not complete");
        MediaError::SourceUnavailable
    })?;

    if !output.success() {
        let kind = classify_failure(&output.stderr);
        tracing::warn!(
            locator,
            status = ?output.status.code(),
            kind = kind.code(),
            stderr = %stderr_excerpt(&output.stderr),
            "yt-dlp failed"
        );
        return Err(kind);
    }

    Ok(output.stdout)
}

/// Last few lines of stderr, for log fields.
pub(crate) fn stderr_excerpt(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(4);
    lines[start..].join(" | ")
}
