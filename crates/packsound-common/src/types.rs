//! Output formats and descriptive media metadata.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::CanonicalId;
use std::str::FromStr;

/// Container/codec the transcoder produces. One per server instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetFormat {
    /// 1-bit DFPWM, as played by ComputerCraft speakers.
    #[default]
    Dfpwm,
    /// Ogg Vorbis, the resource-pack sound format.
    Ogg,
    /// MPEG-1 Layer III.
    Mp3,
}

impl TargetFormat {
    /// File extension used for cache files.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Dfpwm => "dfpwm",
            Self::Ogg => "ogg",
            Self::Mp3 => "mp3",
        }
    }

    /// MIME type sent in `Content-Type`.
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Dfpwm => "audio/dfpwm",
            Self::Ogg => "audio/ogg",
            Self::Mp3 => "audio/mpeg",
        }
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for TargetFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dfpwm" => Ok(Self::Dfpwm),
            "ogg" | "vorbis" => Ok(Self::Ogg),
            "mp3" => Ok(Self::Mp3),
            other => Err(format!("unknown target format: {other}")),
        }
    }
}

/// Target format plus the audio parameters handed to the transcoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSpec {
    pub format: TargetFormat,
    pub sample_rate: u32,
    pub channels: u8,
}

impl Default for AudioSpec {
    fn default() -> Self {
        // Speaker playback rate on the game side.
        Self {
            format: TargetFormat::Dfpwm,
            sample_rate: 48_000,
            channels: 1,
        }
    }
}

/// Descriptive metadata reported by the extraction backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploader: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    /// Remaining items when the reference named a playlist, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub playlist: Vec<CanonicalId>,
}

/// A playable stream located by the extraction backend.
///
/// Produced only after the backend output has been validated: `url` is a
/// non-empty http(s) locator and at least one of duration or size is known.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedStream {
    /// Direct media URL to hand the transcoder.
    pub url: String,
    /// Headers the upstream requires when fetching `url`.
    pub http_headers: Vec<(String, String)>,
    /// Upstream size in bytes, exact or approximate.
    pub size_hint: Option<u64>,
    /// Upstream container/extension (e.g. `webm`, `m4a`).
    pub source_format: Option<String>,
    pub info: SourceInfo,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_properties() {
        assert_eq!(TargetFormat::Dfpwm.extension(), "dfpwm");
        assert_eq!(TargetFormat::Ogg.content_type(), "audio/ogg");
        assert_eq!(TargetFormat::Mp3.content_type(), "audio/mpeg");
        assert_eq!(TargetFormat::default(), TargetFormat::Dfpwm);
    }

    #[test]
    fn format_from_str() {
        assert_eq!("DFPWM".parse::<TargetFormat>(), Ok(TargetFormat::Dfpwm));
        assert_eq!("vorbis".parse::<TargetFormat>(), Ok(TargetFormat::Ogg));
        assert!("flac".parse::<TargetFormat>().is_err());
    }

    #[test]
    fn format_serde_lowercase() {
        let json = serde_json::to_string(&TargetFormat::Ogg).unwrap();
        assert_eq!(json, "\"ogg\"");
    }
}
