//! External tool detection.

use packsound_common::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Information about an external tool.
#[derive(Debug, Clone)]
pub struct ToolInfo {
    /// Name of the tool.
    pub name: String,
    /// Whether the tool is available.
    pub available: bool,
    /// Version string if available.
    pub version: Option<String>,
    /// Path to the tool executable.
    pub path: Option<PathBuf>,
}

/// Locate a tool and ask it for its version.
///
/// `program` may be a bare name (looked up on `PATH`) or a configured path.
///
/// # Example
///
/// ```no_run
/// use packsound_av::check_tool;
///
/// let info = check_tool("yt-dlp", "--version");
/// if info.available {
///     println!("yt-dlp version: {:?}", info.version);
/// }
/// ```
pub fn check_tool(program: &str, version_arg: &str) -> ToolInfo {
    let missing = ToolInfo {
        name: program.to_string(),
        available: false,
        version: None,
        path: None,
    };

    let Ok(path) = which::which(program) else {
        return missing;
    };

    match Command::new(&path).arg(version_arg).output() {
        Ok(output) if output.status.success() => ToolInfo {
            version: String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .map(str::to_string),
            path: Some(path),
            available: true,
            ..missing
        },
        _ => ToolInfo {
            path: Some(path),
            ..missing
        },
    }
}

/// Check the extraction and transcoding backends.
///
/// `ffmpeg` takes `-version`, `yt-dlp` takes `--version`.
pub fn check_tools(ytdlp: &str, ffmpeg: &str) -> Vec<ToolInfo> {
    vec![check_tool(ytdlp, "--version"), check_tool(ffmpeg, "-version")]
}

/// Require that a tool is available, returning its path.
///
/// # Errors
///
/// Returns an error if the tool is not found.
pub fn require_tool(name: &str) -> Result<PathBuf> {
    which::which(name).map_err(|_| Error::tool(name, "not found in PATH"))
}

/// Get the path to a tool, preferring a configured path over PATH lookup.
pub fn get_tool_path(name: &str, config_path: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = config_path {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
    }

    require_tool(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_tool_not_found() {
        let info = check_tool("nonexistent_tool_12345", "--version");
        assert!(!info.available);
        assert!(info.version.is_none());
        assert!(info.path.is_none());
    }

    #[test]
    fn test_require_tool_not_found() {
        let err = require_tool("nonexistent_tool_12345").unwrap_err();
        assert!(matches!(err, Error::Tool { .. }));
    }

    #[test]
    fn test_configured_path_wins() {
        let dir = std::env::temp_dir();
        let path = get_tool_path("nonexistent_tool_12345", Some(&dir)).unwrap();
        assert_eq!(path, dir);
    }
}
