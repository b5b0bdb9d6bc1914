//! # packsound-av
//!
//! External process plumbing for the packsound pipeline.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`check_tools`], [`require_tool`]) -- locate yt-dlp
//!   and ffmpeg and report their versions.
//! - **Command execution** ([`ToolCommand`]) -- async builder with timeout
//!   support for bounded invocations.
//! - **Extraction** ([`ytdlp`]) -- yt-dlp arguments, JSON parsing, output
//!   validation and stderr classification.
//! - **Transcoding** ([`ffmpeg`]) -- ffmpeg arguments and a streaming child
//!   whose stdout is exposed as a [`ByteStream`].

pub mod command;
pub mod ffmpeg;
pub mod tools;
pub mod ytdlp;

// ---- Re-exports for convenience ----

pub use command::{ToolCommand, ToolOutput};
pub use ffmpeg::{spawn_transcode, transcode_args, ByteStream};
pub use tools::{check_tool, check_tools, get_tool_path, require_tool, ToolInfo};
pub use ytdlp::{classify_failure, ParsedInfo, YtDlpInfo};
