//! ffmpeg argument building and the streaming transcode child.
//!
//! Unlike [`crate::ToolCommand`], the transcode child is never waited on as a
//! whole: stdout is yielded chunk by chunk as ffmpeg produces it, so the cache
//! can publish bytes to tailing readers while the transcode is still running.

use std::io;
use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use packsound_common::{AudioSpec, ExtractedStream, TargetFormat};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;

/// Boxed stream of transcoded output chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + 'static>>;

/// Upper bound on retained stderr, in bytes.
const STDERR_LIMIT: usize = 16 * 1024;

/// Output arguments for a target format (everything between `-vn` and the
/// output path).
pub fn format_args(spec: &AudioSpec) -> Vec<String> {
    let mut args = vec![
        "-ac".to_string(),
        spec.channels.to_string(),
        "-ar".to_string(),
        spec.sample_rate.to_string(),
    ];
    match spec.format {
        TargetFormat::Dfpwm => {
            args.extend(["-c:a", "dfpwm", "-f", "dfpwm"].map(String::from));
        }
        TargetFormat::Ogg => {
            args.extend(["-c:a", "libvorbis", "-q:a", "3", "-f", "ogg"].map(String::from));
        }
        TargetFormat::Mp3 => {
            args.extend(["-c:a", "libmp3lame", "-q:a", "5", "-f", "mp3"].map(String::from));
        }
    }
    args
}

/// Full ffmpeg argument list reading `stream.url` and writing to stdout.
pub fn transcode_args(stream: &ExtractedStream, spec: &AudioSpec) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-nostdin"]
        .map(String::from)
        .to_vec();

    if !stream.http_headers.is_empty() {
        // ffmpeg expects CRLF-terminated header lines in a single argument.
        let headers: String = stream
            .http_headers
            .iter()
            .map(|(k, v)| format!("{k}: {v}\r\n"))
            .collect();
        args.push("-headers".to_string());
        args.push(headers);
    }

    args.push("-i".to_string());
    args.push(stream.url.clone());
    args.push("-vn".to_string());
    args.extend(format_args(spec));
    args.push("pipe:1".to_string());
    args
}

/// Spawn ffmpeg and stream its stdout.
///
/// The child is killed if the returned stream is dropped before it finishes.
/// A non-zero exit surfaces as a final `Err` item after all output.
///
/// # Errors
///
/// Returns the spawn error if the process cannot be started.
pub fn spawn_transcode(program: &Path, args: &[String]) -> io::Result<ByteStream> {
    tracing::debug!(program = %program.display(), ?args, "spawning ffmpeg");

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("ffmpeg stdout not captured"))?;
    let stderr = child.stderr.take();

    // Drain stderr concurrently so a chatty ffmpeg never blocks on a full pipe.
    let stderr_task = tokio::spawn(async move {
        let mut collected = Vec::new();
        if let Some(mut stderr) = stderr {
            let mut buf = [0u8; 4096];
            loop {
                match stderr.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        collected.extend_from_slice(&buf[..n]);
                        if collected.len() > STDERR_LIMIT {
                            let cut = collected.len() - STDERR_LIMIT;
                            collected.drain(..cut);
                        }
                    }
                }
            }
        }
        String::from_utf8_lossy(&collected).to_string()
    });

    Ok(Box::pin(child_output(child, stdout, stderr_task)))
}

fn child_output(
    mut child: Child,
    stdout: ChildStdout,
    stderr_task: JoinHandle<String>,
) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    async_stream::try_stream! {
        let mut out = ReaderStream::new(stdout);
        while let Some(chunk) = out.next().await {
            yield chunk?;
        }

        let status = child.wait().await?;
        let stderr = stderr_task.await.unwrap_or_default();
        if !status.success() {
            tracing::warn!(
                status = ?status.code(),
                stderr = %crate::ytdlp::stderr_excerpt(&stderr),
                "ffmpeg exited with failure"
            );
            Err::<(), _>(io::Error::other(format!("ffmpeg exited with {status}")))?;
        } else if !stderr.trim().is_empty() {
            tracing::debug!(stderr = %crate::ytdlp::stderr_excerpt(&stderr), "ffmpeg diagnostics");
        }
    }
}
