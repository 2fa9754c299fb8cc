//! External media tools
//!
//! The frame extractor (`ffmpeg`) and the probe (`ffprobe`) are the only places the
//! pipeline looks at raw process output. Everything above [`ToolInvoker`] sees typed
//! values.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use crate::error::PipelineError;

const FFMPEG: &str = "ffmpeg";
const FFPROBE: &str = "ffprobe";

/// One still frame to extract.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRequest {
    pub source: PathBuf,
    pub offset_seconds: f64,
    /// ffmpeg `-q:v` (1 = best, 31 = worst).
    pub quality: u8,
    pub destination: PathBuf,
}

#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Run the frame extractor. A successful exit does not prove a frame was written;
    /// callers check the destination file.
    async fn extract_frame(&self, request: &FrameRequest) -> Result<(), PipelineError>;

    async fn probe_duration(&self, source: &Path) -> Result<f64, PipelineError>;

    async fn probe_width(&self, source: &Path) -> Result<u32, PipelineError>;

    async fn probe_height(&self, source: &Path) -> Result<u32, PipelineError>;
}

/// Reject tool paths carrying shell metacharacters or traversal.
fn validate_tool_path(path: &str) -> Result<(), PipelineError> {
    let dangerous_chars = [';', '|', '&', '$', '`', '(', ')', '<', '>', '\n', '\r', ' '];
    if path.is_empty() || path.chars().any(|c| dangerous_chars.contains(&c)) {
        return Err(PipelineError::tool(
            "config",
            format!("tool path contains unsafe characters: {:?}", path),
        ));
    }
    if path.contains("..") {
        return Err(PipelineError::tool(
            "config",
            format!("tool path contains directory traversal: {}", path),
        ));
    }
    Ok(())
}

/// Parse a probe's duration output (seconds, possibly fractional).
pub fn parse_duration_output(stdout: &str) -> Option<f64> {
    let value = stdout.lines().next()?.trim().parse::<f64>().ok()?;
    (value.is_finite() && value >= 0.0).then_some(value)
}

/// Parse a probe's width/height output. Zero is treated as unparseable.
pub fn parse_dimension_output(stdout: &str) -> Option<u32> {
    let value = stdout
        .lines()
        .next()?
        .trim()
        .trim_end_matches(',')
        .parse::<u32>()
        .ok()?;
    (value > 0).then_some(value)
}

/// [`ToolInvoker`] backed by the ffmpeg/ffprobe binaries.
#[derive(Debug, Clone)]
pub struct FfmpegToolInvoker {
    ffmpeg_path: String,
    ffprobe_path: String,
}

impl FfmpegToolInvoker {
    pub fn new(
        ffmpeg_path: impl Into<String>,
        ffprobe_path: impl Into<String>,
    ) -> Result<Self, PipelineError> {
        let ffmpeg_path = ffmpeg_path.into();
        let ffprobe_path = ffprobe_path.into();
        validate_tool_path(&ffmpeg_path)?;
        validate_tool_path(&ffprobe_path)?;
        Ok(Self {
            ffmpeg_path,
            ffprobe_path,
        })
    }

    /// Run a command to completion and return stdout.
    ///
    /// `kill_on_drop` ties the child to the future, so a queue timeout that drops the
    /// attempt also kills the process.
    async fn run(tool: &'static str, mut command: Command) -> Result<String, PipelineError> {
        let start = std::time::Instant::now();
        let output = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| PipelineError::tool(tool, format!("failed to spawn: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::tool(
                tool,
                format!("{}: {}", output.status, stderr.trim()),
            ));
        }

        tracing::debug!(
            tool = tool,
            duration_ms = start.elapsed().as_millis() as u64,
            "External tool finished"
        );

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn probe_entry(&self, source: &Path, entry: &str, stream: bool) -> Result<String, PipelineError> {
        let mut command = Command::new(&self.ffprobe_path);
        command.args(["-v", "error"]);
        if stream {
            command.args(["-select_streams", "v:0"]);
        }
        command
            .args(["-show_entries", entry])
            .args(["-of", "default=noprint_wrappers=1:nokey=1"])
            .arg(source);
        Self::run(FFPROBE, command).await
    }
}

#[async_trait]
impl ToolInvoker for FfmpegToolInvoker {
    #[tracing::instrument(skip(self, request), fields(
        process.executable.name = "ffmpeg",
        source = %request.source.display(),
        offset_seconds = request.offset_seconds
    ))]
    async fn extract_frame(&self, request: &FrameRequest) -> Result<(), PipelineError> {
        let mut command = Command::new(&self.ffmpeg_path);
        command
            .args(["-hide_banner", "-loglevel", "error"])
            .args(["-ss", &format!("{:.3}", request.offset_seconds)])
            .arg("-i")
            .arg(&request.source)
            .args(["-vframes", "1"])
            .args(["-q:v", &request.quality.to_string()])
            .arg("-y")
            .arg(&request.destination);
        Self::run(FFMPEG, command).await.map(|_| ())
    }

    #[tracing::instrument(skip(self), fields(process.executable.name = "ffprobe"))]
    async fn probe_duration(&self, source: &Path) -> Result<f64, PipelineError> {
        let stdout = self.probe_entry(source, "format=duration", false).await?;
        parse_duration_output(&stdout)
            .ok_or_else(|| PipelineError::tool(FFPROBE, format!("unparseable duration {:?}", stdout.trim())))
    }

    #[tracing::instrument(skip(self), fields(process.executable.name = "ffprobe"))]
    async fn probe_width(&self, source: &Path) -> Result<u32, PipelineError> {
        let stdout = self.probe_entry(source, "stream=width", true).await?;
        parse_dimension_output(&stdout)
            .ok_or_else(|| PipelineError::tool(FFPROBE, format!("unparseable width {:?}", stdout.trim())))
    }

    #[tracing::instrument(skip(self), fields(process.executable.name = "ffprobe"))]
    async fn probe_height(&self, source: &Path) -> Result<u32, PipelineError> {
        let stdout = self.probe_entry(source, "stream=height", true).await?;
        parse_dimension_output(&stdout)
            .ok_or_else(|| PipelineError::tool(FFPROBE, format!("unparseable height {:?}", stdout.trim())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_duration() {
        assert_eq!(parse_duration_output("12.480000\n"), Some(12.48));
        assert_eq!(parse_duration_output("N/A\n"), None);
        assert_eq!(parse_duration_output(""), None);
        assert_eq!(parse_duration_output("-1.0"), None);
    }

    #[test]
    fn parses_dimensions() {
        assert_eq!(parse_dimension_output("1920\n"), Some(1920));
        assert_eq!(parse_dimension_output("1080,\n"), Some(1080));
        assert_eq!(parse_dimension_output("0"), None);
        assert_eq!(parse_dimension_output("wide"), None);
    }

    #[test]
    fn rejects_unsafe_tool_paths() {
        assert!(FfmpegToolInvoker::new("ffmpeg", "ffprobe").is_ok());
        assert!(FfmpegToolInvoker::new("/usr/bin/ffmpeg", "/usr/bin/ffprobe").is_ok());
        assert!(FfmpegToolInvoker::new("ffmpeg; rm -rf /", "ffprobe").is_err());
        assert!(FfmpegToolInvoker::new("ffmpeg", "../ffprobe").is_err());
        assert!(FfmpegToolInvoker::new("", "ffprobe").is_err());
    }

    #[tokio::test]
    async fn missing_binary_is_a_tool_failure() {
        let tools =
            FfmpegToolInvoker::new("/nonexistent/ffmpeg-bin", "/nonexistent/ffprobe-bin").unwrap();
        let err = tools.probe_duration(Path::new("clip.mp4")).await.unwrap_err();
        assert!(matches!(err, PipelineError::ToolInvocationFailed { tool: "ffprobe", .. }));
    }
}
