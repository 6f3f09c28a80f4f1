//! [`MediaTool`] backed by the `ffprobe` and `ffmpeg` binaries.

use super::{FrameRequest, FrameSampling, GrayFrame, MediaTool, ProbeReport, ToolError};
use crate::config::ToolSettings;
use async_trait::async_trait;
use std::ffi::OsStr;
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct FfmpegTool {
    ffprobe_path: String,
    ffmpeg_path: String,
    timeout: Duration,
    analysis_timeout: Duration,
}

impl FfmpegTool {
    pub fn new(settings: &ToolSettings) -> Self {
        Self {
            ffprobe_path: settings.ffprobe_path.clone(),
            ffmpeg_path: settings.ffmpeg_path.clone(),
            timeout: settings.timeout(),
            analysis_timeout: settings.analysis_timeout(),
        }
    }

    /// Runs `program` to completion, killing it if `limit` expires first.
    async fn run<I, S>(program: &str, args: I, limit: Duration) -> Result<Output, ToolError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(limit, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ToolError::NotFound {
                    tool: program.to_string(),
                })
            }
            Ok(Err(e)) => return Err(ToolError::Io(e)),
            Err(_) => {
                return Err(ToolError::Timeout {
                    tool: program.to_string(),
                    secs: limit.as_secs(),
                })
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ToolError::Failed {
                tool: program.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }
        Ok(output)
    }
}

fn thumbnail_filter(width: u32, height: u32) -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,format=yuvj420p",
        w = width,
        h = height
    )
}

fn sampling_filter(sampling: &FrameSampling) -> String {
    format!(
        "fps={},scale={}:{},format=gray",
        sampling.fps, sampling.width, sampling.height
    )
}

/// Splits raw `gray` video output into frames, dropping a trailing partial one.
fn split_gray_frames(raw: &[u8], sampling: &FrameSampling) -> Vec<GrayFrame> {
    let frame_len = (sampling.width * sampling.height) as usize;
    if frame_len == 0 {
        return Vec::new();
    }
    raw.chunks_exact(frame_len)
        .enumerate()
        .map(|(i, chunk)| {
            GrayFrame::new(
                sampling.width,
                sampling.height,
                i as f64 / sampling.fps,
                chunk.to_vec(),
            )
        })
        .collect()
}

#[async_trait]
impl MediaTool for FfmpegTool {
    async fn probe(&self, path: &Path) -> Result<ProbeReport, ToolError> {
        let args: Vec<&OsStr> = vec![
            OsStr::new("-v"),
            OsStr::new("quiet"),
            OsStr::new("-print_format"),
            OsStr::new("json"),
            OsStr::new("-show_format"),
            OsStr::new("-show_streams"),
            path.as_os_str(),
        ];
        let output = Self::run(&self.ffprobe_path, args, self.timeout).await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Err(ToolError::InvalidOutput("ffprobe produced no output".to_string()));
        }
        serde_json::from_str(&stdout)
            .map_err(|e| ToolError::InvalidOutput(format!("JSON parse error: {}", e)))
    }

    async fn extract_frame(
        &self,
        input: &Path,
        output: &Path,
        request: FrameRequest,
    ) -> Result<(), ToolError> {
        let offset = format!("{:.3}", request.offset_secs.max(0.0));
        let filter = thumbnail_filter(request.width, request.height);
        let args: Vec<&OsStr> = vec![
            OsStr::new("-v"),
            OsStr::new("error"),
            OsStr::new("-ss"),
            OsStr::new(&offset),
            OsStr::new("-i"),
            input.as_os_str(),
            OsStr::new("-vf"),
            OsStr::new(&filter),
            OsStr::new("-frames:v"),
            OsStr::new("1"),
            OsStr::new("-q:v"),
            OsStr::new("2"),
            OsStr::new("-y"),
            output.as_os_str(),
        ];
        debug!("Extracting frame at {}s from {:?}", offset, input);
        Self::run(&self.ffmpeg_path, args, self.timeout).await?;
        Ok(())
    }

    async fn sample_frames(
        &self,
        input: &Path,
        sampling: FrameSampling,
    ) -> Result<Vec<GrayFrame>, ToolError> {
        if sampling.fps <= 0.0 {
            return Err(ToolError::InvalidOutput(format!(
                "Sampling rate must be positive, got {}",
                sampling.fps
            )));
        }
        let filter = sampling_filter(&sampling);
        let args: Vec<&OsStr> = vec![
            OsStr::new("-v"),
            OsStr::new("error"),
            OsStr::new("-i"),
            input.as_os_str(),
            OsStr::new("-vf"),
            OsStr::new(&filter),
            OsStr::new("-f"),
            OsStr::new("rawvideo"),
            OsStr::new("-pix_fmt"),
            OsStr::new("gray"),
            OsStr::new("-"),
        ];
        let output = Self::run(&self.ffmpeg_path, args, self.analysis_timeout).await?;
        let frames = split_gray_frames(&output.stdout, &sampling);
        debug!("Sampled {} frames from {:?}", frames.len(), input);
        Ok(frames)
    }
}
