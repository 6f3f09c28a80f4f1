//! Seam over the external media tool (ffprobe/ffmpeg).
//!
//! Everything that touches a media file's contents goes through
//! [`MediaTool`], so scans and processors can run against a fake in tests.

mod ffmpeg;
mod retry;

pub use ffmpeg::FfmpegTool;
pub use retry::RetryPolicy;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{tool} is not installed or not executable")]
    NotFound { tool: String },

    #[error("{tool} timed out after {secs}s")]
    Timeout { tool: String, secs: u64 },

    #[error("{tool} failed: {stderr}")]
    Failed { tool: String, stderr: String },

    #[error("Invalid output: {0}")]
    InvalidOutput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, ToolError::NotFound { .. })
    }
}

/// Raw probe output, shaped like `ffprobe -print_format json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeReport {
    pub format: ProbeFormat,
    pub streams: Vec<ProbeStream>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeFormat {
    pub format_name: Option<String>,
    pub duration: Option<String>,
    pub bit_rate: Option<String>,
    pub size: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeStream {
    pub codec_type: Option<String>,
    pub codec_name: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub r_frame_rate: Option<String>,
    pub avg_frame_rate: Option<String>,
    pub bit_rate: Option<String>,
    pub sample_rate: Option<String>,
    pub channels: Option<i64>,
    pub duration: Option<String>,
}

impl ProbeReport {
    pub fn video_stream(&self) -> Option<&ProbeStream> {
        self.streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video"))
    }

    pub fn audio_stream(&self) -> Option<&ProbeStream> {
        self.streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("audio"))
    }
}

/// A single still extracted at `offset_secs`, letterboxed to `width`x`height`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameRequest {
    pub offset_secs: f64,
    pub width: u32,
    pub height: u32,
}

/// Frames decoded at a fixed rate and scaled to `width`x`height`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSampling {
    pub fps: f64,
    pub width: u32,
    pub height: u32,
}

/// 8-bit grayscale frame in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct GrayFrame {
    pub width: u32,
    pub height: u32,
    pub timestamp_secs: f64,
    pub pixels: Vec<u8>,
}

impl GrayFrame {
    pub fn new(width: u32, height: u32, timestamp_secs: f64, pixels: Vec<u8>) -> Self {
        debug_assert_eq!(pixels.len(), (width * height) as usize);
        Self {
            width,
            height,
            timestamp_secs,
            pixels,
        }
    }

    pub fn filled(width: u32, height: u32, timestamp_secs: f64, value: u8) -> Self {
        Self::new(
            width,
            height,
            timestamp_secs,
            vec![value; (width * height) as usize],
        )
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.pixels[(y * self.width + x) as usize]
    }
}

#[async_trait]
pub trait MediaTool: Send + Sync {
    /// Describe the container and streams of `path`.
    async fn probe(&self, path: &Path) -> Result<ProbeReport, ToolError>;

    /// Write one JPEG frame of `input` to `output`.
    async fn extract_frame(
        &self,
        input: &Path,
        output: &Path,
        request: FrameRequest,
    ) -> Result<(), ToolError>;

    /// Decode `input` into grayscale frames.
    async fn sample_frames(
        &self,
        input: &Path,
        sampling: FrameSampling,
    ) -> Result<Vec<GrayFrame>, ToolError>;
}
