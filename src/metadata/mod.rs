//! Metadata prober: turns a media file into a normalized [`MetadataRecord`].
//!
//! Probing never fails outright. When the tool cannot describe the file the
//! record carries a [`ProbeFailure`] and only filesystem facts.

mod format;

pub use format::{format_duration, format_size_mb, parse_frame_rate};

use crate::media_store::ProbedFields;
use crate::media_tool::{MediaTool, ProbeReport, RetryPolicy, ToolError};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

/// Why a file could not be probed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeFailure {
    #[error("file is empty")]
    EmptyFile,

    #[error("file is missing or unreadable: {reason}")]
    Missing { reason: String },

    #[error("{tool} is not available")]
    ToolUnavailable { tool: String },

    #[error("probe timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("probe failed: {message}")]
    ToolFailed { message: String },

    #[error("probe output was unusable: {message}")]
    InvalidOutput { message: String },
}

impl From<ToolError> for ProbeFailure {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::NotFound { tool } => ProbeFailure::ToolUnavailable { tool },
            ToolError::Timeout { secs, .. } => ProbeFailure::Timeout { secs },
            ToolError::Failed { stderr, .. } => ProbeFailure::ToolFailed { message: stderr },
            ToolError::InvalidOutput(message) => ProbeFailure::InvalidOutput { message },
            ToolError::Io(e) => ProbeFailure::ToolFailed {
                message: e.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoInfo {
    pub duration: f64,
    pub duration_formatted: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub fps: f64,
    pub codec: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioInfo {
    pub codec: String,
    pub channels: Option<i64>,
    pub sample_rate: Option<i64>,
}

/// Result of probing one file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetadataRecord {
    pub file_size: u64,
    pub file_size_mb: f64,
    /// Lower-cased file extension.
    pub format: String,
    pub container_format: Option<String>,
    pub bit_rate: Option<i64>,
    pub video: Option<VideoInfo>,
    pub audio: Option<AudioInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<ProbeFailure>,
}

impl MetadataRecord {
    fn fallback(path: &Path, file_size: u64, failure: ProbeFailure) -> Self {
        Self {
            file_size,
            file_size_mb: format_size_mb(file_size),
            format: extension_of(path),
            container_format: None,
            bit_rate: None,
            video: None,
            audio: None,
            failure: Some(failure),
        }
    }

    fn from_report(path: &Path, file_size: u64, report: &ProbeReport) -> Self {
        let format_duration_secs = report.format.duration.as_deref().and_then(parse_f64);

        let video = report.video_stream().map(|stream| {
            let duration = format_duration_secs
                .or_else(|| stream.duration.as_deref().and_then(parse_f64))
                .unwrap_or(0.0);
            let fps = stream
                .r_frame_rate
                .as_deref()
                .map(parse_frame_rate)
                .filter(|f| *f > 0.0)
                .or_else(|| stream.avg_frame_rate.as_deref().map(parse_frame_rate))
                .unwrap_or(0.0);
            VideoInfo {
                duration,
                duration_formatted: format_duration(duration),
                width: stream.width.filter(|w| *w > 0),
                height: stream.height.filter(|h| *h > 0),
                fps,
                codec: stream
                    .codec_name
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
            }
        });

        let audio = report.audio_stream().map(|stream| AudioInfo {
            codec: stream
                .codec_name
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
            channels: stream.channels,
            sample_rate: stream.sample_rate.as_deref().and_then(|s| s.trim().parse().ok()),
        });

        let bit_rate = report
            .format
            .bit_rate
            .as_deref()
            .and_then(|b| b.trim().parse::<i64>().ok())
            .or_else(|| {
                report
                    .video_stream()
                    .and_then(|s| s.bit_rate.as_deref())
                    .and_then(|b| b.trim().parse::<i64>().ok())
            });

        Self {
            file_size,
            file_size_mb: format_size_mb(file_size),
            format: extension_of(path),
            container_format: report
                .format
                .format_name
                .as_deref()
                .and_then(|n| n.split(',').next())
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty()),
            bit_rate,
            video,
            audio,
            failure: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.failure.is_none()
    }

    /// A decodable video stream was found.
    pub fn has_video(&self) -> bool {
        self.video.is_some()
    }

    pub fn duration(&self) -> Option<f64> {
        self.video.as_ref().map(|v| v.duration)
    }

    /// Columns to persist. Probe-derived columns stay empty on failure.
    pub fn to_probed_fields(&self) -> ProbedFields {
        let video = self.video.as_ref();
        let audio = self.audio.as_ref();
        ProbedFields {
            format: Some(self.format.clone()).filter(|f| !f.is_empty()),
            duration: video.map(|v| v.duration),
            duration_formatted: video.map(|v| v.duration_formatted.clone()),
            width: video.and_then(|v| v.width),
            height: video.and_then(|v| v.height),
            fps: video.map(|v| v.fps),
            codec: video.map(|v| v.codec.clone()),
            container_format: self.container_format.clone(),
            bit_rate: self.bit_rate,
            audio_codec: audio.map(|a| a.codec.clone()),
            audio_channels: audio.and_then(|a| a.channels),
            audio_sample_rate: audio.and_then(|a| a.sample_rate),
        }
    }

    /// JSON blob stored alongside the asset. Failures add an `error` string.
    pub fn to_json(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self)
            .unwrap_or_else(|_| serde_json::Value::Object(Default::default()));
        if let (Some(failure), Some(map)) = (&self.failure, value.as_object_mut()) {
            map.insert("error".to_string(), serde_json::Value::from(failure.to_string()));
        }
        value
    }
}

fn parse_f64(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|v| v.is_finite() && *v >= 0.0)
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default()
}

/// Probe `path`, retrying transient tool failures according to `retry`.
///
/// Zero-byte and missing files are rejected without running the tool.
pub async fn extract_metadata(
    tool: &dyn MediaTool,
    path: &Path,
    retry: &RetryPolicy,
) -> MetadataRecord {
    let file_size = match std::fs::metadata(path) {
        Ok(m) if m.is_file() => m.len(),
        Ok(_) => {
            return MetadataRecord::fallback(
                path,
                0,
                ProbeFailure::Missing {
                    reason: "not a regular file".to_string(),
                },
            )
        }
        Err(e) => {
            return MetadataRecord::fallback(
                path,
                0,
                ProbeFailure::Missing {
                    reason: e.to_string(),
                },
            )
        }
    };
    if file_size == 0 {
        return MetadataRecord::fallback(path, 0, ProbeFailure::EmptyFile);
    }

    let mut attempt = 0;
    loop {
        attempt += 1;
        match tool.probe(path).await {
            Ok(report) => {
                debug!("Probed {:?} on attempt {}", path, attempt);
                return MetadataRecord::from_report(path, file_size, &report);
            }
            Err(e) if retry.should_retry(&e, attempt) => {
                warn!(
                    "Probe attempt {}/{} failed for {:?}: {}",
                    attempt, retry.max_attempts, path, e
                );
                tokio::time::sleep(retry.backoff(attempt)).await;
            }
            Err(e) => {
                warn!("Metadata extraction failed for {:?}: {}", path, e);
                return MetadataRecord::fallback(path, file_size, e.into());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media_tool::{FrameRequest, FrameSampling, GrayFrame, ProbeFormat, ProbeStream};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    struct ScriptedProbe {
        failures_before_success: u32,
        calls: AtomicU32,
        report: ProbeReport,
    }

    #[async_trait]
    impl MediaTool for ScriptedProbe {
        async fn probe(&self, _path: &Path) -> Result<ProbeReport, ToolError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures_before_success {
                Err(ToolError::Failed {
                    tool: "ffprobe".to_string(),
                    stderr: "Invalid data found when processing input".to_string(),
                })
            } else {
                Ok(self.report.clone())
            }
        }

        async fn extract_frame(
            &self,
            _input: &Path,
            _output: &Path,
            _request: FrameRequest,
        ) -> Result<(), ToolError> {
            unimplemented!()
        }

        async fn sample_frames(
            &self,
            _input: &Path,
            _sampling: FrameSampling,
        ) -> Result<Vec<GrayFrame>, ToolError> {
            unimplemented!()
        }
    }

    fn h264_report() -> ProbeReport {
        ProbeReport {
            format: ProbeFormat {
                format_name: Some("mov,mp4,m4a,3gp,3g2,mj2".to_string()),
                duration: Some("10.010000".to_string()),
                bit_rate: Some("1500000".to_string()),
                size: None,
            },
            streams: vec![
                ProbeStream {
                    codec_type: Some("video".to_string()),
                    codec_name: Some("h264".to_string()),
                    width: Some(1280),
                    height: Some(720),
                    r_frame_rate: Some("24000/1001".to_string()),
                    ..Default::default()
                },
                ProbeStream {
                    codec_type: Some("audio".to_string()),
                    codec_name: Some("aac".to_string()),
                    sample_rate: Some("48000".to_string()),
                    channels: Some(2),
                    ..Default::default()
                },
            ],
        }
    }

    fn scripted(failures: u32) -> ScriptedProbe {
        ScriptedProbe {
            failures_before_success: failures,
            calls: AtomicU32::new(0),
            report: h264_report(),
        }
    }

    fn write_file(dir: &TempDir, name: &str, len: usize) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, vec![0u8; len]).unwrap();
        path
    }

    #[tokio::test]
    async fn normalizes_probe_report() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "Clip.MP4", 2 * 1024 * 1024);
        let tool = scripted(0);

        let record = extract_metadata(&tool, &path, &RetryPolicy::new(2, Duration::ZERO)).await;

        assert!(record.is_ok());
        assert!(record.has_video());
        assert_eq!(record.format, "mp4");
        assert_eq!(record.file_size_mb, 2.0);
        assert_eq!(record.container_format.as_deref(), Some("mov"));
        let fields = record.to_probed_fields();
        assert_eq!(fields.width, Some(1280));
        assert_eq!(fields.height, Some(720));
        assert_eq!(fields.codec.as_deref(), Some("h264"));
        assert_eq!(fields.fps, Some(23.98));
        assert_eq!(fields.duration_formatted.as_deref(), Some("00:10"));
        assert_eq!(fields.bit_rate, Some(1_500_000));
        assert_eq!(fields.audio_codec.as_deref(), Some("aac"));
        assert_eq!(fields.audio_sample_rate, Some(48000));
        assert!(record.to_json().get("error").is_none());
    }

    #[tokio::test]
    async fn missing_dimensions_stay_unset() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "stream.mp4", 512);
        let mut tool = scripted(0);
        tool.report.streams[0].width = None;
        tool.report.streams[0].height = Some(0);

        let record = extract_metadata(&tool, &path, &RetryPolicy::new(1, Duration::ZERO)).await;

        assert!(record.has_video());
        let fields = record.to_probed_fields();
        assert_eq!(fields.width, None);
        assert_eq!(fields.height, None);
        assert_eq!(fields.codec.as_deref(), Some("h264"));
        assert!(record.to_json()["video"]["width"].is_null());
    }

    #[tokio::test]
    async fn empty_file_is_rejected_without_probing() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "empty.mp4", 0);
        let tool = scripted(0);

        let record = extract_metadata(&tool, &path, &RetryPolicy::new(2, Duration::ZERO)).await;

        assert_eq!(record.failure, Some(ProbeFailure::EmptyFile));
        assert_eq!(tool.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "clip.mov", 512);
        let tool = scripted(1);

        let record = extract_metadata(&tool, &path, &RetryPolicy::new(2, Duration::ZERO)).await;

        assert!(record.is_ok());
        assert_eq!(tool.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausted_retries_yield_fallback_record() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "corrupt.mkv", 512);
        let tool = scripted(10);

        let record = extract_metadata(&tool, &path, &RetryPolicy::new(3, Duration::ZERO)).await;

        assert_eq!(tool.calls.load(Ordering::SeqCst), 3);
        assert!(matches!(record.failure, Some(ProbeFailure::ToolFailed { .. })));
        assert_eq!(record.file_size, 512);
        assert_eq!(record.format, "mkv");
        let fields = record.to_probed_fields();
        assert!(fields.duration.is_none());
        assert!(fields.width.is_none());
        let json = record.to_json();
        assert!(json["error"].as_str().unwrap().contains("probe failed"));
        assert_eq!(json["failure"]["kind"], "tool_failed");
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let tool = scripted(0);
        let record = extract_metadata(
            &tool,
            &dir.path().join("gone.mp4"),
            &RetryPolicy::new(1, Duration::ZERO),
        )
        .await;
        assert!(matches!(record.failure, Some(ProbeFailure::Missing { .. })));
    }
}
