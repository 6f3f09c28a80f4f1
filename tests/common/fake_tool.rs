use super::constants::{BROKEN_THUMBNAIL_BYTES, THUMBNAIL_BYTES};
use async_trait::async_trait;
use media_catalog::media_tool::{
    FrameRequest, FrameSampling, GrayFrame, MediaTool, ProbeFormat, ProbeReport, ProbeStream,
    ToolError,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Stand-in for ffprobe/ffmpeg driven by the media file contents.
#[derive(Default)]
pub struct FakeMediaTool {
    probe_calls: AtomicUsize,
    frame_calls: AtomicUsize,
    broken_encoder: AtomicBool,
    frame_offsets: Mutex<Vec<(PathBuf, f64)>>,
}

#[allow(dead_code)]
impl FakeMediaTool {
    pub fn new() -> Self {
        Self::default()
    }

    /// When set, every frame extraction writes an undersized file.
    pub fn set_broken_encoder(&self, broken: bool) {
        self.broken_encoder.store(broken, Ordering::SeqCst);
    }

    pub fn probe_calls(&self) -> usize {
        self.probe_calls.load(Ordering::SeqCst)
    }

    pub fn frame_calls(&self) -> usize {
        self.frame_calls.load(Ordering::SeqCst)
    }

    /// Capture offsets requested so far, keyed by input file.
    pub fn frame_offsets(&self) -> Vec<(PathBuf, f64)> {
        self.frame_offsets.lock().unwrap().clone()
    }
}

enum FakeMedia {
    Clip {
        width: i64,
        height: i64,
        video_codec: String,
        audio_codec: Option<String>,
        duration: f64,
    },
    Audio {
        codec: String,
        duration: f64,
    },
}

impl FakeMedia {
    fn parse(contents: &str) -> Option<Self> {
        let parts: Vec<&str> = contents.split_whitespace().collect();
        match parts.as_slice() {
            ["CLIP", width, height, video, audio, duration] => Some(FakeMedia::Clip {
                width: width.parse().ok()?,
                height: height.parse().ok()?,
                video_codec: video.to_string(),
                audio_codec: Some(audio.to_string()).filter(|a| a != "-"),
                duration: duration.parse().ok()?,
            }),
            ["AUDIO", codec, duration] => Some(FakeMedia::Audio {
                codec: codec.to_string(),
                duration: duration.parse().ok()?,
            }),
            _ => None,
        }
    }

    fn duration(&self) -> f64 {
        match self {
            FakeMedia::Clip { duration, .. } | FakeMedia::Audio { duration, .. } => *duration,
        }
    }

    fn to_report(&self) -> ProbeReport {
        let audio_stream = |codec: &str| ProbeStream {
            codec_type: Some("audio".to_string()),
            codec_name: Some(codec.to_string()),
            sample_rate: Some("48000".to_string()),
            channels: Some(2),
            ..Default::default()
        };
        let (format_name, streams) = match self {
            FakeMedia::Clip {
                width,
                height,
                video_codec,
                audio_codec,
                ..
            } => {
                let mut streams = vec![ProbeStream {
                    codec_type: Some("video".to_string()),
                    codec_name: Some(video_codec.clone()),
                    width: Some(*width),
                    height: Some(*height),
                    r_frame_rate: Some("30000/1001".to_string()),
                    ..Default::default()
                }];
                if let Some(codec) = audio_codec {
                    streams.push(audio_stream(codec));
                }
                ("mov,mp4,m4a,3gp,3g2,mj2", streams)
            }
            FakeMedia::Audio { codec, .. } => ("mp3", vec![audio_stream(codec)]),
        };
        ProbeReport {
            format: ProbeFormat {
                format_name: Some(format_name.to_string()),
                duration: Some(format!("{:.6}", self.duration())),
                bit_rate: Some("1500000".to_string()),
                size: None,
            },
            streams,
        }
    }
}

async fn read_media(path: &Path, tool: &str) -> Result<FakeMedia, ToolError> {
    let bytes = tokio::fs::read(path).await?;
    FakeMedia::parse(&String::from_utf8_lossy(&bytes)).ok_or_else(|| ToolError::Failed {
        tool: tool.to_string(),
        stderr: format!("{}: Invalid data found when processing input", path.display()),
    })
}

#[async_trait]
impl MediaTool for FakeMediaTool {
    async fn probe(&self, path: &Path) -> Result<ProbeReport, ToolError> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        Ok(read_media(path, "ffprobe").await?.to_report())
    }

    async fn extract_frame(
        &self,
        input: &Path,
        output: &Path,
        request: FrameRequest,
    ) -> Result<(), ToolError> {
        self.frame_calls.fetch_add(1, Ordering::SeqCst);
        self.frame_offsets
            .lock()
            .unwrap()
            .push((input.to_path_buf(), request.offset_secs));

        match read_media(input, "ffmpeg").await? {
            FakeMedia::Clip { .. } => {}
            FakeMedia::Audio { .. } => {
                return Err(ToolError::Failed {
                    tool: "ffmpeg".to_string(),
                    stderr: "Output file does not contain any stream".to_string(),
                })
            }
        }
        let size = if self.broken_encoder.load(Ordering::SeqCst) {
            BROKEN_THUMBNAIL_BYTES
        } else {
            THUMBNAIL_BYTES
        };
        tokio::fs::write(output, vec![0xFFu8; size]).await?;
        Ok(())
    }

    /// Dark first half, bright second half: one hard cut in the middle.
    async fn sample_frames(
        &self,
        input: &Path,
        sampling: FrameSampling,
    ) -> Result<Vec<GrayFrame>, ToolError> {
        let media = read_media(input, "ffmpeg").await?;
        let duration = media.duration();
        let count = (duration * sampling.fps).ceil() as usize;
        Ok((0..count)
            .map(|i| {
                let t = i as f64 / sampling.fps;
                let value = if t < duration / 2.0 { 20 } else { 220 };
                GrayFrame::filled(sampling.width, sampling.height, t, value)
            })
            .collect())
    }
}
