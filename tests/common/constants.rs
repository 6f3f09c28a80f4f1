//! Media file contents understood by the fake tool.
//!
//! `CLIP <width> <height> <video codec> <audio codec|-> <duration>` probes as
//! a video file, `AUDIO <codec> <duration>` as an audio-only file. Anything
//! else fails to probe the way a corrupt file does.

#![allow(dead_code)]

/// 10 second 1280x720 h264 clip with AAC audio.
pub const CLIP_720P: &str = "CLIP 1280 720 h264 aac 10.0";

/// 3 second 640x360 vp9 clip without audio.
pub const CLIP_SHORT_SILENT: &str = "CLIP 640 360 vp9 - 3.0";

/// 2 minute 1920x1080 hevc clip with opus audio.
pub const CLIP_1080P: &str = "CLIP 1920 1080 hevc opus 120.0";

pub const AUDIO_ONLY: &str = "AUDIO mp3 42.5";

pub const CORRUPT: &str = "\u{0}\u{0}not a media container";

/// Bytes written for a healthy thumbnail.
pub const THUMBNAIL_BYTES: usize = 2048;

/// Bytes written by a broken encoder, below the validity threshold.
pub const BROKEN_THUMBNAIL_BYTES: usize = 12;
