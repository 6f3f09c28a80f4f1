use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub media_root: Option<String>,
    pub thumbnails_dir: Option<String>,

    // Feature configs
    pub scan: Option<ScanConfig>,
    pub thumbnail: Option<ThumbnailConfig>,
    pub tool: Option<ToolConfig>,
    pub processors: Option<ProcessorsConfig>,
    pub backup: Option<BackupConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ScanConfig {
    /// Accepted file extensions, leading dot optional.
    pub extensions: Option<Vec<String>>,
    pub follow_links: Option<bool>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ThumbnailConfig {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub offset_secs: Option<f64>,
    pub max_attempts: Option<u32>,
    pub min_valid_bytes: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ToolConfig {
    pub ffprobe_path: Option<String>,
    pub ffmpeg_path: Option<String>,
    pub timeout_secs: Option<u64>,
    pub probe_attempts: Option<u32>,
    pub retry_backoff_ms: Option<u64>,
    pub analysis_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ProcessorsConfig {
    pub frame_width: Option<u32>,
    pub frame_height: Option<u32>,
    pub scene: Option<SceneConfig>,
    pub logo: Option<LogoConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SceneConfig {
    pub threshold: Option<f64>,
    pub min_scene_length_secs: Option<f64>,
    pub sample_fps: Option<f64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct LogoConfig {
    pub sample_fps: Option<f64>,
    pub min_area: Option<u32>,
    pub max_area: Option<u32>,
    pub confidence_threshold: Option<f64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct BackupConfig {
    pub dir: Option<String>,
    pub max_backups: Option<usize>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
