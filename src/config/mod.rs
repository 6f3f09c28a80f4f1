mod file_config;

pub use file_config::{
    BackupConfig, FileConfig, LogoConfig, ProcessorsConfig, ScanConfig, SceneConfig,
    ThumbnailConfig, ToolConfig,
};

use crate::media_store::SupportedExtensions;
use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments that can be used for config resolution.
/// TOML values win over these when both are present.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub media_root: Option<PathBuf>,
    pub thumbnails_dir: Option<PathBuf>,
    pub ffprobe_path: Option<String>,
    pub ffmpeg_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_dir: PathBuf,
    pub media_root: PathBuf,
    pub thumbnails_dir: PathBuf,

    // Feature configs (with defaults)
    pub scan: ScanSettings,
    pub thumbnail: ThumbnailSettings,
    pub tool: ToolSettings,
    pub processors: ProcessorSettings,
    pub backup: BackupSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;
        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let media_root = file
            .media_root
            .map(PathBuf::from)
            .or_else(|| cli.media_root.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("media_root must be specified via --media-root or in config file")
            })?;
        if !media_root.is_dir() {
            bail!("Media root does not exist or is not a directory: {:?}", media_root);
        }

        let thumbnails_dir = file
            .thumbnails_dir
            .map(PathBuf::from)
            .or_else(|| cli.thumbnails_dir.clone())
            .unwrap_or_else(|| db_dir.join("thumbnails"));

        let scan_file = file.scan.unwrap_or_default();
        let scan = ScanSettings {
            extensions: scan_file
                .extensions
                .map(SupportedExtensions::new)
                .unwrap_or_default(),
            follow_links: scan_file.follow_links.unwrap_or(false),
        };
        if scan.extensions.as_slice().is_empty() {
            bail!("scan.extensions must list at least one extension");
        }

        let defaults = ThumbnailSettings::default();
        let thumb_file = file.thumbnail.unwrap_or_default();
        let thumbnail = ThumbnailSettings {
            width: thumb_file.width.unwrap_or(defaults.width),
            height: thumb_file.height.unwrap_or(defaults.height),
            offset_secs: thumb_file.offset_secs.unwrap_or(defaults.offset_secs),
            max_attempts: thumb_file.max_attempts.unwrap_or(defaults.max_attempts).max(1),
            min_valid_bytes: thumb_file.min_valid_bytes.unwrap_or(defaults.min_valid_bytes),
        };
        if thumbnail.width == 0 || thumbnail.height == 0 {
            bail!("Thumbnail dimensions must be non-zero");
        }

        let defaults = ToolSettings::default();
        let tool_file = file.tool.unwrap_or_default();
        let tool = ToolSettings {
            ffprobe_path: tool_file
                .ffprobe_path
                .or_else(|| cli.ffprobe_path.clone())
                .unwrap_or(defaults.ffprobe_path),
            ffmpeg_path: tool_file
                .ffmpeg_path
                .or_else(|| cli.ffmpeg_path.clone())
                .unwrap_or(defaults.ffmpeg_path),
            timeout_secs: tool_file.timeout_secs.unwrap_or(defaults.timeout_secs).max(1),
            probe_attempts: tool_file.probe_attempts.unwrap_or(defaults.probe_attempts).max(1),
            retry_backoff_ms: tool_file.retry_backoff_ms.unwrap_or(defaults.retry_backoff_ms),
            analysis_timeout_secs: tool_file
                .analysis_timeout_secs
                .unwrap_or(defaults.analysis_timeout_secs)
                .max(1),
        };

        let defaults = ProcessorSettings::default();
        let proc_file = file.processors.unwrap_or_default();
        let scene_file = proc_file.scene.unwrap_or_default();
        let logo_file = proc_file.logo.unwrap_or_default();
        let processors = ProcessorSettings {
            frame_width: proc_file.frame_width.unwrap_or(defaults.frame_width),
            frame_height: proc_file.frame_height.unwrap_or(defaults.frame_height),
            scene: SceneSettings {
                threshold: scene_file.threshold.unwrap_or(defaults.scene.threshold),
                min_scene_length_secs: scene_file
                    .min_scene_length_secs
                    .unwrap_or(defaults.scene.min_scene_length_secs),
                sample_fps: scene_file.sample_fps.unwrap_or(defaults.scene.sample_fps),
            },
            logo: LogoSettings {
                sample_fps: logo_file.sample_fps.unwrap_or(defaults.logo.sample_fps),
                min_area: logo_file.min_area.unwrap_or(defaults.logo.min_area),
                max_area: logo_file.max_area.unwrap_or(defaults.logo.max_area),
                confidence_threshold: logo_file
                    .confidence_threshold
                    .unwrap_or(defaults.logo.confidence_threshold),
            },
        };
        if processors.scene.sample_fps <= 0.0 || processors.logo.sample_fps <= 0.0 {
            bail!("Processor sample_fps must be positive");
        }
        if processors.logo.min_area > processors.logo.max_area {
            bail!(
                "processors.logo.min_area ({}) exceeds max_area ({})",
                processors.logo.min_area,
                processors.logo.max_area
            );
        }

        let backup_file = file.backup.unwrap_or_default();
        let backup = BackupSettings {
            dir: backup_file
                .dir
                .map(PathBuf::from)
                .unwrap_or_else(|| db_dir.join("backups")),
            max_backups: backup_file
                .max_backups
                .unwrap_or(DEFAULT_MAX_BACKUPS)
                .max(1),
        };

        Ok(Self {
            db_dir,
            media_root,
            thumbnails_dir,
            scan,
            thumbnail,
            tool,
            processors,
            backup,
        })
    }

    pub fn media_db_path(&self) -> PathBuf {
        self.db_dir.join("media.db")
    }
}

pub const DEFAULT_MAX_BACKUPS: usize = 5;

/// Where compressed database backups go and how many are kept.
#[derive(Debug, Clone)]
pub struct BackupSettings {
    pub dir: PathBuf,
    pub max_backups: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ScanSettings {
    pub extensions: SupportedExtensions,
    pub follow_links: bool,
}

#[derive(Debug, Clone)]
pub struct ThumbnailSettings {
    pub width: u32,
    pub height: u32,
    /// Preferred capture time; clamped to half the duration for short clips.
    pub offset_secs: f64,
    pub max_attempts: u32,
    /// Outputs smaller than this are treated as corrupt.
    pub min_valid_bytes: u64,
}

impl Default for ThumbnailSettings {
    fn default() -> Self {
        Self {
            width: 320,
            height: 180,
            offset_secs: 5.0,
            max_attempts: 3,
            min_valid_bytes: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolSettings {
    pub ffprobe_path: String,
    pub ffmpeg_path: String,
    /// Time limit for each probe or frame grab.
    pub timeout_secs: u64,
    pub probe_attempts: u32,
    /// Delay before the first retry; doubles on each further attempt.
    pub retry_backoff_ms: u64,
    /// Time limit for sampling a whole video for the processors.
    pub analysis_timeout_secs: u64,
}

impl ToolSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis_timeout_secs)
    }
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            ffprobe_path: "ffprobe".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            timeout_secs: 10,
            probe_attempts: 2,
            retry_backoff_ms: 250,
            analysis_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub frame_width: u32,
    pub frame_height: u32,
    pub scene: SceneSettings,
    pub logo: LogoSettings,
}

#[derive(Debug, Clone)]
pub struct SceneSettings {
    /// Mean absolute grayscale difference (0-255) that counts as a cut.
    pub threshold: f64,
    pub min_scene_length_secs: f64,
    pub sample_fps: f64,
}

#[derive(Debug, Clone)]
pub struct LogoSettings {
    pub sample_fps: f64,
    pub min_area: u32,
    pub max_area: u32,
    pub confidence_threshold: f64,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            frame_width: 160,
            frame_height: 90,
            scene: SceneSettings {
                threshold: 27.0,
                min_scene_length_secs: 0.2,
                sample_fps: 5.0,
            },
            logo: LogoSettings {
                sample_fps: 1.0,
                min_area: 500,
                max_area: 50000,
                confidence_threshold: 0.5,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_temp_dirs() -> (TempDir, TempDir) {
        (TempDir::new().unwrap(), TempDir::new().unwrap())
    }

    #[test]
    fn test_resolve_cli_only_uses_defaults() {
        let (db_dir, media_root) = make_temp_dirs();
        let cli = CliConfig {
            db_dir: Some(db_dir.path().to_path_buf()),
            media_root: Some(media_root.path().to_path_buf()),
            ..Default::default()
        };

        let config = AppConfig::resolve(&cli, None).unwrap();

        assert_eq!(config.db_dir, db_dir.path());
        assert_eq!(config.media_root, media_root.path());
        assert_eq!(config.thumbnails_dir, db_dir.path().join("thumbnails"));
        assert_eq!(config.media_db_path(), db_dir.path().join("media.db"));
        assert_eq!(config.backup.dir, db_dir.path().join("backups"));
        assert_eq!(config.backup.max_backups, DEFAULT_MAX_BACKUPS);
        assert_eq!(config.scan.extensions, SupportedExtensions::default());
        assert!(!config.scan.follow_links);
        assert_eq!(config.thumbnail.width, 320);
        assert_eq!(config.thumbnail.max_attempts, 3);
        assert_eq!(config.tool.ffprobe_path, "ffprobe");
        assert_eq!(config.tool.timeout(), Duration::from_secs(10));
        assert_eq!(config.processors.scene.threshold, 27.0);
        assert_eq!(config.processors.logo.min_area, 500);
    }

    #[test]
    fn test_resolve_toml_overrides_cli() {
        let (db_dir, media_root) = make_temp_dirs();
        let cli = CliConfig {
            db_dir: Some(PathBuf::from("/should/be/overridden")),
            media_root: Some(media_root.path().to_path_buf()),
            ffmpeg_path: Some("/cli/ffmpeg".to_string()),
            ffprobe_path: Some("/cli/ffprobe".to_string()),
            ..Default::default()
        };
        let file_config = FileConfig {
            db_dir: Some(db_dir.path().to_string_lossy().to_string()),
            thumbnails_dir: Some("/toml/thumbs".to_string()),
            scan: Some(ScanConfig {
                extensions: Some(vec![".MP4".to_string(), "webm".to_string()]),
                follow_links: Some(true),
            }),
            tool: Some(ToolConfig {
                ffmpeg_path: Some("/toml/ffmpeg".to_string()),
                timeout_secs: Some(3),
                ..Default::default()
            }),
            backup: Some(BackupConfig {
                dir: Some("/toml/backups".to_string()),
                max_backups: Some(0),
            }),
            ..Default::default()
        };

        let config = AppConfig::resolve(&cli, Some(file_config)).unwrap();

        assert_eq!(config.db_dir, db_dir.path());
        assert_eq!(config.thumbnails_dir, PathBuf::from("/toml/thumbs"));
        assert_eq!(
            config.scan.extensions.as_slice(),
            &["mp4".to_string(), "webm".to_string()]
        );
        assert!(config.scan.follow_links);
        assert_eq!(config.tool.ffmpeg_path, "/toml/ffmpeg");
        // CLI value used when TOML doesn't specify
        assert_eq!(config.tool.ffprobe_path, "/cli/ffprobe");
        assert_eq!(config.tool.timeout_secs, 3);
        assert_eq!(config.backup.dir, PathBuf::from("/toml/backups"));
        assert_eq!(config.backup.max_backups, 1);
    }

    #[test]
    fn test_resolve_missing_db_dir_error() {
        let result = AppConfig::resolve(&CliConfig::default(), None);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("db_dir must be specified"));
    }

    #[test]
    fn test_resolve_missing_media_root_error() {
        let (db_dir, _) = make_temp_dirs();
        let cli = CliConfig {
            db_dir: Some(db_dir.path().to_path_buf()),
            media_root: Some(db_dir.path().join("nope")),
            ..Default::default()
        };
        let result = AppConfig::resolve(&cli, None);
        assert!(result.unwrap_err().to_string().contains("Media root"));
    }

    #[test]
    fn test_resolve_rejects_inverted_logo_area() {
        let (db_dir, media_root) = make_temp_dirs();
        let cli = CliConfig {
            db_dir: Some(db_dir.path().to_path_buf()),
            media_root: Some(media_root.path().to_path_buf()),
            ..Default::default()
        };
        let file_config = FileConfig {
            processors: Some(ProcessorsConfig {
                logo: Some(LogoConfig {
                    min_area: Some(900),
                    max_area: Some(100),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(AppConfig::resolve(&cli, Some(file_config)).is_err());
    }
}
