//! Media Catalog Library
//!
//! Indexes video files under a media root into a SQLite catalog: metadata
//! probing, thumbnail generation, tagging and frame-based analysis.

pub mod config;
pub mod media_store;
pub mod media_tool;
pub mod metadata;
pub mod processors;
pub mod scanner;
pub mod sqlite_persistence;
pub mod thumbnail;

// Re-export commonly used types for convenience
pub use config::{AppConfig, CliConfig, FileConfig};
pub use media_store::{AssetView, MediaStore, SqliteMediaStore};
pub use media_tool::{FfmpegTool, MediaTool};
pub use processors::{Processor, ProcessorRunner};
pub use scanner::{ScanError, ScanReport, Scanner};
pub use thumbnail::ThumbnailGenerator;
