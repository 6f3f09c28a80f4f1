use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// =============================================================================
// Directories
// =============================================================================

/// A watched root folder that scans are run against.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaDirectory {
    pub id: i64,
    /// Absolute, canonical path.
    pub path: String,
    pub name: String,
    pub is_active: bool,
    pub last_scanned: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Tags
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tag {
    pub id: i64,
    /// Lower-cased and trimmed.
    pub name: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Assets
// =============================================================================

/// Normalized columns filled in from a successful probe.
///
/// Every field stays `None` until the file has been probed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbedFields {
    pub format: Option<String>,
    pub duration: Option<f64>,
    pub duration_formatted: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub fps: Option<f64>,
    pub codec: Option<String>,
    pub container_format: Option<String>,
    pub bit_rate: Option<i64>,
    pub audio_codec: Option<String>,
    pub audio_channels: Option<i64>,
    pub audio_sample_rate: Option<i64>,
}

/// One indexed media file.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaAsset {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    /// Path relative to the media root; unique across the table.
    pub file_path: String,
    pub file_size: i64,
    pub file_size_mb: f64,
    pub probed: ProbedFields,
    /// Full probe record plus derived artifacts such as `thumbnail`.
    pub metadata: serde_json::Value,
    pub directory_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MediaAsset {
    /// Relative thumbnail path recorded in the metadata blob, if any.
    pub fn thumbnail(&self) -> Option<&str> {
        self.metadata.get("thumbnail").and_then(|v| v.as_str())
    }
}

/// Payload for inserting a new asset.
#[derive(Debug, Clone)]
pub struct NewMediaAsset {
    pub title: String,
    pub description: Option<String>,
    /// Path relative to the media root, used as the unique key.
    pub file_path: String,
    /// Where the file lives on disk right now; checked during validation.
    pub absolute_path: PathBuf,
    pub file_size: i64,
    pub file_size_mb: f64,
    pub probed: ProbedFields,
    pub metadata: serde_json::Value,
    pub directory_id: Option<i64>,
}

/// Flat, JSON-serializable representation handed to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetView {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub file_path: String,
    pub file_size: i64,
    pub file_size_mb: f64,
    pub format: Option<String>,
    pub duration: Option<f64>,
    pub duration_formatted: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub fps: Option<f64>,
    pub codec: Option<String>,
    pub container_format: Option<String>,
    pub bit_rate: Option<i64>,
    pub audio_codec: Option<String>,
    pub audio_channels: Option<i64>,
    pub audio_sample_rate: Option<i64>,
    pub thumbnail_url: Option<String>,
    pub tags: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl AssetView {
    pub fn new(asset: &MediaAsset, tags: Vec<String>) -> Self {
        let p = &asset.probed;
        Self {
            id: asset.id,
            title: asset.title.clone(),
            description: asset.description.clone(),
            file_path: asset.file_path.clone(),
            file_size: asset.file_size,
            file_size_mb: asset.file_size_mb,
            format: p.format.clone(),
            duration: p.duration,
            duration_formatted: p.duration_formatted.clone(),
            width: p.width,
            height: p.height,
            fps: p.fps,
            codec: p.codec.clone(),
            container_format: p.container_format.clone(),
            bit_rate: p.bit_rate,
            audio_codec: p.audio_codec.clone(),
            audio_channels: p.audio_channels,
            audio_sample_rate: p.audio_sample_rate,
            thumbnail_url: asset.thumbnail().map(|t| format!("/thumbnails/{}", t)),
            tags,
            created_at: asset.created_at.to_rfc3339(),
            updated_at: asset.updated_at.to_rfc3339(),
        }
    }
}

/// Criteria for listing assets. All set criteria must match.
#[derive(Debug, Clone, Default)]
pub struct AssetFilter {
    /// Exact tag name (normalized before matching).
    pub tag: Option<String>,
    /// Case-insensitive substring over title and description.
    pub search: Option<String>,
    pub directory_id: Option<i64>,
    pub limit: Option<usize>,
    pub offset: usize,
}

// =============================================================================
// Processing results
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ProcessingStatus::Pending),
            "processing" => Some(ProcessingStatus::Processing),
            "completed" => Some(ProcessingStatus::Completed),
            "failed" => Some(ProcessingStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingStatus::Completed | ProcessingStatus::Failed)
    }
}

/// Audit record of one pipeline stage or processor run against one asset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingResult {
    pub id: i64,
    pub asset_id: i64,
    pub processor_name: String,
    pub status: ProcessingStatus,
    pub result_data: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewProcessingResult {
    pub processor_name: String,
    pub status: ProcessingStatus,
    pub result_data: Option<serde_json::Value>,
    pub error_message: Option<String>,
}

impl NewProcessingResult {
    pub fn completed(processor_name: &str, result_data: serde_json::Value) -> Self {
        Self {
            processor_name: processor_name.to_string(),
            status: ProcessingStatus::Completed,
            result_data: Some(result_data),
            error_message: None,
        }
    }

    pub fn failed(processor_name: &str, error_message: impl Into<String>) -> Self {
        Self {
            processor_name: processor_name.to_string(),
            status: ProcessingStatus::Failed,
            result_data: None,
            error_message: Some(error_message.into()),
        }
    }
}
