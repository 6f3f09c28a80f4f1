//! Validation for media store entities.
//!
//! Runs before any write so callers get a readable reason instead of a raw
//! constraint violation.

use super::models::NewMediaAsset;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Field '{field}' is required but was empty")]
    EmptyField { field: &'static str },

    #[error("Unsupported file type: {path}")]
    UnsupportedExtension { path: String },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Not a regular file: {path}")]
    NotAFile { path: String },

    #[error("File is not readable: {path} ({reason})")]
    Unreadable { path: String, reason: String },

    #[error("File is empty: {path}")]
    EmptyFile { path: String },

    #[error("Directory not found: {path}")]
    DirectoryNotFound { path: String },

    #[error("Not a directory: {path}")]
    NotADirectory { path: String },

    #[error("Path is outside the media root: {path}")]
    OutsideMediaRoot { path: String },

    #[error("Path is not valid UTF-8: {path}")]
    NonUtf8Path { path: String },

    #[error("{entity} with path '{path}' already exists")]
    DuplicatePath { entity: &'static str, path: String },

    #[error("{entity} {id} does not exist")]
    NotFound { entity: &'static str, id: String },
}

pub type ValidationResult<T> = Result<T, ValidationError>;

/// Set of file extensions the catalog accepts, stored lower-case without the
/// leading dot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportedExtensions(Vec<String>);

pub const DEFAULT_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "m4v", "webm"];

impl SupportedExtensions {
    pub fn new<S: AsRef<str>>(extensions: impl IntoIterator<Item = S>) -> Self {
        let mut normalized: Vec<String> = extensions
            .into_iter()
            .map(|e| e.as_ref().trim().trim_start_matches('.').to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        normalized.sort();
        normalized.dedup();
        Self(normalized)
    }

    pub fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.0.iter().any(|s| s.eq_ignore_ascii_case(e)))
            .unwrap_or(false)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl Default for SupportedExtensions {
    fn default() -> Self {
        Self::new(DEFAULT_EXTENSIONS)
    }
}

/// Checks that `path` is a readable, non-empty file with a supported
/// extension.
pub fn validate_media_file(path: &Path, extensions: &SupportedExtensions) -> ValidationResult<u64> {
    let display = path.display().to_string();
    if !extensions.matches(path) {
        return Err(ValidationError::UnsupportedExtension { path: display });
    }
    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ValidationError::FileNotFound { path: display })
        }
        Err(e) => {
            return Err(ValidationError::Unreadable {
                path: display,
                reason: e.to_string(),
            })
        }
    };
    if !metadata.is_file() {
        return Err(ValidationError::NotAFile { path: display });
    }
    if let Err(e) = File::open(path) {
        return Err(ValidationError::Unreadable {
            path: display,
            reason: e.to_string(),
        });
    }
    if metadata.len() == 0 {
        return Err(ValidationError::EmptyFile { path: display });
    }
    Ok(metadata.len())
}

pub fn validate_new_asset(
    asset: &NewMediaAsset,
    extensions: &SupportedExtensions,
) -> ValidationResult<()> {
    if asset.title.trim().is_empty() {
        return Err(ValidationError::EmptyField { field: "title" });
    }
    if asset.file_path.trim().is_empty() {
        return Err(ValidationError::EmptyField { field: "file_path" });
    }
    validate_media_file(&asset.absolute_path, extensions)?;
    Ok(())
}

/// Checks the directory exists, returning its canonical form.
pub fn validate_directory(path: &Path) -> ValidationResult<std::path::PathBuf> {
    let display = path.display().to_string();
    if !path.exists() {
        return Err(ValidationError::DirectoryNotFound { path: display });
    }
    if !path.is_dir() {
        return Err(ValidationError::NotADirectory { path: display });
    }
    path.canonicalize()
        .map_err(|e| ValidationError::Unreadable {
            path: display,
            reason: e.to_string(),
        })
}

/// Lower-cases and trims a tag name, rejecting blank input.
pub fn normalize_tag_name(name: &str) -> ValidationResult<String> {
    let normalized = name.trim().to_lowercase();
    if normalized.is_empty() {
        return Err(ValidationError::EmptyField { field: "tag name" });
    }
    Ok(normalized)
}
