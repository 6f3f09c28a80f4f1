//! Directory scanner: walks a folder under the media root and turns each new
//! media file into an asset with its metadata, thumbnail and audit row.
//!
//! Files are processed one at a time. Each file either commits completely
//! (asset row, audit row, thumbnail renamed to `{id}.jpg`) or leaves nothing
//! behind and shows up in [`ScanReport::skipped`].

use crate::config::{AppConfig, ScanSettings};
use crate::media_store::{
    validate_media_file, AssetView, MediaStore, NewMediaAsset, NewProcessingResult,
    ValidationError, ValidationResult,
};
use crate::media_tool::{MediaTool, RetryPolicy};
use crate::metadata::{extract_metadata, MetadataRecord};
use crate::thumbnail::{thumbnail_file_name, ThumbnailGenerator};
use anyhow::Context;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Processor name recorded on audit rows written by scans and refreshes.
pub const METADATA_PROCESSOR: &str = "metadata";

/// Failures that stop a whole scan before any file is touched.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Media root is missing or not a directory: {path}")]
    MediaRootMissing { path: String },

    #[error("Scan root {path} is outside the media root")]
    OutsideMediaRoot { path: String },

    #[error("Thumbnails directory {path} is not writable: {reason}")]
    ThumbnailsDirUnwritable { path: String, reason: String },

    #[error("Directory {id} is not registered")]
    DirectoryNotFound { id: i64 },

    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub root: String,
    pub directory_id: Option<i64>,
    /// Assets created by this pass.
    pub assets: Vec<AssetView>,
    pub skipped: Vec<SkippedFile>,
    /// Matching files that were already indexed.
    pub already_indexed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub refreshed: usize,
    pub unchanged: usize,
    pub failed: Vec<SkippedFile>,
    /// Requested ids with no matching asset.
    pub not_found: Vec<i64>,
}

enum FileOutcome {
    Created(AssetView),
    AlreadyIndexed,
}

pub struct Scanner {
    store: Arc<dyn MediaStore>,
    tool: Arc<dyn MediaTool>,
    thumbnails: Arc<ThumbnailGenerator>,
    media_root: PathBuf,
    thumbnails_dir: PathBuf,
    settings: ScanSettings,
    probe_retry: RetryPolicy,
}

impl Scanner {
    pub fn new(config: &AppConfig, store: Arc<dyn MediaStore>, tool: Arc<dyn MediaTool>) -> Self {
        let backoff = Duration::from_millis(config.tool.retry_backoff_ms);
        let thumbnails = Arc::new(ThumbnailGenerator::new(
            tool.clone(),
            config.thumbnail.clone(),
            backoff,
        ));
        Self {
            store,
            tool,
            thumbnails,
            media_root: config.media_root.clone(),
            thumbnails_dir: config.thumbnails_dir.clone(),
            settings: config.scan.clone(),
            probe_retry: RetryPolicy::new(config.tool.probe_attempts, backoff),
        }
    }

    pub fn thumbnails(&self) -> &Arc<ThumbnailGenerator> {
        &self.thumbnails
    }

    fn canonical_media_root(&self) -> Result<PathBuf, ScanError> {
        self.media_root
            .canonicalize()
            .ok()
            .filter(|p| p.is_dir())
            .ok_or_else(|| ScanError::MediaRootMissing {
                path: self.media_root.display().to_string(),
            })
    }

    fn ensure_thumbnails_dir(&self) -> Result<(), ScanError> {
        let unwritable = |reason: String| ScanError::ThumbnailsDirUnwritable {
            path: self.thumbnails_dir.display().to_string(),
            reason,
        };
        std::fs::create_dir_all(&self.thumbnails_dir).map_err(|e| unwritable(e.to_string()))?;
        let probe = self
            .thumbnails_dir
            .join(format!(".write-test-{}", uuid::Uuid::new_v4()));
        std::fs::write(&probe, b"ok").map_err(|e| unwritable(e.to_string()))?;
        let _ = std::fs::remove_file(&probe);
        Ok(())
    }

    /// Path of `absolute` relative to the media root, used as the asset key.
    /// Keys must round-trip to the file, so non UTF-8 names are rejected.
    pub fn relative_path(&self, media_root: &Path, absolute: &Path) -> ValidationResult<String> {
        let outside = || ValidationError::OutsideMediaRoot {
            path: absolute.display().to_string(),
        };
        let rel = absolute.strip_prefix(media_root).map_err(|_| outside())?;
        let rel = rel.to_str().ok_or_else(|| ValidationError::NonUtf8Path {
            path: absolute.display().to_string(),
        })?;
        if rel.is_empty() {
            return Err(outside());
        }
        Ok(rel.to_string())
    }

    /// Index every new supported file below `root`.
    pub async fn scan(&self, root: &Path, directory_id: Option<i64>) -> Result<ScanReport, ScanError> {
        let media_root = self.canonical_media_root()?;
        self.ensure_thumbnails_dir()?;

        let mut report = ScanReport {
            root: root.display().to_string(),
            directory_id,
            ..Default::default()
        };

        let root = match root.canonicalize() {
            Ok(root) => root,
            Err(e) => {
                error!("Cannot read scan root {:?}: {}", root, e);
                return Ok(report);
            }
        };
        if !root.starts_with(&media_root) {
            return Err(ScanError::OutsideMediaRoot {
                path: root.display().to_string(),
            });
        }
        if let Err(e) = std::fs::read_dir(&root) {
            error!("Cannot read scan root {:?}: {}", root, e);
            return Ok(report);
        }
        report.root = root.display().to_string();

        info!("Scanning {:?}", root);
        let mut total_bytes: u64 = 0;
        for path in self.collect_media_files(&root) {
            let shown = path.display().to_string();
            match self.process_file(&media_root, &path, directory_id).await {
                Ok(FileOutcome::Created(view)) => {
                    total_bytes += view.file_size.max(0) as u64;
                    info!("Indexed {} as asset {}", view.file_path, view.id);
                    report.assets.push(view);
                }
                Ok(FileOutcome::AlreadyIndexed) => {
                    debug!("Already indexed: {}", shown);
                    report.already_indexed += 1;
                }
                Err(reason) => {
                    warn!("Skipping {}: {}", shown, reason);
                    report.skipped.push(SkippedFile {
                        path: shown,
                        reason,
                    });
                }
            }
        }

        if let Some(id) = directory_id {
            if let Err(e) = self.store.mark_directory_scanned(id, Utc::now()) {
                warn!("Failed to record scan time for directory {}: {}", id, e);
            }
        }

        info!(
            "Scan of {:?} finished: {} new ({:#}), {} already indexed, {} skipped",
            root,
            report.assets.len(),
            byte_unit::Byte::from(total_bytes),
            report.already_indexed,
            report.skipped.len()
        );
        Ok(report)
    }

    fn collect_media_files(&self, root: &Path) -> Vec<PathBuf> {
        WalkDir::new(root)
            .follow_links(self.settings.follow_links)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Error walking {:?}: {}", root, e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| self.settings.extensions.matches(path))
            .collect()
    }

    async fn process_file(
        &self,
        media_root: &Path,
        path: &Path,
        directory_id: Option<i64>,
    ) -> Result<FileOutcome, String> {
        let rel = self
            .relative_path(media_root, path)
            .map_err(|e| e.to_string())?;
        if self.store.asset_path_exists(&rel).map_err(|e| e.to_string())? {
            return Ok(FileOutcome::AlreadyIndexed);
        }
        let file_size =
            validate_media_file(path, &self.settings.extensions).map_err(|e| e.to_string())?;

        let record = extract_metadata(self.tool.as_ref(), path, &self.probe_retry).await;
        if let Some(failure) = &record.failure {
            return Err(format!("metadata extraction failed: {}", failure));
        }

        let staged = if record.has_video() {
            let staging = self.thumbnails.staging_path(&self.thumbnails_dir);
            self.thumbnails
                .generate(path, &staging, record.duration())
                .await
        } else {
            None
        };

        let result = self
            .persist(&rel, path, file_size, &record, staged.as_deref(), directory_id)
            .map_err(|e| e.to_string());
        if let Some(staged) = &staged {
            // Still present only if the asset was not committed.
            let _ = std::fs::remove_file(staged);
        }
        result
    }

    fn persist(
        &self,
        rel: &str,
        path: &Path,
        file_size: u64,
        record: &MetadataRecord,
        staged: Option<&Path>,
        directory_id: Option<i64>,
    ) -> anyhow::Result<FileOutcome> {
        let thumbnail_status = match (record.has_video(), staged.is_some()) {
            (true, true) => "generated",
            (true, false) => "failed",
            (false, _) => "not_applicable",
        };
        let asset = NewMediaAsset {
            title: path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| rel.to_string()),
            description: None,
            file_path: rel.to_string(),
            absolute_path: path.to_path_buf(),
            file_size: file_size as i64,
            file_size_mb: record.file_size_mb,
            probed: record.to_probed_fields(),
            metadata: record.to_json(),
            directory_id,
        };
        let audit = NewProcessingResult::completed(
            METADATA_PROCESSOR,
            json!({
                "metadata": record.to_json(),
                "thumbnail": thumbnail_status,
            }),
        );

        let mut finalized: Option<PathBuf> = None;
        let created = self.store.create_asset_with_audit(&asset, &audit, &mut |id| {
            let Some(staged) = staged else {
                return Ok(None);
            };
            let name = thumbnail_file_name(id);
            let target = self.thumbnails_dir.join(&name);
            std::fs::rename(staged, &target)
                .with_context(|| format!("Failed to move thumbnail into {:?}", target))?;
            finalized = Some(target);
            Ok(Some(name))
        });

        match created {
            Ok(asset) => Ok(FileOutcome::Created(AssetView::new(&asset, Vec::new()))),
            Err(e) => {
                if let Some(target) = finalized {
                    let _ = std::fs::remove_file(target);
                }
                Err(e)
            }
        }
    }

    /// Scan a registered directory and record its scan time.
    pub async fn scan_directory(&self, directory_id: i64) -> Result<ScanReport, ScanError> {
        let directory = self
            .store
            .get_directory(directory_id)?
            .ok_or(ScanError::DirectoryNotFound { id: directory_id })?;
        self.scan(Path::new(&directory.path), Some(directory.id)).await
    }

    /// Scan every active directory in turn. A directory that cannot be
    /// scanned is logged and skipped; setup failures abort the run.
    pub async fn scan_all_active(&self) -> Result<Vec<ScanReport>, ScanError> {
        let mut reports = Vec::new();
        for directory in self.store.list_directories(true)? {
            match self.scan(Path::new(&directory.path), Some(directory.id)).await {
                Ok(report) => reports.push(report),
                Err(e @ ScanError::OutsideMediaRoot { .. }) => {
                    error!("Skipping directory {} ({}): {}", directory.id, directory.path, e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(reports)
    }

    /// Re-probe assets that were never probed or whose file size changed.
    /// With `all`, every asset is re-probed. `only` limits the run to the
    /// given asset ids, each of which is re-probed regardless of staleness.
    pub async fn refresh_metadata(
        &self,
        all: bool,
        only: Option<&[i64]>,
    ) -> Result<RefreshReport, ScanError> {
        let media_root = self.canonical_media_root()?;
        let mut report = RefreshReport::default();
        let all = all || only.is_some();
        let ids = match only {
            Some(ids) => {
                let mut ids = ids.to_vec();
                ids.sort_unstable();
                ids.dedup();
                ids
            }
            None => self.store.list_asset_ids()?,
        };

        for id in ids {
            let Some(asset) = self.store.get_asset(id)? else {
                if only.is_some() {
                    warn!("Asset {} not found, nothing to refresh", id);
                    report.not_found.push(id);
                }
                continue;
            };
            let path = media_root.join(&asset.file_path);
            let current_size = std::fs::metadata(&path).map(|m| m.len() as i64).ok();
            let stale = asset.probed.duration.is_none() || current_size != Some(asset.file_size);
            if !all && !stale {
                report.unchanged += 1;
                continue;
            }

            let record = extract_metadata(self.tool.as_ref(), &path, &self.probe_retry).await;
            if let Some(failure) = &record.failure {
                let reason = failure.to_string();
                warn!("Metadata refresh failed for asset {} ({}): {}", id, asset.file_path, reason);
                self.store.append_processing_result(
                    id,
                    &NewProcessingResult::failed(METADATA_PROCESSOR, reason.clone()),
                )?;
                report.failed.push(SkippedFile {
                    path: asset.file_path.clone(),
                    reason,
                });
                continue;
            }

            self.store.update_asset_metadata(
                id,
                record.file_size as i64,
                record.file_size_mb,
                &record.to_probed_fields(),
                &record.to_json(),
            )?;
            if record.has_video() && asset.thumbnail().is_none() {
                if let Some(name) = self
                    .thumbnails
                    .ensure_thumbnail(&path, &self.thumbnails_dir, id)
                    .await
                {
                    self.store.set_asset_thumbnail(id, Some(&name))?;
                }
            }
            self.store.append_processing_result(
                id,
                &NewProcessingResult::completed(METADATA_PROCESSOR, json!({ "metadata": record.to_json() })),
            )?;
            report.refreshed += 1;
        }

        info!(
            "Metadata refresh: {} refreshed, {} unchanged, {} failed",
            report.refreshed,
            report.unchanged,
            report.failed.len()
        );
        Ok(report)
    }
}
