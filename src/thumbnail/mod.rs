//! Thumbnail generation, regeneration and cleanup.
//!
//! Thumbnails live flat in the thumbnails directory as `{asset_id}.jpg`. New
//! scans first render into a `.staging-*.jpg` file that is renamed once the
//! asset id is known.

use crate::config::ThumbnailSettings;
use crate::media_store::MediaStore;
use crate::media_tool::{FrameRequest, MediaTool, RetryPolicy};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const STAGING_PREFIX: &str = ".staging-";

/// Staging files younger than this may still belong to a running scan.
const STALE_STAGING_AGE: Duration = Duration::from_secs(3600);

pub fn thumbnail_file_name(asset_id: i64) -> String {
    format!("{}.jpg", asset_id)
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RegenerateReport {
    pub generated: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub deleted: usize,
    pub kept: usize,
}

pub struct ThumbnailGenerator {
    tool: Arc<dyn MediaTool>,
    settings: ThumbnailSettings,
    retry: RetryPolicy,
    locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl ThumbnailGenerator {
    pub fn new(tool: Arc<dyn MediaTool>, settings: ThumbnailSettings, retry_backoff: Duration) -> Self {
        let retry = RetryPolicy::new(settings.max_attempts, retry_backoff);
        Self {
            tool,
            settings,
            retry,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Capture time for a clip of `duration` seconds.
    pub fn capture_offset(&self, duration: Option<f64>) -> f64 {
        match duration {
            Some(d) if d.is_finite() && d > 0.0 => self.settings.offset_secs.min(d / 2.0).max(0.0),
            _ => 0.0,
        }
    }

    /// Fresh staging path inside `thumbnails_dir`.
    pub fn staging_path(&self, thumbnails_dir: &Path) -> PathBuf {
        thumbnails_dir.join(format!("{}{}.jpg", STAGING_PREFIX, uuid::Uuid::new_v4()))
    }

    fn lock_for(&self, output: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry(output.to_path_buf())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn release_lock(&self, output: &Path, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap();
        // Only the map and this caller hold it: nobody is waiting.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(output);
        }
    }

    fn is_valid_output(&self, output: &Path) -> bool {
        std::fs::metadata(output)
            .map(|m| m.is_file() && m.len() >= self.settings.min_valid_bytes)
            .unwrap_or(false)
    }

    /// Render one frame of `input` into `output`.
    ///
    /// Retries up to the configured attempt count and removes undersized
    /// output between attempts. Returns `None` when every attempt failed;
    /// errors never escape.
    pub async fn generate(&self, input: &Path, output: &Path, duration: Option<f64>) -> Option<PathBuf> {
        let lock = self.lock_for(output);
        let result = {
            let _guard = lock.lock().await;
            self.generate_locked(input, output, duration).await
        };
        self.release_lock(output, lock);
        result
    }

    async fn generate_locked(&self, input: &Path, output: &Path, duration: Option<f64>) -> Option<PathBuf> {
        if let Some(parent) = output.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                error!("Cannot create thumbnail directory {:?}: {}", parent, e);
                return None;
            }
        }
        remove_if_exists(output).await;

        let request = FrameRequest {
            offset_secs: self.capture_offset(duration),
            width: self.settings.width,
            height: self.settings.height,
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = self.tool.extract_frame(input, output, request).await;
            if outcome.is_ok() && self.is_valid_output(output) {
                debug!("Generated thumbnail {:?} on attempt {}", output, attempt);
                return Some(output.to_path_buf());
            }
            remove_if_exists(output).await;

            let retry = match &outcome {
                Err(e) => {
                    warn!(
                        "Thumbnail attempt {}/{} for {:?} failed: {}",
                        attempt, self.retry.max_attempts, input, e
                    );
                    self.retry.should_retry(e, attempt)
                }
                Ok(()) => {
                    warn!(
                        "Thumbnail attempt {}/{} for {:?} produced a corrupt file",
                        attempt, self.retry.max_attempts, input
                    );
                    attempt < self.retry.max_attempts
                }
            };
            if !retry {
                error!("Giving up on thumbnail for {:?} after {} attempts", input, attempt);
                return None;
            }
            tokio::time::sleep(self.retry.backoff(attempt)).await;
        }
    }

    /// Return `{asset_id}.jpg` relative to `thumbnails_dir`, generating it
    /// only if no valid file exists yet.
    pub async fn ensure_thumbnail(
        &self,
        file_path: &Path,
        thumbnails_dir: &Path,
        asset_id: i64,
    ) -> Option<String> {
        let name = thumbnail_file_name(asset_id);
        let output = thumbnails_dir.join(&name);
        if self.is_valid_output(&output) {
            return Some(name);
        }
        if !file_path.is_file() {
            error!("Video file does not exist: {:?}", file_path);
            return None;
        }

        info!("Thumbnail missing for asset {}, generating", asset_id);
        let duration = match self.tool.probe(file_path).await {
            Ok(report) => report
                .format
                .duration
                .as_deref()
                .and_then(|d| d.trim().parse::<f64>().ok()),
            Err(e) => {
                warn!("Could not read duration of {:?}: {}", file_path, e);
                None
            }
        };
        self.generate(file_path, &output, duration).await.map(|_| name)
    }

    /// Rebuild thumbnails for stored assets. Without `force` only assets
    /// whose thumbnail is missing are touched.
    pub async fn regenerate_all(
        &self,
        store: &dyn MediaStore,
        media_root: &Path,
        thumbnails_dir: &Path,
        force: bool,
    ) -> Result<RegenerateReport> {
        let mut report = RegenerateReport::default();
        for id in store.list_asset_ids()? {
            let Some(asset) = store.get_asset(id)? else {
                continue;
            };
            let name = thumbnail_file_name(id);
            let output = thumbnails_dir.join(&name);

            if !force && asset.thumbnail().is_some() && self.is_valid_output(&output) {
                report.skipped += 1;
                continue;
            }
            // Nothing to render without a decoded video stream.
            if asset.probed.width.is_none() {
                report.skipped += 1;
                continue;
            }

            let input = media_root.join(&asset.file_path);
            match self.generate(&input, &output, asset.probed.duration).await {
                Some(_) => {
                    store.set_asset_thumbnail(id, Some(&name))?;
                    report.generated += 1;
                }
                None => {
                    if asset.thumbnail().is_some() {
                        store.set_asset_thumbnail(id, None)?;
                    }
                    report.failed += 1;
                }
            }
        }
        info!(
            "Thumbnail regeneration: {} generated, {} skipped, {} failed",
            report.generated, report.skipped, report.failed
        );
        Ok(report)
    }

    /// Delete files in `thumbnails_dir` that are not the recorded thumbnail
    /// of an existing asset.
    pub fn cleanup_orphans(&self, store: &dyn MediaStore, thumbnails_dir: &Path) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();
        if !thumbnails_dir.is_dir() {
            warn!("Thumbnails directory not found: {:?}", thumbnails_dir);
            return Ok(report);
        }

        let mut wanted = HashSet::new();
        for id in store.list_asset_ids()? {
            if let Some(thumbnail) = store.get_asset(id)?.as_ref().and_then(|a| a.thumbnail()) {
                wanted.insert(thumbnail.to_string());
            }
        }

        let entries = std::fs::read_dir(thumbnails_dir)
            .with_context(|| format!("Failed to read thumbnails directory {:?}", thumbnails_dir))?;
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if wanted.contains(&name) || is_fresh_staging_file(&name, &path) {
                report.kept += 1;
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    debug!("Removed orphaned thumbnail {:?}", path);
                    report.deleted += 1;
                }
                Err(e) => warn!("Failed to remove {:?}: {}", path, e),
            }
        }
        info!(
            "Thumbnail cleanup: {} deleted, {} kept",
            report.deleted, report.kept
        );
        Ok(report)
    }
}

fn is_fresh_staging_file(name: &str, path: &Path) -> bool {
    if !name.starts_with(STAGING_PREFIX) {
        return false;
    }
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .map(|age| age < STALE_STAGING_AGE)
        .unwrap_or(false)
}

async fn remove_if_exists(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed stale thumbnail {:?}", path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {:?}: {}", path, e),
    }
}
