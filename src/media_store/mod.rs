//! Persistence for assets, directories, tags and processing results.

mod models;
mod schema;
mod sqlite_media_store;
mod validation;

pub use models::*;
pub use schema::MEDIA_VERSIONED_SCHEMAS;
pub use sqlite_media_store::SqliteMediaStore;
pub use validation::{
    normalize_tag_name, validate_directory, validate_media_file, SupportedExtensions,
    ValidationError, ValidationResult, DEFAULT_EXTENSIONS,
};

use anyhow::Result;
use chrono::{DateTime, Utc};

/// Storage operations for the media catalog.
///
/// Write methods validate their input first and fail with a
/// [`ValidationError`] (reachable through `anyhow::Error::downcast_ref`) when
/// an invariant would be broken.
pub trait MediaStore: Send + Sync {
    // ==================== Assets ====================

    /// Insert a single asset. Fails on duplicate `file_path`.
    fn create_asset(&self, asset: &NewMediaAsset) -> Result<MediaAsset>;

    /// Insert an asset and its audit row in one transaction.
    ///
    /// `finalize` runs inside the transaction with the new asset id; it may
    /// return a thumbnail path to record. If it fails nothing is committed.
    fn create_asset_with_audit(
        &self,
        asset: &NewMediaAsset,
        audit: &NewProcessingResult,
        finalize: &mut dyn FnMut(i64) -> Result<Option<String>>,
    ) -> Result<MediaAsset>;

    fn get_asset(&self, id: i64) -> Result<Option<MediaAsset>>;

    fn get_asset_by_path(&self, file_path: &str) -> Result<Option<MediaAsset>>;

    fn asset_path_exists(&self, file_path: &str) -> Result<bool>;

    fn list_assets(&self, filter: &AssetFilter) -> Result<Vec<MediaAsset>>;

    fn count_assets(&self) -> Result<usize>;

    fn list_asset_ids(&self) -> Result<Vec<i64>>;

    /// Assets that have never been successfully probed.
    fn list_unprobed_assets(&self) -> Result<Vec<MediaAsset>>;

    fn update_asset_details(
        &self,
        id: i64,
        title: &str,
        description: Option<&str>,
    ) -> Result<MediaAsset>;

    /// Replace the probed columns and metadata blob, keeping the recorded
    /// thumbnail.
    fn update_asset_metadata(
        &self,
        id: i64,
        file_size: i64,
        file_size_mb: f64,
        probed: &ProbedFields,
        metadata: &serde_json::Value,
    ) -> Result<MediaAsset>;

    fn set_asset_thumbnail(&self, id: i64, thumbnail: Option<&str>) -> Result<()>;

    /// Delete an asset. Tag links and processing results go with it.
    /// Returns false when no such asset exists.
    fn delete_asset(&self, id: i64) -> Result<bool>;

    /// Convenience for callers that need the flat representation.
    fn get_asset_view(&self, id: i64) -> Result<Option<AssetView>> {
        match self.get_asset(id)? {
            Some(asset) => {
                let tags = self.get_asset_tags(id)?;
                Ok(Some(AssetView::new(&asset, tags)))
            }
            None => Ok(None),
        }
    }

    // ==================== Directories ====================

    fn create_directory(&self, path: &std::path::Path, name: Option<&str>)
        -> Result<MediaDirectory>;

    fn get_directory(&self, id: i64) -> Result<Option<MediaDirectory>>;

    fn get_directory_by_path(&self, path: &str) -> Result<Option<MediaDirectory>>;

    fn list_directories(&self, only_active: bool) -> Result<Vec<MediaDirectory>>;

    fn set_directory_active(&self, id: i64, active: bool) -> Result<()>;

    fn mark_directory_scanned(&self, id: i64, at: DateTime<Utc>) -> Result<()>;

    /// Delete a directory. Its assets stay, with their directory cleared.
    fn delete_directory(&self, id: i64) -> Result<bool>;

    // ==================== Tags ====================

    fn get_or_create_tag(&self, name: &str) -> Result<Tag>;

    fn list_tags(&self) -> Result<Vec<Tag>>;

    fn tag_asset(&self, asset_id: i64, tag_name: &str) -> Result<Tag>;

    /// Returns false when the asset did not carry the tag.
    fn untag_asset(&self, asset_id: i64, tag_name: &str) -> Result<bool>;

    fn get_asset_tags(&self, asset_id: i64) -> Result<Vec<String>>;

    /// Delete a tag; only association rows are removed from assets.
    fn delete_tag(&self, name: &str) -> Result<bool>;

    // ==================== Processing results ====================

    fn append_processing_result(&self, asset_id: i64, result: &NewProcessingResult)
        -> Result<i64>;

    fn update_processing_result(
        &self,
        id: i64,
        status: ProcessingStatus,
        result_data: Option<&serde_json::Value>,
        error_message: Option<&str>,
    ) -> Result<()>;

    fn list_processing_results(&self, asset_id: i64) -> Result<Vec<ProcessingResult>>;
}
