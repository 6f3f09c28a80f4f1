use super::models::{
    AssetFilter, MediaAsset, MediaDirectory, NewMediaAsset, NewProcessingResult,
    ProbedFields, ProcessingResult, ProcessingStatus, Tag,
};
use super::schema::MEDIA_VERSIONED_SCHEMAS;
use super::validation::{
    normalize_tag_name, validate_directory, validate_new_asset, SupportedExtensions,
    ValidationError,
};
use super::MediaStore;
use crate::sqlite_persistence::{open_in_memory_db, open_versioned_db};
use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, types::Value, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

const ASSET_COLUMNS: &str = "id, title, description, file_path, file_size, file_size_mb, \
    format, duration, duration_formatted, width, height, fps, codec, container_format, \
    bit_rate, audio_codec, audio_channels, audio_sample_rate, metadata, directory_id, \
    created_at, updated_at";

const DIRECTORY_COLUMNS: &str = "id, path, name, is_active, last_scanned, created_at";

const RESULT_COLUMNS: &str =
    "id, asset_id, processor_name, status, result_data, error_message, created_at, updated_at";

/// SQLite implementation of [`MediaStore`].
#[derive(Clone)]
pub struct SqliteMediaStore {
    conn: Arc<Mutex<Connection>>,
    extensions: SupportedExtensions,
}

impl SqliteMediaStore {
    /// Open or create the catalog database at `db_path`.
    pub fn new<P: AsRef<Path>>(db_path: P, extensions: SupportedExtensions) -> Result<Self> {
        let conn = open_versioned_db(db_path.as_ref(), MEDIA_VERSIONED_SCHEMAS)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            extensions,
        })
    }

    /// Create an in-memory database, used by tests.
    pub fn in_memory(extensions: SupportedExtensions) -> Result<Self> {
        let conn = open_in_memory_db(MEDIA_VERSIONED_SCHEMAS)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            extensions,
        })
    }

    pub fn extensions(&self) -> &SupportedExtensions {
        &self.extensions
    }

    fn now() -> String {
        Utc::now().to_rfc3339()
    }

    fn parse_datetime(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    fn parse_json(s: Option<String>) -> Option<serde_json::Value> {
        s.and_then(|s| serde_json::from_str(&s).ok())
    }

    fn row_to_asset(row: &rusqlite::Row) -> rusqlite::Result<MediaAsset> {
        let metadata = Self::parse_json(row.get("metadata")?)
            .unwrap_or_else(|| serde_json::Value::Object(Default::default()));
        Ok(MediaAsset {
            id: row.get("id")?,
            title: row.get("title")?,
            description: row.get("description")?,
            file_path: row.get("file_path")?,
            file_size: row.get("file_size")?,
            file_size_mb: row.get("file_size_mb")?,
            probed: ProbedFields {
                format: row.get("format")?,
                duration: row.get("duration")?,
                duration_formatted: row.get("duration_formatted")?,
                width: row.get("width")?,
                height: row.get("height")?,
                fps: row.get("fps")?,
                codec: row.get("codec")?,
                container_format: row.get("container_format")?,
                bit_rate: row.get("bit_rate")?,
                audio_codec: row.get("audio_codec")?,
                audio_channels: row.get("audio_channels")?,
                audio_sample_rate: row.get("audio_sample_rate")?,
            },
            metadata,
            directory_id: row.get("directory_id")?,
            created_at: Self::parse_datetime(&row.get::<_, String>("created_at")?),
            updated_at: Self::parse_datetime(&row.get::<_, String>("updated_at")?),
        })
    }

    fn row_to_directory(row: &rusqlite::Row) -> rusqlite::Result<MediaDirectory> {
        Ok(MediaDirectory {
            id: row.get("id")?,
            path: row.get("path")?,
            name: row.get("name")?,
            is_active: row.get::<_, i32>("is_active")? != 0,
            last_scanned: row
                .get::<_, Option<String>>("last_scanned")?
                .map(|s| Self::parse_datetime(&s)),
            created_at: Self::parse_datetime(&row.get::<_, String>("created_at")?),
        })
    }

    fn row_to_tag(row: &rusqlite::Row) -> rusqlite::Result<Tag> {
        Ok(Tag {
            id: row.get("id")?,
            name: row.get("name")?,
            created_at: Self::parse_datetime(&row.get::<_, String>("created_at")?),
        })
    }

    fn row_to_result(row: &rusqlite::Row) -> rusqlite::Result<ProcessingResult> {
        Ok(ProcessingResult {
            id: row.get("id")?,
            asset_id: row.get("asset_id")?,
            processor_name: row.get("processor_name")?,
            status: ProcessingStatus::parse(&row.get::<_, String>("status")?)
                .unwrap_or(ProcessingStatus::Failed),
            result_data: Self::parse_json(row.get("result_data")?),
            error_message: row.get("error_message")?,
            created_at: Self::parse_datetime(&row.get::<_, String>("created_at")?),
            updated_at: Self::parse_datetime(&row.get::<_, String>("updated_at")?),
        })
    }

    /// Runs `f` between `BEGIN IMMEDIATE` and `COMMIT`, rolling back on error.
    /// A failed `COMMIT` is rolled back too so the connection never stays
    /// inside a transaction.
    fn in_transaction<T>(conn: &Connection, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        conn.execute("BEGIN IMMEDIATE", [])?;
        let outcome = f(conn).and_then(|value| {
            conn.execute("COMMIT", [])?;
            Ok(value)
        });
        if outcome.is_err() && !conn.is_autocommit() {
            let _ = conn.execute("ROLLBACK", []);
        }
        outcome
    }

    fn query_asset(conn: &Connection, id: i64) -> Result<Option<MediaAsset>> {
        Ok(conn
            .query_row(
                &format!("SELECT {} FROM media_assets WHERE id = ?1", ASSET_COLUMNS),
                params![id],
                Self::row_to_asset,
            )
            .optional()?)
    }

    fn require_asset(conn: &Connection, id: i64) -> Result<MediaAsset> {
        match Self::query_asset(conn, id)? {
            Some(asset) => Ok(asset),
            None => Err(ValidationError::NotFound {
                entity: "Asset",
                id: id.to_string(),
            }
            .into()),
        }
    }

    fn path_exists(conn: &Connection, file_path: &str) -> Result<bool> {
        Ok(conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM media_assets WHERE file_path = ?1)",
            params![file_path],
            |r| r.get(0),
        )?)
    }

    fn insert_asset(conn: &Connection, asset: &NewMediaAsset) -> Result<i64> {
        if Self::path_exists(conn, &asset.file_path)? {
            return Err(ValidationError::DuplicatePath {
                entity: "Asset",
                path: asset.file_path.clone(),
            }
            .into());
        }
        let now = Self::now();
        let p = &asset.probed;
        conn.execute(
            r#"
            INSERT INTO media_assets (
                title, description, file_path, file_size, file_size_mb,
                format, duration, duration_formatted, width, height, fps, codec,
                container_format, bit_rate, audio_codec, audio_channels, audio_sample_rate,
                metadata, directory_id, created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?20
            )
            "#,
            params![
                asset.title,
                asset.description,
                asset.file_path,
                asset.file_size,
                asset.file_size_mb,
                p.format,
                p.duration,
                p.duration_formatted,
                p.width,
                p.height,
                p.fps,
                p.codec,
                p.container_format,
                p.bit_rate,
                p.audio_codec,
                p.audio_channels,
                p.audio_sample_rate,
                asset.metadata.to_string(),
                asset.directory_id,
                now,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn insert_result(conn: &Connection, asset_id: i64, result: &NewProcessingResult) -> Result<i64> {
        let now = Self::now();
        conn.execute(
            r#"
            INSERT INTO processing_results (
                asset_id, processor_name, status, result_data, error_message, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
            "#,
            params![
                asset_id,
                result.processor_name,
                result.status.as_str(),
                result.result_data.as_ref().map(|v| v.to_string()),
                result.error_message,
                now,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn write_metadata(conn: &Connection, id: i64, metadata: &serde_json::Value) -> Result<()> {
        conn.execute(
            "UPDATE media_assets SET metadata = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, metadata.to_string(), Self::now()],
        )?;
        Ok(())
    }

    fn with_thumbnail(mut metadata: serde_json::Value, thumbnail: Option<&str>) -> serde_json::Value {
        if !metadata.is_object() {
            metadata = serde_json::Value::Object(Default::default());
        }
        if let Some(map) = metadata.as_object_mut() {
            match thumbnail {
                Some(t) => {
                    map.insert("thumbnail".to_string(), serde_json::Value::from(t));
                }
                None => {
                    map.remove("thumbnail");
                }
            }
        }
        metadata
    }

    fn find_or_insert_tag(conn: &Connection, normalized: &str) -> Result<Tag> {
        conn.execute(
            "INSERT OR IGNORE INTO tags (name, created_at) VALUES (?1, ?2)",
            params![normalized, Self::now()],
        )?;
        Ok(conn.query_row(
            "SELECT id, name, created_at FROM tags WHERE name = ?1",
            params![normalized],
            Self::row_to_tag,
        )?)
    }
}

impl MediaStore for SqliteMediaStore {
    // ==================== Assets ====================

    fn create_asset(&self, asset: &NewMediaAsset) -> Result<MediaAsset> {
        validate_new_asset(asset, &self.extensions)?;
        let conn = self.conn.lock().unwrap();
        Self::in_transaction(&conn, |conn| {
            let id = Self::insert_asset(conn, asset)?;
            Self::require_asset(conn, id)
        })
    }

    fn create_asset_with_audit(
        &self,
        asset: &NewMediaAsset,
        audit: &NewProcessingResult,
        finalize: &mut dyn FnMut(i64) -> Result<Option<String>>,
    ) -> Result<MediaAsset> {
        validate_new_asset(asset, &self.extensions)?;
        let conn = self.conn.lock().unwrap();
        Self::in_transaction(&conn, |conn| {
            let id = Self::insert_asset(conn, asset)?;
            Self::insert_result(conn, id, audit)?;
            if let Some(thumbnail) = finalize(id)? {
                let metadata = Self::with_thumbnail(asset.metadata.clone(), Some(&thumbnail));
                Self::write_metadata(conn, id, &metadata)?;
            }
            Self::require_asset(conn, id)
        })
    }

    fn get_asset(&self, id: i64) -> Result<Option<MediaAsset>> {
        let conn = self.conn.lock().unwrap();
        Self::query_asset(&conn, id)
    }

    fn get_asset_by_path(&self, file_path: &str) -> Result<Option<MediaAsset>> {
        let conn = self.conn.lock().unwrap();
        Ok(conn
            .query_row(
                &format!("SELECT {} FROM media_assets WHERE file_path = ?1", ASSET_COLUMNS),
                params![file_path],
                Self::row_to_asset,
            )
            .optional()?)
    }

    fn asset_path_exists(&self, file_path: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        Self::path_exists(&conn, file_path)
    }

    fn list_assets(&self, filter: &AssetFilter) -> Result<Vec<MediaAsset>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(tag) = &filter.tag {
            clauses.push(
                "EXISTS (SELECT 1 FROM asset_tags at JOIN tags t ON t.id = at.tag_id \
                 WHERE at.asset_id = a.id AND t.name = ?)",
            );
            values.push(Value::Text(tag.trim().to_lowercase()));
        }
        if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            clauses.push(
                "(LOWER(a.title) LIKE ? ESCAPE '\\' OR LOWER(COALESCE(a.description, '')) LIKE ? ESCAPE '\\')",
            );
            let escaped = search
                .to_lowercase()
                .replace('\\', "\\\\")
                .replace('%', "\\%")
                .replace('_', "\\_");
            let pattern = format!("%{}%", escaped);
            values.push(Value::Text(pattern.clone()));
            values.push(Value::Text(pattern));
        }
        if let Some(directory_id) = filter.directory_id {
            clauses.push("a.directory_id = ?");
            values.push(Value::Integer(directory_id));
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let limit = filter.limit.map(|l| l as i64).unwrap_or(-1);
        values.push(Value::Integer(limit));
        values.push(Value::Integer(filter.offset as i64));

        let columns = ASSET_COLUMNS
            .split(", ")
            .map(|c| format!("a.{}", c.trim()))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {} FROM media_assets a {} ORDER BY a.id ASC LIMIT ? OFFSET ?",
            columns, where_sql
        );
        debug!("list_assets: {}", sql);

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let assets = stmt
            .query_map(params_from_iter(values), Self::row_to_asset)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(assets)
    }

    fn count_assets(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM media_assets", [], |r| r.get(0))?;
        Ok(count as usize)
    }

    fn list_asset_ids(&self) -> Result<Vec<i64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id FROM media_assets ORDER BY id ASC")?;
        let ids = stmt
            .query_map([], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    fn list_unprobed_assets(&self) -> Result<Vec<MediaAsset>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM media_assets WHERE duration IS NULL ORDER BY id ASC",
            ASSET_COLUMNS
        ))?;
        let assets = stmt
            .query_map([], Self::row_to_asset)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(assets)
    }

    fn update_asset_details(
        &self,
        id: i64,
        title: &str,
        description: Option<&str>,
    ) -> Result<MediaAsset> {
        if title.trim().is_empty() {
            return Err(ValidationError::EmptyField { field: "title" }.into());
        }
        let conn = self.conn.lock().unwrap();
        Self::in_transaction(&conn, |conn| {
            Self::require_asset(conn, id)?;
            conn.execute(
                "UPDATE media_assets SET title = ?2, description = ?3, updated_at = ?4 WHERE id = ?1",
                params![id, title.trim(), description, Self::now()],
            )?;
            Self::require_asset(conn, id)
        })
    }

    fn update_asset_metadata(
        &self,
        id: i64,
        file_size: i64,
        file_size_mb: f64,
        probed: &ProbedFields,
        metadata: &serde_json::Value,
    ) -> Result<MediaAsset> {
        let conn = self.conn.lock().unwrap();
        Self::in_transaction(&conn, |conn| {
            let existing = Self::require_asset(conn, id)?;
            let metadata = Self::with_thumbnail(metadata.clone(), existing.thumbnail());
            conn.execute(
                r#"
                UPDATE media_assets SET
                    file_size = ?2, file_size_mb = ?3,
                    format = ?4, duration = ?5, duration_formatted = ?6,
                    width = ?7, height = ?8, fps = ?9, codec = ?10,
                    container_format = ?11, bit_rate = ?12,
                    audio_codec = ?13, audio_channels = ?14, audio_sample_rate = ?15,
                    metadata = ?16, updated_at = ?17
                WHERE id = ?1
                "#,
                params![
                    id,
                    file_size,
                    file_size_mb,
                    probed.format,
                    probed.duration,
                    probed.duration_formatted,
                    probed.width,
                    probed.height,
                    probed.fps,
                    probed.codec,
                    probed.container_format,
                    probed.bit_rate,
                    probed.audio_codec,
                    probed.audio_channels,
                    probed.audio_sample_rate,
                    metadata.to_string(),
                    Self::now(),
                ],
            )?;
            Self::require_asset(conn, id)
        })
    }

    fn set_asset_thumbnail(&self, id: i64, thumbnail: Option<&str>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        Self::in_transaction(&conn, |conn| {
            let existing = Self::require_asset(conn, id)?;
            let metadata = Self::with_thumbnail(existing.metadata, thumbnail);
            Self::write_metadata(conn, id, &metadata)
        })
    }

    fn delete_asset(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute("DELETE FROM media_assets WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    // ==================== Directories ====================

    fn create_directory(&self, path: &Path, name: Option<&str>) -> Result<MediaDirectory> {
        let canonical = validate_directory(path)?;
        let path_str = canonical.to_string_lossy().to_string();
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .or_else(|| {
                canonical
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
            })
            .unwrap_or_else(|| path_str.clone());

        let conn = self.conn.lock().unwrap();
        Self::in_transaction(&conn, |conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM media_directories WHERE path = ?1)",
                params![path_str],
                |r| r.get(0),
            )?;
            if exists {
                return Err(ValidationError::DuplicatePath {
                    entity: "Directory",
                    path: path_str.clone(),
                }
                .into());
            }
            conn.execute(
                "INSERT INTO media_directories (path, name, is_active, created_at) VALUES (?1, ?2, 1, ?3)",
                params![path_str, name, Self::now()],
            )?;
            let id = conn.last_insert_rowid();
            Ok(conn.query_row(
                &format!("SELECT {} FROM media_directories WHERE id = ?1", DIRECTORY_COLUMNS),
                params![id],
                Self::row_to_directory,
            )?)
        })
    }

    fn get_directory(&self, id: i64) -> Result<Option<MediaDirectory>> {
        let conn = self.conn.lock().unwrap();
        Ok(conn
            .query_row(
                &format!("SELECT {} FROM media_directories WHERE id = ?1", DIRECTORY_COLUMNS),
                params![id],
                Self::row_to_directory,
            )
            .optional()?)
    }

    fn get_directory_by_path(&self, path: &str) -> Result<Option<MediaDirectory>> {
        let conn = self.conn.lock().unwrap();
        Ok(conn
            .query_row(
                &format!("SELECT {} FROM media_directories WHERE path = ?1", DIRECTORY_COLUMNS),
                params![path],
                Self::row_to_directory,
            )
            .optional()?)
    }

    fn list_directories(&self, only_active: bool) -> Result<Vec<MediaDirectory>> {
        let conn = self.conn.lock().unwrap();
        let sql = if only_active {
            format!(
                "SELECT {} FROM media_directories WHERE is_active = 1 ORDER BY id ASC",
                DIRECTORY_COLUMNS
            )
        } else {
            format!("SELECT {} FROM media_directories ORDER BY id ASC", DIRECTORY_COLUMNS)
        };
        let mut stmt = conn.prepare(&sql)?;
        let dirs = stmt
            .query_map([], Self::row_to_directory)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(dirs)
    }

    fn set_directory_active(&self, id: i64, active: bool) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE media_directories SET is_active = ?2 WHERE id = ?1",
            params![id, active as i32],
        )?;
        if updated == 0 {
            return Err(ValidationError::NotFound {
                entity: "Directory",
                id: id.to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn mark_directory_scanned(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE media_directories SET last_scanned = ?2 WHERE id = ?1",
            params![id, at.to_rfc3339()],
        )?;
        if updated == 0 {
            bail!("Directory {} not found while recording scan time", id);
        }
        Ok(())
    }

    fn delete_directory(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute("DELETE FROM media_directories WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    // ==================== Tags ====================

    fn get_or_create_tag(&self, name: &str) -> Result<Tag> {
        let normalized = normalize_tag_name(name)?;
        let conn = self.conn.lock().unwrap();
        Self::find_or_insert_tag(&conn, &normalized)
    }

    fn list_tags(&self) -> Result<Vec<Tag>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id, name, created_at FROM tags ORDER BY name ASC")?;
        let tags = stmt
            .query_map([], Self::row_to_tag)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tags)
    }

    fn tag_asset(&self, asset_id: i64, tag_name: &str) -> Result<Tag> {
        let normalized = normalize_tag_name(tag_name)?;
        let conn = self.conn.lock().unwrap();
        Self::in_transaction(&conn, |conn| {
            Self::require_asset(conn, asset_id)?;
            let tag = Self::find_or_insert_tag(conn, &normalized)?;
            conn.execute(
                "INSERT OR IGNORE INTO asset_tags (asset_id, tag_id) VALUES (?1, ?2)",
                params![asset_id, tag.id],
            )?;
            Ok(tag)
        })
    }

    fn untag_asset(&self, asset_id: i64, tag_name: &str) -> Result<bool> {
        let normalized = normalize_tag_name(tag_name)?;
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute(
            "DELETE FROM asset_tags WHERE asset_id = ?1 AND tag_id = (SELECT id FROM tags WHERE name = ?2)",
            params![asset_id, normalized],
        )?;
        Ok(removed > 0)
    }

    fn get_asset_tags(&self, asset_id: i64) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT t.name FROM tags t JOIN asset_tags at ON at.tag_id = t.id \
             WHERE at.asset_id = ?1 ORDER BY t.name ASC",
        )?;
        let names = stmt
            .query_map(params![asset_id], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    fn delete_tag(&self, name: &str) -> Result<bool> {
        let normalized = normalize_tag_name(name)?;
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute("DELETE FROM tags WHERE name = ?1", params![normalized])?;
        Ok(deleted > 0)
    }

    // ==================== Processing results ====================

    fn append_processing_result(
        &self,
        asset_id: i64,
        result: &NewProcessingResult,
    ) -> Result<i64> {
        if result.processor_name.trim().is_empty() {
            return Err(ValidationError::EmptyField {
                field: "processor_name",
            }
            .into());
        }
        let conn = self.conn.lock().unwrap();
        Self::in_transaction(&conn, |conn| {
            Self::require_asset(conn, asset_id)?;
            Self::insert_result(conn, asset_id, result)
        })
    }

    fn update_processing_result(
        &self,
        id: i64,
        status: ProcessingStatus,
        result_data: Option<&serde_json::Value>,
        error_message: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        Self::in_transaction(&conn, |conn| {
            let current: Option<String> = conn
                .query_row(
                    "SELECT status FROM processing_results WHERE id = ?1",
                    params![id],
                    |r| r.get(0),
                )
                .optional()?;
            let Some(current) = current else {
                return Err(ValidationError::NotFound {
                    entity: "Processing result",
                    id: id.to_string(),
                }
                .into());
            };
            if ProcessingStatus::parse(&current).is_some_and(|s| s.is_terminal()) {
                bail!("Processing result {} is already {}", id, current);
            }
            let now = Self::now();
            conn.execute(
                r#"
                UPDATE processing_results SET
                    status = ?2,
                    result_data = COALESCE(?3, result_data),
                    error_message = ?4,
                    updated_at = ?5
                WHERE id = ?1
                "#,
                params![
                    id,
                    status.as_str(),
                    result_data.map(|v| v.to_string()),
                    error_message,
                    now,
                ],
            )?;
            Ok(())
        })
    }

    fn list_processing_results(&self, asset_id: i64) -> Result<Vec<ProcessingResult>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM processing_results WHERE asset_id = ?1 ORDER BY id ASC",
            RESULT_COLUMNS
        ))?;
        let results = stmt
            .query_map(params![asset_id], Self::row_to_result)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(results)
    }
}
