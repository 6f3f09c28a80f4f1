//! SQLite schema for the media catalog database.

use crate::sqlite_column;
use crate::sqlite_persistence::{
    Column, ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema,
};

// =============================================================================
// Version 1
// =============================================================================

const MEDIA_DIRECTORIES_TABLE_V1: Table = Table {
    name: "media_directories",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("path", &SqlType::Text, non_null = true, is_unique = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!(
            "is_active",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("1")
        ),
        sqlite_column!("last_scanned", &SqlType::Text),
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[],
};

const MEDIA_ASSETS_TABLE_V1: Table = Table {
    name: "media_assets",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!("description", &SqlType::Text),
        sqlite_column!("file_path", &SqlType::Text, non_null = true, is_unique = true),
        sqlite_column!("file_size", &SqlType::Integer, non_null = true),
        sqlite_column!("file_size_mb", &SqlType::Real, non_null = true),
        sqlite_column!("format", &SqlType::Text),
        sqlite_column!("duration", &SqlType::Real),
        sqlite_column!("duration_formatted", &SqlType::Text),
        sqlite_column!("width", &SqlType::Integer),
        sqlite_column!("height", &SqlType::Integer),
        sqlite_column!("fps", &SqlType::Real),
        sqlite_column!("codec", &SqlType::Text),
        sqlite_column!("container_format", &SqlType::Text),
        sqlite_column!("bit_rate", &SqlType::Integer),
        sqlite_column!("audio_codec", &SqlType::Text),
        sqlite_column!("audio_channels", &SqlType::Integer),
        sqlite_column!("audio_sample_rate", &SqlType::Integer),
        sqlite_column!("metadata", &SqlType::Text, non_null = true),
        sqlite_column!(
            "directory_id",
            &SqlType::Integer,
            foreign_key = Some(&ForeignKey {
                foreign_table: "media_directories",
                foreign_column: "id",
                on_delete: ForeignKeyOnChange::SetNull,
            })
        ),
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
        sqlite_column!("updated_at", &SqlType::Text, non_null = true),
    ],
    indices: &[
        ("idx_media_assets_directory", "directory_id"),
        ("idx_media_assets_title", "title"),
    ],
    unique_constraints: &[],
};

const TAGS_TABLE_V1: Table = Table {
    name: "tags",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("name", &SqlType::Text, non_null = true, is_unique = true),
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[],
};

const ASSET_TAGS_TABLE_V1: Table = Table {
    name: "asset_tags",
    columns: &[
        sqlite_column!(
            "asset_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&ForeignKey {
                foreign_table: "media_assets",
                foreign_column: "id",
                on_delete: ForeignKeyOnChange::Cascade,
            })
        ),
        sqlite_column!(
            "tag_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&ForeignKey {
                foreign_table: "tags",
                foreign_column: "id",
                on_delete: ForeignKeyOnChange::Cascade,
            })
        ),
    ],
    indices: &[("idx_asset_tags_tag", "tag_id")],
    unique_constraints: &[&["asset_id", "tag_id"]],
};

const PROCESSING_RESULTS_TABLE_V1: Table = Table {
    name: "processing_results",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "asset_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&ForeignKey {
                foreign_table: "media_assets",
                foreign_column: "id",
                on_delete: ForeignKeyOnChange::Cascade,
            })
        ),
        sqlite_column!("processor_name", &SqlType::Text, non_null = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("result_data", &SqlType::Text),
        sqlite_column!("error_message", &SqlType::Text),
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
        sqlite_column!("updated_at", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_processing_results_asset", "asset_id")],
    unique_constraints: &[],
};

pub const MEDIA_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[
        MEDIA_DIRECTORIES_TABLE_V1,
        MEDIA_ASSETS_TABLE_V1,
        TAGS_TABLE_V1,
        ASSET_TAGS_TABLE_V1,
        PROCESSING_RESULTS_TABLE_V1,
    ],
    migration: None,
}];
