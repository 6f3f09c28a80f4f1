mod backup;
mod versioned_schema;

pub use backup::DatabaseBackups;

pub use versioned_schema::*;

use anyhow::{bail, Context, Result};
use rusqlite::Connection;
use std::path::Path;
use tracing::info;

/// Opens the database at `path`, creating the latest schema for a fresh file
/// or validating and migrating an existing one.
///
/// `schemas` must be ordered by ascending version with no gaps.
pub fn open_versioned_db(path: &Path, schemas: &'static [VersionedSchema]) -> Result<Connection> {
    let is_new_db = !path.exists();
    let mut conn = Connection::open(path)
        .with_context(|| format!("Failed to open database at {:?}", path))?;
    conn.execute("PRAGMA foreign_keys = ON;", [])?;

    let latest = schemas
        .last()
        .context("At least one schema version must be defined")?;

    if is_new_db {
        info!("Creating database at {:?} (schema v{})", path, latest.version);
        latest.create(&conn)?;
        return Ok(conn);
    }

    let db_version = read_schema_version(&conn)?;
    let version_index = schemas
        .iter()
        .position(|s| s.version == db_version)
        .with_context(|| format!("Unknown database version {} at {:?}", db_version, path))?;
    schemas[version_index]
        .validate(&conn)
        .with_context(|| format!("Schema validation failed for version {}", db_version))?;

    if db_version < latest.version {
        info!(
            "Migrating database {:?} from version {} to {}",
            path, db_version, latest.version
        );
        migrate(&mut conn, schemas, db_version)?;
    }
    Ok(conn)
}

/// Creates the latest schema on a fresh in-memory connection.
pub fn open_in_memory_db(schemas: &'static [VersionedSchema]) -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.execute("PRAGMA foreign_keys = ON;", [])?;
    schemas
        .last()
        .context("At least one schema version must be defined")?
        .create(&conn)?;
    Ok(conn)
}

fn read_schema_version(conn: &Connection) -> Result<usize> {
    let raw_version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    let db_version = raw_version - BASE_DB_VERSION as i64;
    if db_version < 1 {
        bail!("Database version {} is invalid (expected >= 1)", db_version);
    }
    Ok(db_version as usize)
}

fn migrate(
    conn: &mut Connection,
    schemas: &'static [VersionedSchema],
    from_version: usize,
) -> Result<()> {
    let tx = conn.transaction()?;
    let mut current = from_version;
    for schema in schemas.iter().filter(|s| s.version > from_version) {
        if let Some(migration_fn) = schema.migration {
            migration_fn(&tx).with_context(|| {
                format!(
                    "Failed to migrate from version {} to {}",
                    current, schema.version
                )
            })?;
        }
        current = schema.version;
    }
    tx.execute(
        &format!("PRAGMA user_version = {}", BASE_DB_VERSION + current),
        [],
    )?;
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite_column;
    use tempfile::TempDir;

    const NOTES_V1: Table = Table {
        name: "notes",
        columns: &[
            sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
            sqlite_column!("body", &SqlType::Text, non_null = true),
        ],
        indices: &[],
        unique_constraints: &[],
    };

    const NOTES_V2: Table = Table {
        name: "notes",
        columns: &[
            sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
            sqlite_column!("body", &SqlType::Text, non_null = true),
            sqlite_column!("pinned", &SqlType::Integer, non_null = true, default_value = Some("0")),
        ],
        indices: &[],
        unique_constraints: &[],
    };

    fn add_pinned_column(conn: &Connection) -> Result<()> {
        conn.execute(
            "ALTER TABLE notes ADD COLUMN pinned INTEGER NOT NULL DEFAULT 0",
            [],
        )?;
        Ok(())
    }

    static V1_ONLY: [VersionedSchema; 1] = [VersionedSchema {
        version: 1,
        tables: &[NOTES_V1],
        migration: None,
    }];

    static V1_AND_V2: [VersionedSchema; 2] = [
        VersionedSchema {
            version: 1,
            tables: &[NOTES_V1],
            migration: None,
        },
        VersionedSchema {
            version: 2,
            tables: &[NOTES_V2],
            migration: Some(add_pinned_column),
        },
    ];

    #[test]
    fn creates_fresh_db_at_latest_version() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("notes.db");

        let conn = open_versioned_db(&path, &V1_AND_V2).unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), 2);
        V1_AND_V2[1].validate(&conn).unwrap();
    }

    #[test]
    fn migrates_existing_db_forward() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("notes.db");

        {
            let conn = open_versioned_db(&path, &V1_ONLY).unwrap();
            conn.execute("INSERT INTO notes (body) VALUES ('hello')", [])
                .unwrap();
        }

        let conn = open_versioned_db(&path, &V1_AND_V2).unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), 2);
        let pinned: i64 = conn
            .query_row("SELECT pinned FROM notes WHERE body = 'hello'", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(pinned, 0);
    }

    #[test]
    fn rejects_db_without_version() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("foreign.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute("CREATE TABLE other (id INTEGER)", []).unwrap();
        }

        let result = open_versioned_db(&path, &V1_ONLY);
        assert!(result.is_err());
    }
}
