//! Compressed snapshots of a SQLite database file.
//!
//! Backups are gzip files named `{db stem}_{UTC timestamp}.gz`, so sorting by
//! file name orders them oldest first. Only the newest `max_backups` are kept.

use super::{open_versioned_db, VersionedSchema};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use rusqlite::{params, Connection, OpenFlags};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const BACKUP_EXTENSION: &str = "gz";

pub struct DatabaseBackups {
    db_path: PathBuf,
    dir: PathBuf,
    max_backups: usize,
}

impl DatabaseBackups {
    pub fn new(db_path: &Path, dir: &Path, max_backups: usize) -> Self {
        Self {
            db_path: db_path.to_path_buf(),
            dir: dir.to_path_buf(),
            max_backups: max_backups.max(1),
        }
    }

    fn prefix(&self) -> String {
        let stem = self
            .db_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "db".to_string());
        format!("{}_", stem)
    }

    fn is_backup_name(&self, name: &str) -> bool {
        name.starts_with(&self.prefix()) && name.ends_with(&format!(".{}", BACKUP_EXTENSION))
    }

    /// Existing backups, oldest first.
    pub fn list(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut backups: Vec<PathBuf> = fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to read backup directory {:?}", self.dir))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| self.is_backup_name(n))
            })
            .collect();
        backups.sort();
        Ok(backups)
    }

    fn next_backup_path(&self) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S_%3f");
        let base = format!("{}{}", self.prefix(), stamp);
        let mut candidate = self.dir.join(format!("{}.{}", base, BACKUP_EXTENSION));
        let mut n = 1;
        while candidate.exists() {
            candidate = self
                .dir
                .join(format!("{}_{}.{}", base, n, BACKUP_EXTENSION));
            n += 1;
        }
        candidate
    }

    /// Write a consistent snapshot of the database, compress it and drop the
    /// oldest backups beyond the limit. Returns the new backup's path.
    pub fn create(&self) -> Result<PathBuf> {
        if !self.db_path.is_file() {
            bail!("Database file not found: {:?}", self.db_path);
        }
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create backup directory {:?}", self.dir))?;

        let target = self.next_backup_path();
        let snapshot = target.with_extension("snapshot");
        let result = self
            .snapshot_to(&snapshot)
            .and_then(|_| compress(&snapshot, &target));
        let _ = fs::remove_file(&snapshot);
        if let Err(e) = result {
            let _ = fs::remove_file(&target);
            return Err(e);
        }
        info!("Database backup written to {:?}", target);

        self.rotate()?;
        Ok(target)
    }

    fn snapshot_to(&self, snapshot: &Path) -> Result<()> {
        let conn = Connection::open_with_flags(&self.db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .with_context(|| format!("Failed to open database at {:?}", self.db_path))?;
        let snapshot_str = snapshot
            .to_str()
            .with_context(|| format!("Backup path is not valid UTF-8: {:?}", snapshot))?;
        conn.execute("VACUUM INTO ?1", params![snapshot_str])
            .with_context(|| format!("Failed to snapshot database into {:?}", snapshot))?;
        Ok(())
    }

    fn rotate(&self) -> Result<()> {
        let backups = self.list()?;
        let excess = backups.len().saturating_sub(self.max_backups);
        for old in &backups[..excess] {
            match fs::remove_file(old) {
                Ok(()) => debug!("Removed old backup {:?}", old),
                Err(e) => warn!("Failed to remove old backup {:?}: {}", old, e),
            }
        }
        Ok(())
    }

    /// Replace the database file with the contents of `backup`.
    ///
    /// The backup is decompressed next to the database and validated against
    /// `schemas` before it is moved into place. The database must not be open
    /// elsewhere while this runs.
    pub fn restore(&self, backup: &Path, schemas: &'static [VersionedSchema]) -> Result<()> {
        if !backup.is_file() {
            bail!("Backup file not found: {:?}", backup);
        }
        let staged = self.db_path.with_extension("tmp");
        let result = decompress(backup, &staged).and_then(|_| {
            open_versioned_db(&staged, schemas)
                .map(drop)
                .with_context(|| format!("Backup {:?} is not a valid catalog database", backup))
        });
        let result = result.and_then(|_| {
            fs::rename(&staged, &self.db_path).with_context(|| {
                format!("Failed to move restored database to {:?}", self.db_path)
            })
        });
        if let Err(e) = result {
            let _ = fs::remove_file(&staged);
            return Err(e);
        }
        info!("Database {:?} restored from {:?}", self.db_path, backup);
        Ok(())
    }
}

fn compress(source: &Path, target: &Path) -> Result<()> {
    let mut input = BufReader::new(
        File::open(source).with_context(|| format!("Failed to open {:?}", source))?,
    );
    let output = File::create(target).with_context(|| format!("Failed to create {:?}", target))?;
    let mut encoder = GzEncoder::new(BufWriter::new(output), Compression::default());
    io::copy(&mut input, &mut encoder)?;
    encoder.finish()?.flush()?;
    Ok(())
}

fn decompress(source: &Path, target: &Path) -> Result<()> {
    let input = File::open(source).with_context(|| format!("Failed to open {:?}", source))?;
    let mut decoder = GzDecoder::new(BufReader::new(input));
    let output = File::create(target).with_context(|| format!("Failed to create {:?}", target))?;
    let mut output = BufWriter::new(output);
    io::copy(&mut decoder, &mut output)
        .with_context(|| format!("Failed to decompress backup {:?}", source))?;
    output.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite_persistence::{Column, SqlType, Table};
    use crate::sqlite_column;
    use tempfile::TempDir;

    const NOTES_TABLE: Table = Table {
        name: "notes",
        columns: &[
            sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
            sqlite_column!("body", &SqlType::Text, non_null = true),
        ],
        indices: &[],
        unique_constraints: &[],
    };

    const NOTES_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
        version: 1,
        tables: &[NOTES_TABLE],
        migration: None,
    }];

    fn notes_db(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("notes.db");
        let conn = open_versioned_db(&path, NOTES_SCHEMAS).unwrap();
        conn.execute("INSERT INTO notes (body) VALUES ('first')", [])
            .unwrap();
        path
    }

    fn bodies(path: &Path) -> Vec<String> {
        let conn = open_versioned_db(path, NOTES_SCHEMAS).unwrap();
        let mut stmt = conn.prepare("SELECT body FROM notes ORDER BY id").unwrap();
        let bodies = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<Vec<String>>>()
            .unwrap();
        bodies
    }

    #[test]
    fn backup_then_restore_round_trips() {
        let dir = TempDir::new().unwrap();
        let db_path = notes_db(&dir);
        let backups = DatabaseBackups::new(&db_path, &dir.path().join("backups"), 5);

        let backup = backups.create().unwrap();
        let name = backup.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("notes_"));
        assert!(name.ends_with(".gz"));

        {
            let conn = open_versioned_db(&db_path, NOTES_SCHEMAS).unwrap();
            conn.execute("DELETE FROM notes", []).unwrap();
            conn.execute("INSERT INTO notes (body) VALUES ('later')", [])
                .unwrap();
        }
        assert_eq!(bodies(&db_path), vec!["later".to_string()]);

        backups.restore(&backup, NOTES_SCHEMAS).unwrap();

        assert_eq!(bodies(&db_path), vec!["first".to_string()]);
        assert!(!db_path.with_extension("tmp").exists());
    }

    #[test]
    fn keeps_only_the_newest_backups() {
        let dir = TempDir::new().unwrap();
        let db_path = notes_db(&dir);
        let backup_dir = dir.path().join("backups");
        let backups = DatabaseBackups::new(&db_path, &backup_dir, 3);
        fs::create_dir_all(&backup_dir).unwrap();
        fs::write(backup_dir.join("unrelated.gz"), b"keep me").unwrap();

        let created: Vec<PathBuf> = (0..5).map(|_| backups.create().unwrap()).collect();

        let remaining = backups.list().unwrap();
        assert_eq!(remaining, created[2..].to_vec());
        assert!(!created[0].exists());
        assert!(!created[1].exists());
        assert!(backup_dir.join("unrelated.gz").exists());
    }

    #[test]
    fn corrupt_backup_leaves_database_untouched() {
        let dir = TempDir::new().unwrap();
        let db_path = notes_db(&dir);
        let backups = DatabaseBackups::new(&db_path, &dir.path().join("backups"), 5);
        let bogus = dir.path().join("bogus.gz");
        fs::write(&bogus, b"definitely not gzip").unwrap();

        assert!(backups.restore(&bogus, NOTES_SCHEMAS).is_err());
        assert!(backups.restore(&dir.path().join("missing.gz"), NOTES_SCHEMAS).is_err());

        assert_eq!(bodies(&db_path), vec!["first".to_string()]);
        assert!(!db_path.with_extension("tmp").exists());
    }

    #[test]
    fn missing_database_cannot_be_backed_up() {
        let dir = TempDir::new().unwrap();
        let backups = DatabaseBackups::new(
            &dir.path().join("absent.db"),
            &dir.path().join("backups"),
            5,
        );
        assert!(backups.create().is_err());
        assert!(backups.list().unwrap().is_empty());
    }
}
