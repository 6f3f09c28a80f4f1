//! Temporary catalog fixtures
//!
//! Each [`TestCatalog`] owns its own db dir and media root; both are removed
//! when it is dropped.

use super::fake_tool::FakeMediaTool;
use media_catalog::config::{AppConfig, CliConfig, FileConfig};
use media_catalog::media_store::SqliteMediaStore;
use media_catalog::processors::ProcessorRunner;
use media_catalog::scanner::Scanner;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

pub struct TestCatalog {
    _db_dir: TempDir,
    media: TempDir,
    pub config: AppConfig,
    pub store: Arc<SqliteMediaStore>,
    pub tool: Arc<FakeMediaTool>,
}

#[allow(dead_code)]
impl TestCatalog {
    pub fn new() -> Self {
        Self::with_toml("")
    }

    /// Build a catalog whose settings come from a TOML snippet, the way a
    /// config file passed with `--config` would provide them.
    pub fn with_toml(toml_config: &str) -> Self {
        let db_dir = TempDir::new().unwrap();
        let media = TempDir::new().unwrap();
        let file_config: FileConfig = toml::from_str(toml_config).unwrap();
        let cli = CliConfig {
            db_dir: Some(db_dir.path().to_path_buf()),
            media_root: Some(media.path().to_path_buf()),
            ..Default::default()
        };
        let mut config = AppConfig::resolve(&cli, Some(file_config)).unwrap();
        config.tool.retry_backoff_ms = 0;

        let store = Arc::new(
            SqliteMediaStore::new(config.media_db_path(), config.scan.extensions.clone()).unwrap(),
        );
        Self {
            _db_dir: db_dir,
            media,
            config,
            store,
            tool: Arc::new(FakeMediaTool::new()),
        }
    }

    pub fn media_root(&self) -> &Path {
        self.media.path()
    }

    pub fn thumbnails_dir(&self) -> &Path {
        &self.config.thumbnails_dir
    }

    pub fn scanner(&self) -> Scanner {
        Scanner::new(&self.config, self.store.clone(), self.tool.clone())
    }

    pub fn processor_runner(&self) -> ProcessorRunner {
        ProcessorRunner::new(
            self.store.clone(),
            self.tool.clone(),
            self.config.processors.clone(),
            self.config.media_root.clone(),
        )
    }

    /// Open a second store on the same database file.
    pub fn reopen_store(&self) -> SqliteMediaStore {
        SqliteMediaStore::new(self.config.media_db_path(), self.config.scan.extensions.clone())
            .unwrap()
    }

    /// Write `contents` to `rel` under the media root, creating parents.
    pub fn write_media(&self, rel: &str, contents: &str) -> PathBuf {
        let path = self.media.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, contents).unwrap();
        path
    }

    pub fn mkdir(&self, rel: &str) -> PathBuf {
        let path = self.media.path().join(rel);
        std::fs::create_dir_all(&path).unwrap();
        path
    }

    /// Sorted file names currently in the thumbnails dir.
    pub fn thumbnail_files(&self) -> Vec<String> {
        let mut names: Vec<String> = match std::fs::read_dir(self.thumbnails_dir()) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().to_string())
                .collect(),
            Err(_) => Vec::new(),
        };
        names.sort();
        names
    }
}
