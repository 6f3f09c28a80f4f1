use anyhow::{bail, Context, Result};
use clap::builder::styling::{AnsiColor, Color, Style};
use clap::builder::Styles;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use media_catalog::config::{self, AppConfig, CliConfig};
use media_catalog::media_store::{
    AssetFilter, AssetView, MediaStore, SqliteMediaStore, MEDIA_VERSIONED_SCHEMAS,
};
use media_catalog::media_tool::{FfmpegTool, MediaTool, RetryPolicy};
use media_catalog::metadata::extract_metadata;
use media_catalog::processors::{Processor, ProcessorRunner};
use media_catalog::scanner::Scanner;
use media_catalog::sqlite_persistence::DatabaseBackups;
use media_catalog::thumbnail::thumbnail_file_name;

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| e.to_string())?;
    Ok(cwd.join(original_path))
}

fn get_styles() -> Styles {
    let accent = Style::new()
        .bold()
        .fg_color(Some(Color::Ansi(AnsiColor::Cyan)));
    Styles::styled()
        .usage(accent.underline())
        .header(accent.underline())
        .literal(
            Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Green))),
        )
        .error(
            Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Red))),
        )
        .placeholder(Style::new().fg_color(Some(Color::Ansi(AnsiColor::BrightBlack))))
}

#[derive(Parser, Debug)]
#[command(styles = get_styles(), version)]
struct CliArgs {
    /// Directory holding the SQLite database (media.db).
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Root folder every indexed file must live under.
    #[clap(long, value_parser = parse_path)]
    pub media_root: Option<PathBuf>,

    /// Where thumbnails are written. Defaults to <db-dir>/thumbnails.
    #[clap(long, value_parser = parse_path)]
    pub thumbnails_dir: Option<PathBuf>,

    /// Path to a TOML config file. Values there override CLI flags.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// ffprobe executable.
    #[clap(long)]
    pub ffprobe: Option<String>,

    /// ffmpeg executable.
    #[clap(long)]
    pub ffmpeg: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

impl From<&CliArgs> for CliConfig {
    fn from(args: &CliArgs) -> Self {
        CliConfig {
            db_dir: args.db_dir.clone(),
            media_root: args.media_root.clone(),
            thumbnails_dir: args.thumbnails_dir.clone(),
            ffprobe_path: args.ffprobe.clone(),
            ffmpeg_path: args.ffmpeg.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Index new media files below a folder (the media root by default).
    Scan {
        #[clap(value_parser = parse_path)]
        path: Option<PathBuf>,

        /// Attach new assets to this registered directory.
        #[clap(long)]
        directory_id: Option<i64>,
    },

    /// Register a watched directory.
    AddDir {
        #[clap(value_parser = parse_path)]
        path: PathBuf,

        #[clap(long)]
        name: Option<String>,
    },

    /// List registered directories.
    Dirs {
        #[clap(long)]
        active_only: bool,
    },

    /// Enable or disable a registered directory.
    SetDirActive {
        id: i64,

        #[clap(action = clap::ArgAction::Set)]
        active: bool,
    },

    /// Forget a registered directory. Its assets are kept.
    RemoveDir { id: i64 },

    /// Scan every active registered directory.
    ScanAll,

    /// Print the metadata record of a single file without indexing it.
    Probe {
        #[clap(value_parser = parse_path)]
        file: PathBuf,
    },

    /// Make sure an asset has a thumbnail.
    Thumbnail { id: i64 },

    /// Rebuild missing thumbnails, or all of them with --force.
    RegenThumbnails {
        #[clap(long)]
        force: bool,
    },

    /// Delete thumbnail files that no asset refers to.
    CleanupThumbnails,

    /// Re-probe assets with missing duration or a changed file size.
    RefreshMetadata {
        /// Re-probe every asset.
        #[clap(long)]
        all: bool,

        /// Re-probe only these assets. May be repeated.
        #[clap(long = "id")]
        ids: Vec<i64>,
    },

    /// List assets.
    List {
        #[clap(long)]
        tag: Option<String>,

        /// Case-insensitive match on title and description.
        #[clap(long)]
        search: Option<String>,

        #[clap(long)]
        directory: Option<i64>,

        #[clap(long)]
        limit: Option<usize>,

        #[clap(long, default_value_t = 0)]
        offset: usize,
    },

    /// Show one asset.
    Show { id: i64 },

    /// Add a tag to an asset.
    Tag { id: i64, tag: String },

    /// Remove a tag from an asset.
    Untag { id: i64, tag: String },

    /// Delete an asset together with its thumbnail.
    Delete { id: i64 },

    /// Run an analysis processor on an asset. All processors run when none
    /// is given.
    Analyze {
        id: i64,

        #[clap(value_enum)]
        processor: Option<Processor>,
    },

    /// Show the processing history of an asset.
    Results { id: i64 },

    /// Write a compressed backup of the catalog database.
    Backup,

    /// List database backups, oldest first.
    Backups,

    /// Replace the catalog database with a backup.
    Restore {
        #[clap(value_parser = parse_path)]
        file: PathBuf,
    },
}

fn database_backups(config: &AppConfig) -> DatabaseBackups {
    DatabaseBackups::new(
        &config.media_db_path(),
        &config.backup.dir,
        config.backup.max_backups,
    )
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

struct Services {
    config: AppConfig,
    store: Arc<dyn MediaStore>,
    tool: Arc<dyn MediaTool>,
}

impl Services {
    fn open(config: AppConfig) -> Result<Self> {
        let db_path = config.media_db_path();
        if !db_path.exists() {
            info!("Creating new media database at {:?}", db_path);
        }
        let store: Arc<dyn MediaStore> = Arc::new(SqliteMediaStore::new(
            &db_path,
            config.scan.extensions.clone(),
        )?);
        let tool: Arc<dyn MediaTool> = Arc::new(FfmpegTool::new(&config.tool));
        Ok(Self {
            config,
            store,
            tool,
        })
    }

    fn scanner(&self) -> Scanner {
        Scanner::new(&self.config, self.store.clone(), self.tool.clone())
    }

    fn require_view(&self, id: i64) -> Result<AssetView> {
        self.store
            .get_asset_view(id)?
            .with_context(|| format!("Asset {} not found", id))
    }
}

async fn run_command(services: &Services, command: Command) -> Result<()> {
    let config = &services.config;
    let store = services.store.as_ref();

    match command {
        Command::Scan { path, directory_id } => {
            let root = path.unwrap_or_else(|| config.media_root.clone());
            let report = services.scanner().scan(&root, directory_id).await?;
            let total_bytes: i64 = report.assets.iter().map(|a| a.file_size).sum();
            info!(
                "Indexed {} new assets ({:#})",
                report.assets.len(),
                byte_unit::Byte::from(total_bytes.max(0) as u64)
            );
            print_json(&report)?;
        }
        Command::AddDir { path, name } => {
            let directory = store.create_directory(&path, name.as_deref())?;
            print_json(&directory)?;
        }
        Command::Dirs { active_only } => {
            print_json(&store.list_directories(active_only)?)?;
        }
        Command::SetDirActive { id, active } => {
            store.set_directory_active(id, active)?;
            print_json(&store.get_directory(id)?)?;
        }
        Command::RemoveDir { id } => {
            if !store.delete_directory(id)? {
                bail!("Directory {} not found", id);
            }
            info!("Removed directory {}", id);
        }
        Command::ScanAll => {
            let reports = services.scanner().scan_all_active().await?;
            print_json(&reports)?;
        }
        Command::Probe { file } => {
            let retry = RetryPolicy::new(
                config.tool.probe_attempts,
                std::time::Duration::from_millis(config.tool.retry_backoff_ms),
            );
            let record = extract_metadata(services.tool.as_ref(), &file, &retry).await;
            print_json(&record.to_json())?;
        }
        Command::Thumbnail { id } => {
            let asset = store
                .get_asset(id)?
                .with_context(|| format!("Asset {} not found", id))?;
            let scanner = services.scanner();
            let input = config.media_root.join(&asset.file_path);
            match scanner
                .thumbnails()
                .ensure_thumbnail(&input, &config.thumbnails_dir, id)
                .await
            {
                Some(name) => store.set_asset_thumbnail(id, Some(&name))?,
                None => bail!("Could not generate a thumbnail for asset {}", id),
            }
            print_json(&services.require_view(id)?)?;
        }
        Command::RegenThumbnails { force } => {
            let report = services
                .scanner()
                .thumbnails()
                .regenerate_all(store, &config.media_root, &config.thumbnails_dir, force)
                .await?;
            print_json(&report)?;
        }
        Command::CleanupThumbnails => {
            let report = services
                .scanner()
                .thumbnails()
                .cleanup_orphans(store, &config.thumbnails_dir)?;
            print_json(&report)?;
        }
        Command::RefreshMetadata { all, ids } => {
            let only = (!ids.is_empty()).then_some(ids.as_slice());
            let report = services.scanner().refresh_metadata(all, only).await?;
            print_json(&report)?;
        }
        Command::List {
            tag,
            search,
            directory,
            limit,
            offset,
        } => {
            let filter = AssetFilter {
                tag,
                search,
                directory_id: directory,
                limit,
                offset,
            };
            let mut views = Vec::new();
            for asset in store.list_assets(&filter)? {
                let tags = store.get_asset_tags(asset.id)?;
                views.push(AssetView::new(&asset, tags));
            }
            print_json(&views)?;
        }
        Command::Show { id } => {
            print_json(&services.require_view(id)?)?;
        }
        Command::Tag { id, tag } => {
            store.tag_asset(id, &tag)?;
            print_json(&services.require_view(id)?)?;
        }
        Command::Untag { id, tag } => {
            if !store.untag_asset(id, &tag)? {
                warn!("Asset {} was not tagged '{}'", id, tag);
            }
            print_json(&services.require_view(id)?)?;
        }
        Command::Delete { id } => {
            let asset = store
                .get_asset(id)?
                .with_context(|| format!("Asset {} not found", id))?;
            store.delete_asset(id)?;
            let name = asset
                .thumbnail()
                .map(str::to_string)
                .unwrap_or_else(|| thumbnail_file_name(id));
            remove_thumbnail(&config.thumbnails_dir.join(name));
            info!("Deleted asset {} ({})", id, asset.file_path);
        }
        Command::Analyze { id, processor } => {
            let runner = ProcessorRunner::new(
                services.store.clone(),
                services.tool.clone(),
                config.processors.clone(),
                config.media_root.clone(),
            );
            let processors = match processor {
                Some(p) => vec![p],
                None => Processor::ALL.to_vec(),
            };
            let mut results = Vec::new();
            for outcome in runner.run_all(id, &processors).await {
                results.push(outcome?);
            }
            print_json(&results)?;
        }
        Command::Results { id } => {
            print_json(&store.list_processing_results(id)?)?;
        }
        Command::Backup => {
            print_json(&database_backups(config).create()?)?;
        }
        Command::Backups => {
            print_json(&database_backups(config).list()?)?;
        }
        Command::Restore { file } => restore_database(config, &file)?,
    }
    Ok(())
}

fn restore_database(config: &AppConfig, file: &Path) -> Result<()> {
    database_backups(config).restore(file, MEDIA_VERSIONED_SCHEMAS)?;
    info!("Restored catalog database from {:?}", file);
    Ok(())
}

fn remove_thumbnail(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => info!("Removed thumbnail {:?}", path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove thumbnail {:?}: {}", path, e),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    // Load TOML config if provided
    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    let cli_config: CliConfig = (&cli_args).into();
    let app_config = AppConfig::resolve(&cli_config, file_config)?;

    info!("Configuration loaded:");
    info!("  db_dir: {:?}", app_config.db_dir);
    info!("  media_root: {:?}", app_config.media_root);
    info!("  thumbnails_dir: {:?}", app_config.thumbnails_dir);

    // Restoring replaces the database file, so it runs before the store opens.
    if let Command::Restore { file } = &cli_args.command {
        return restore_database(&app_config, file);
    }

    let services = Services::open(app_config)?;
    run_command(&services, cli_args.command).await
}
