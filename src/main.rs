//! bookland entry point.

use bookland_rs::{
    config::{Cli, Command, Config},
    db::Database,
    library::{Book, Library},
};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bookland=info,bookland_rs=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Find or load config
    let config_path = cli.config.clone().or_else(Config::find_config_file);

    let config = if let Some(ref path) = config_path {
        Config::load(path)?
    } else {
        Config::default()
    };

    match cli.command {
        Some(Command::Init { force }) => cmd_init(force),
        Some(Command::Scan { dir }) => cmd_scan(&config, dir).await,
        Some(Command::Watch { dir, interval }) => cmd_watch(&config, dir, interval).await,
        Some(Command::Add { file }) => cmd_add(&config, file).await,
        Some(Command::List { json }) => cmd_list(&config, json),
        Some(Command::Cover { id, image }) => cmd_cover(&config, &id, &image),
        Some(Command::Remove { id }) => cmd_remove(&config, &id),
        None => cmd_scan(&config, None).await,
    }
}

fn open_library(config: &Config) -> anyhow::Result<Library> {
    let db = Database::open(&config.database_path())?;
    Ok(Library::new(config, db))
}

/// Initialize config and database.
fn cmd_init(force: bool) -> anyhow::Result<()> {
    let config_path = PathBuf::from("config.toml");

    if config_path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    std::fs::write(&config_path, Config::generate_default())?;
    println!("Created config file: {}", config_path.display());

    let config = Config::default();
    std::fs::create_dir_all(config.books_path())?;
    let _db = Database::open(&config.database_path())?;
    println!("Initialized database: {}", config.database_path().display());

    println!("\nDrop books into {} and run: bookland scan", config.books_path().display());

    Ok(())
}

/// Scan once and report what was added.
async fn cmd_scan(config: &Config, dir: Option<PathBuf>) -> anyhow::Result<()> {
    let dir = dir.unwrap_or_else(|| config.books_path());
    let library = Arc::new(open_library(config)?);

    let added = run_scan(library, dir.clone()).await?;
    println!("Added {} book(s) from {}", added.len(), dir.display());
    for book in &added {
        println!(
            "  {}  {} ({}) <- {}",
            book.id,
            book.title,
            book.author_display(),
            book.filename()
        );
    }

    Ok(())
}

/// Rescan on a fixed interval until interrupted.
async fn cmd_watch(config: &Config, dir: Option<PathBuf>, interval: Option<u64>) -> anyhow::Result<()> {
    let dir = dir.unwrap_or_else(|| config.books_path());
    let seconds = interval.unwrap_or(config.scan.interval_seconds);
    if seconds == 0 {
        anyhow::bail!("Watch interval must be positive (set [scan] interval_seconds or pass --interval)");
    }

    let library = Arc::new(open_library(config)?);
    tracing::info!(dir = %dir.display(), interval_seconds = seconds, "Watching library");

    let mut ticker = tokio::time::interval(Duration::from_secs(seconds));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                tracing::debug!("Running scheduled library scan");
                if let Err(e) = run_scan(Arc::clone(&library), dir.clone()).await {
                    tracing::warn!(error = %e, "Scheduled scan failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                return Ok(());
            }
        }
    }
}

/// Scans do blocking I/O and may wait on the PDF rasterizer, which must
/// not happen on a runtime worker.
async fn run_scan(library: Arc<Library>, dir: PathBuf) -> anyhow::Result<Vec<Book>> {
    let added = tokio::task::spawn_blocking(move || library.scan(&dir)).await??;
    Ok(added)
}

/// Imports may render a PDF cover, which blocks like a scan does.
async fn cmd_add(config: &Config, file: PathBuf) -> anyhow::Result<()> {
    let library = open_library(config)?;
    let book = tokio::task::spawn_blocking(move || library.import_file(&file)).await??;
    println!("Added: {} ({}, id: {})", book.title, book.file_type, book.id);
    Ok(())
}

fn cmd_list(config: &Config, json: bool) -> anyhow::Result<()> {
    let db = Database::open(&config.database_path())?;
    let books = db.list_books()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&books)?);
        return Ok(());
    }

    if books.is_empty() {
        println!("No books found.");
        return Ok(());
    }

    println!(
        "{:<36} {:<6} {:<16} {:<24} TITLE",
        "ID", "TYPE", "ADDED", "AUTHOR"
    );
    println!("{}", "-".repeat(100));
    for book in books {
        println!(
            "{:<36} {:<6} {:<16} {:<24} {}",
            book.id,
            book.file_type,
            book.added_at.format("%Y-%m-%d %H:%M"),
            truncate(book.author_display(), 24),
            book.title
        );
    }

    Ok(())
}

fn cmd_cover(config: &Config, id: &str, image: &Path) -> anyhow::Result<()> {
    let data = std::fs::read(image)?;
    let library = open_library(config)?;
    let cover = library.set_cover(id, &data)?;
    println!("Cover updated: {}", cover.display());
    Ok(())
}

fn cmd_remove(config: &Config, id: &str) -> anyhow::Result<()> {
    let library = open_library(config)?;
    let book = library.remove(id)?;
    println!("Removed: {} ({})", book.title, book.id);
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max - 1).collect();
        out.push('~');
        out
    }
}
