use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Personal e-book library manager.
#[derive(Parser, Debug, Clone)]
#[command(name = "bookland")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file.
    #[arg(short, long, env = "BOOKLAND_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Scan a directory and register new books (default if no command given).
    Scan {
        /// Directory to scan (defaults to the configured books path).
        dir: Option<PathBuf>,
    },

    /// Rescan a directory periodically.
    Watch {
        /// Directory to scan (defaults to the configured books path).
        dir: Option<PathBuf>,

        /// Seconds between scans (overrides the config file).
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Import a single book file into managed storage.
    Add {
        /// Book file to import.
        file: PathBuf,
    },

    /// List registered books.
    List {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Replace the cover of a book.
    Cover {
        /// Book ID.
        id: String,
        /// Image file (JPEG, PNG, GIF or WebP).
        image: PathBuf,
    },

    /// Remove a book and its managed storage.
    Remove {
        /// Book ID.
        id: String,
    },

    /// Create a default config file and initialize the database.
    Init {
        /// Force overwrite existing config.
        #[arg(short, long)]
        force: bool,
    },
}

/// Main configuration from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Storage locations.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Scan configuration.
    #[serde(default)]
    pub scan: ScanConfig,

    /// PDF cover rendering.
    #[serde(default)]
    pub pdf: PdfConfig,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root of all managed data (database, per-book directories).
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,

    /// Directory scanned for books. Defaults to `<data_path>/books`.
    #[serde(default)]
    pub books_path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_path: default_data_path(),
            books_path: None,
        }
    }
}

fn default_data_path() -> PathBuf {
    PathBuf::from("data")
}

/// Database configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file. Defaults to `<data_path>/books.db`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Scan configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Descend into subdirectories.
    #[serde(default)]
    pub recursive: bool,

    /// Rescan interval in seconds for `watch` (0 to disable).
    #[serde(default)]
    pub interval_seconds: u64,
}

/// External page rasterizer used for PDF covers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdfConfig {
    /// Rasterizer executable (poppler's `pdftoppm` command line).
    #[serde(default = "default_rasterizer")]
    pub rasterizer: String,

    /// Hard limit for a single render.
    #[serde(default = "default_pdf_timeout")]
    pub timeout_seconds: u64,

    /// Bounding size in pixels of the rendered page.
    #[serde(default = "default_scale_to")]
    pub scale_to: u32,
}

impl Default for PdfConfig {
    fn default() -> Self {
        Self {
            rasterizer: default_rasterizer(),
            timeout_seconds: default_pdf_timeout(),
            scale_to: default_scale_to(),
        }
    }
}

impl PdfConfig {
    /// Render timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

fn default_rasterizer() -> String {
    "pdftoppm".to_string()
}

fn default_pdf_timeout() -> u64 {
    30
}

fn default_scale_to() -> u32 {
    800
}

impl Config {
    /// Load configuration from file.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to read config file: {}", e))
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to parse config file: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would silently disable a feature.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.pdf.timeout_seconds == 0 {
            return Err(crate::error::AppError::Config(
                "pdf.timeout_seconds must be positive".to_string(),
            ));
        }
        if self.pdf.scale_to == 0 {
            return Err(crate::error::AppError::Config(
                "pdf.scale_to must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Find config file in default locations.
    pub fn find_config_file() -> Option<PathBuf> {
        let candidates = [
            PathBuf::from("config.toml"),
            PathBuf::from("bookland.toml"),
            dirs::config_dir()
                .map(|p| p.join("bookland").join("config.toml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/bookland/config.toml"),
        ];

        candidates.into_iter().find(|p| p.exists())
    }

    /// Directory scanned for books.
    pub fn books_path(&self) -> PathBuf {
        self.storage
            .books_path
            .clone()
            .unwrap_or_else(|| self.storage.data_path.join("books"))
    }

    /// SQLite database location.
    pub fn database_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(|| self.storage.data_path.join("books.db"))
    }

    /// Generate default config file content.
    pub fn generate_default() -> String {
        r#"# bookland configuration

[storage]
data_path = "data"
# Directory scanned for books (defaults to <data_path>/books)
# books_path = "/mnt/nas/Books"

[database]
# path = "data/books.db"

[scan]
# Descend into subdirectories
recursive = false
# Rescan interval in seconds for `bookland watch` (0 to disable)
interval_seconds = 0

[pdf]
# Page rasterizer used for PDF covers (poppler-utils)
rasterizer = "pdftoppm"
timeout_seconds = 30
scale_to = 800
"#
        .to_string()
    }
}

/// Supported book formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookFormat {
    /// EPUB format (Electronic Publication).
    Epub,
    /// PDF format (Portable Document Format).
    Pdf,
    /// MOBI format (Mobipocket eBook).
    Mobi,
    /// AZW3 format (Kindle Format 8).
    Azw3,
    /// FB2 format (FictionBook).
    Fb2,
    /// CBZ format (Comic Book ZIP archive).
    Cbz,
}

impl BookFormat {
    /// Value stored in the `file_type` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            BookFormat::Epub => "epub",
            BookFormat::Pdf => "pdf",
            BookFormat::Mobi => "mobi",
            BookFormat::Azw3 => "azw3",
            BookFormat::Fb2 => "fb2",
            BookFormat::Cbz => "cbz",
        }
    }

    /// Try to detect format from file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "epub" => Some(BookFormat::Epub),
            "pdf" => Some(BookFormat::Pdf),
            "mobi" => Some(BookFormat::Mobi),
            "azw3" => Some(BookFormat::Azw3),
            "fb2" => Some(BookFormat::Fb2),
            "cbz" => Some(BookFormat::Cbz),
            _ => None,
        }
    }

    /// Detect format from a file path's extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }
}

impl std::fmt::Display for BookFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}
