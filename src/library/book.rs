//! Book metadata model.

use crate::config::BookFormat;
use crate::formats::Extraction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// A registered book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    /// Unique identifier for the book.
    pub id: String,

    /// Book title.
    pub title: String,

    /// Author (empty when unknown).
    pub author: String,

    /// Extracted or uploaded cover image.
    pub cover_path: Option<PathBuf>,

    /// Path to the book file. Unique across the library.
    pub file_path: PathBuf,

    /// File size in bytes.
    pub file_size: u64,

    /// File format.
    pub file_type: BookFormat,

    /// When the book was registered.
    pub added_at: DateTime<Utc>,
}

impl Book {
    /// Build a book from extracted metadata.
    pub fn new(
        id: String,
        file_path: PathBuf,
        file_type: BookFormat,
        file_size: u64,
        extraction: Extraction,
    ) -> Self {
        Self {
            id,
            title: extraction.title,
            author: extraction.author,
            cover_path: extraction.cover_path,
            file_path,
            file_size,
            file_type,
            added_at: Utc::now(),
        }
    }

    /// Generate a fresh book identifier.
    pub fn generate_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Get the filename of the book.
    pub fn filename(&self) -> &str {
        self.file_path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
    }

    /// Get display name for the author.
    pub fn author_display(&self) -> &str {
        if self.author.is_empty() {
            "Unknown Author"
        } else {
            &self.author
        }
    }
}

/// Title used when a file carries no metadata: its name without extension.
pub fn fallback_title(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "Unknown".to_string())
}
