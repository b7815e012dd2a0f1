//! Directory scanning.

use crate::config::BookFormat;
use crate::db::Database;
use crate::error::{AppError, Result};
use crate::formats::Handlers;
use crate::library::book::{self, Book};
use crate::library::extract_book;
use crate::library::storage::Storage;
use std::path::Path;
use walkdir::WalkDir;

/// Registry of books already known to the library.
pub trait BookRegistry {
    /// ID of the book registered at `path`, if any.
    fn lookup_by_path(&self, path: &Path) -> Result<Option<String>>;

    /// Register a new book.
    fn insert(&self, book: &Book) -> Result<()>;
}

impl BookRegistry for Database {
    fn lookup_by_path(&self, path: &Path) -> Result<Option<String>> {
        self.find_book_by_path(path)
    }

    fn insert(&self, book: &Book) -> Result<()> {
        self.insert_book(book)
    }
}

/// Walks a directory and registers books not seen before.
///
/// Files are processed one at a time; a file that cannot be stat'ed or
/// registered is logged and skipped.
pub struct DirectoryScanner<'a> {
    registry: &'a dyn BookRegistry,
    handlers: &'a Handlers,
    storage: &'a Storage,
    recursive: bool,
}

impl<'a> DirectoryScanner<'a> {
    /// Create a scanner over the top level of a directory.
    pub fn new(registry: &'a dyn BookRegistry, handlers: &'a Handlers, storage: &'a Storage) -> Self {
        Self {
            registry,
            handlers,
            storage,
            recursive: false,
        }
    }

    /// Descend into subdirectories.
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Scan `dir` and return the newly registered books.
    ///
    /// Fails only if `dir` itself cannot be listed.
    pub fn scan(&self, dir: &Path) -> Result<Vec<Book>> {
        if !std::fs::metadata(dir)?.is_dir() {
            return Err(AppError::InvalidFormat(format!(
                "Not a directory: {}",
                dir.display()
            )));
        }

        let start = std::time::Instant::now();
        let max_depth = if self.recursive { usize::MAX } else { 1 };
        let walker = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(max_depth)
            .follow_links(true)
            .sort_by_file_name();

        let mut added = Vec::new();
        let mut skipped = 0usize;

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => return Err(AppError::Io(e.into())),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read directory entry");
                    continue;
                }
            };

            if entry.file_type().is_dir() {
                continue;
            }

            let path = entry.path();
            let Some(format) = BookFormat::from_path(path) else {
                continue;
            };

            match self.registry.lookup_by_path(path) {
                Ok(None) => {}
                Ok(Some(_)) => {
                    skipped += 1;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to look up book");
                    continue;
                }
            }

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to stat file");
                    continue;
                }
            };

            let book = extract_book(
                self.handlers,
                self.storage,
                Book::generate_id(),
                path,
                &book::fallback_title(path),
                format,
                metadata.len(),
            );

            if let Err(e) = self.registry.insert(&book) {
                tracing::warn!(path = %path.display(), title = %book.title, error = %e, "Failed to insert book");
                if let Err(e) = self.storage.remove_book_dir(&book.id) {
                    tracing::debug!(id = %book.id, error = %e, "Failed to clean up book directory");
                }
                continue;
            }

            tracing::info!(title = %book.title, author = %book.author, "Added book");
            added.push(book);
        }

        tracing::info!(
            dir = %dir.display(),
            added = added.len(),
            unchanged = skipped,
            elapsed = ?start.elapsed(),
            "Scan complete"
        );

        Ok(added)
    }
}
