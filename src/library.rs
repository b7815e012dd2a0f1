pub mod book;
pub mod scanner;
pub mod storage;

pub use book::Book;
pub use scanner::{BookRegistry, DirectoryScanner};
pub use storage::Storage;

use crate::config::{BookFormat, Config};
use crate::db::Database;
use crate::error::{AppError, Result};
use crate::formats::image::{self, ImageKind};
use crate::formats::{ExtractRequest, Handlers, PdfCoverExtractor};
use crate::process::{ProcessRunner, SystemRunner};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Run the matching extractor for a book file and build its record.
///
/// The cover, if any, lands in the book's storage directory. `fallback`
/// is the title used when the file carries none.
pub(crate) fn extract_book(
    handlers: &Handlers,
    storage: &Storage,
    id: String,
    path: &Path,
    fallback: &str,
    format: BookFormat,
    file_size: u64,
) -> Book {
    let cover_dir = storage.book_dir(&id);

    let extraction = handlers.get(format).extract(&ExtractRequest {
        path,
        cover_dir: &cover_dir,
        fallback_title: fallback,
        book_id: &id,
    });

    Book::new(id, path.to_path_buf(), format, file_size, extraction)
}

/// The book library: registry, managed storage and extractors.
pub struct Library {
    db: Database,
    handlers: Handlers,
    storage: Storage,
    recursive: bool,
}

impl Library {
    /// Create a library using real child processes for PDF rendering.
    ///
    /// Call from inside the tokio runtime that will drive the renders.
    pub fn new(config: &Config, db: Database) -> Self {
        Self::with_runner(config, db, Arc::new(SystemRunner::new()))
    }

    /// Create a library with a custom process runner.
    pub fn with_runner(config: &Config, db: Database, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            db,
            handlers: Handlers::new(PdfCoverExtractor::new(&config.pdf, runner)),
            storage: Storage::new(&config.storage.data_path),
            recursive: config.scan.recursive,
        }
    }

    /// Underlying database.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Managed storage layout.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Scan a directory, registering books not seen before.
    pub fn scan(&self, dir: &Path) -> Result<Vec<Book>> {
        DirectoryScanner::new(&self.db, &self.handlers, &self.storage)
            .recursive(self.recursive)
            .scan(dir)
    }

    /// Copy a book file into managed storage and register it.
    pub fn import_file(&self, source: &Path) -> Result<Book> {
        let format = BookFormat::from_path(source).ok_or_else(|| {
            AppError::InvalidFormat(format!("Unsupported file type: {}", source.display()))
        })?;

        let id = Book::generate_id();
        let book_dir = self.storage.book_dir(&id);
        std::fs::create_dir_all(&book_dir)?;

        let dest = book_dir.join(format!("book.{}", format));
        let result = std::fs::copy(source, &dest)
            .map_err(AppError::from)
            .and_then(|file_size| {
                let fallback = book::fallback_title(source);
                let book = extract_book(
                    &self.handlers,
                    &self.storage,
                    id.clone(),
                    &dest,
                    &fallback,
                    format,
                    file_size,
                );
                self.db.insert_book(&book)?;
                Ok(book)
            });

        match result {
            Ok(book) => {
                tracing::info!(id = %book.id, title = %book.title, "Imported book");
                Ok(book)
            }
            Err(e) => {
                if let Err(cleanup) = self.storage.remove_book_dir(&id) {
                    tracing::debug!(id = %id, error = %cleanup, "Failed to clean up book directory");
                }
                Err(e)
            }
        }
    }

    /// Replace a book's cover with user-supplied image bytes.
    pub fn set_cover(&self, id: &str, data: &[u8]) -> Result<PathBuf> {
        let book = self
            .db
            .get_book(id)?
            .ok_or_else(|| AppError::NotFound(id.to_string()))?;

        let kind = image::classify(data);
        if kind == ImageKind::Invalid {
            return Err(AppError::InvalidImage(
                "Expected JPEG, PNG, GIF or WebP data".into(),
            ));
        }

        let book_dir = self.storage.book_dir(id);
        std::fs::create_dir_all(&book_dir)?;
        let cover_path = book_dir.join(format!("cover{}", kind.cover_extension()));
        std::fs::write(&cover_path, data)?;

        if let Some(old) = book.cover_path.as_deref()
            && old != cover_path
            && old.starts_with(&book_dir)
        {
            if let Err(e) = std::fs::remove_file(old) {
                tracing::debug!(path = %old.display(), error = %e, "Failed to remove old cover");
            }
        }

        self.db.update_cover_path(id, Some(&cover_path))?;
        tracing::info!(id = %id, path = %cover_path.display(), "Cover updated");
        Ok(cover_path)
    }

    /// Unregister a book and delete its managed storage.
    ///
    /// Files outside managed storage (scanned books) are left in place.
    pub fn remove(&self, id: &str) -> Result<Book> {
        let book = self
            .db
            .get_book(id)?
            .ok_or_else(|| AppError::NotFound(id.to_string()))?;

        self.db.delete_book(id)?;
        self.storage.remove_book_dir(id)?;
        tracing::info!(id = %id, title = %book.title, "Removed book");
        Ok(book)
    }
}
