use crate::config::BookFormat;
use crate::db::timestamp_to_datetime;
use crate::error::{AppError, Result};
use crate::library::Book;
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const BOOK_COLUMNS: &str =
    "id, title, author, cover_path, file_path, file_size, file_type, added_at";

/// Database wrapper for thread-safe access.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Open in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS books (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                author TEXT NOT NULL DEFAULT '',
                cover_path TEXT,
                file_path TEXT NOT NULL UNIQUE,
                file_size INTEGER NOT NULL,
                file_type TEXT NOT NULL,
                added_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_books_added ON books(added_at);
            "#,
        )
        .map_err(|e| AppError::Internal(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    /// Register a new book. Fails if its file path is already registered.
    pub fn insert_book(&self, book: &Book) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            &format!("INSERT INTO books ({BOOK_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
            params![
                book.id,
                book.title,
                book.author,
                book.cover_path.as_deref().map(path_to_text),
                path_to_text(&book.file_path),
                book.file_size as i64,
                book.file_type.as_str(),
                book.added_at.timestamp(),
            ],
        )?;
        Ok(())
    }

    /// ID of the book registered at `path`.
    pub fn find_book_by_path(&self, path: &Path) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let id = conn
            .query_row(
                "SELECT id FROM books WHERE file_path = ?1",
                params![path_to_text(path)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Get book by ID.
    pub fn get_book(&self, id: &str) -> Result<Option<Book>> {
        let conn = self.conn.lock();
        let book = conn
            .query_row(
                &format!("SELECT {BOOK_COLUMNS} FROM books WHERE id = ?1"),
                params![id],
                Self::row_to_book,
            )
            .optional()?;
        Ok(book)
    }

    /// All books, most recently added first.
    pub fn list_books(&self) -> Result<Vec<Book>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {BOOK_COLUMNS} FROM books ORDER BY added_at DESC, title"
        ))?;

        let books = stmt
            .query_map([], Self::row_to_book)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(books)
    }

    /// Point a book at a new cover image (or none).
    pub fn update_cover_path(&self, id: &str, cover_path: Option<&Path>) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn.execute(
            "UPDATE books SET cover_path = ?2 WHERE id = ?1",
            params![id, cover_path.map(path_to_text)],
        )?;
        Ok(rows > 0)
    }

    /// Delete a single book by ID.
    pub fn delete_book(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn.execute("DELETE FROM books WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn row_to_book(row: &rusqlite::Row<'_>) -> rusqlite::Result<Book> {
        let file_type: String = row.get(6)?;
        let file_type = BookFormat::from_extension(&file_type).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                6,
                Type::Text,
                format!("unknown file type: {}", file_type).into(),
            )
        })?;

        Ok(Book {
            id: row.get(0)?,
            title: row.get(1)?,
            author: row.get(2)?,
            cover_path: row.get::<_, Option<String>>(3)?.map(PathBuf::from),
            file_path: PathBuf::from(row.get::<_, String>(4)?),
            file_size: row.get::<_, i64>(5)?.max(0) as u64,
            file_type,
            added_at: timestamp_to_datetime(row.get(7)?),
        })
    }
}

fn path_to_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
