//! Managed on-disk storage for imported books and covers.

use std::path::{Path, PathBuf};

/// Layout of the data directory.
///
/// Every book owns `<data_path>/books/<id>/`, which holds its cover and,
/// for imported books, the book file itself.
#[derive(Debug, Clone)]
pub struct Storage {
    data_path: PathBuf,
}

impl Storage {
    /// Storage rooted at `data_path`.
    pub fn new(data_path: impl Into<PathBuf>) -> Self {
        Self {
            data_path: data_path.into(),
        }
    }

    /// Root data directory.
    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    /// Parent of all per-book directories.
    pub fn books_root(&self) -> PathBuf {
        self.data_path.join("books")
    }

    /// Directory owned by the book `id`.
    pub fn book_dir(&self, id: &str) -> PathBuf {
        self.books_root().join(id)
    }

    /// Remove the directory owned by `id`, if any.
    pub fn remove_book_dir(&self, id: &str) -> std::io::Result<()> {
        let dir = self.book_dir(id);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }
}
