mod cbz;
mod epub;
pub mod image;
mod pdf;

pub use cbz::CbzHandler;
pub use epub::EpubHandler;
pub use pdf::{PdfCoverExtractor, PdfHandler};

use crate::config::BookFormat;
use crate::error::Result;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use zip::ZipArchive;

/// Inputs shared by every extractor.
#[derive(Debug, Clone, Copy)]
pub struct ExtractRequest<'a> {
    /// Book file to read.
    pub path: &'a Path,
    /// Directory the cover image is written into (created on demand).
    pub cover_dir: &'a Path,
    /// Title used when the file carries none.
    pub fallback_title: &'a str,
    /// Identifier of the book being registered.
    pub book_id: &'a str,
}

/// Metadata recovered from a book file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    /// Book title (falls back to the caller-supplied title).
    pub title: String,
    /// Author, empty when unknown.
    pub author: String,
    /// Written cover image, if one was found and validated.
    pub cover_path: Option<PathBuf>,
}

impl Extraction {
    /// Result carrying only the fallback title.
    pub fn fallback(title: &str) -> Self {
        Self {
            title: title.to_string(),
            ..Self::default()
        }
    }
}

/// Trait for format-specific book handlers.
///
/// Extraction never fails: anything that cannot be read leaves the
/// corresponding field at its default.
pub trait FormatHandler: Send + Sync {
    /// Extract title, author and cover from a book file.
    fn extract(&self, request: &ExtractRequest<'_>) -> Extraction;
}

/// Handler for formats without metadata support (MOBI, AZW3, FB2).
struct MinimalHandler;

impl FormatHandler for MinimalHandler {
    fn extract(&self, request: &ExtractRequest<'_>) -> Extraction {
        Extraction::fallback(request.fallback_title)
    }
}

/// The set of handlers used to ingest books.
pub struct Handlers {
    epub: EpubHandler,
    pdf: PdfHandler,
    cbz: CbzHandler,
    minimal: MinimalHandler,
}

impl Handlers {
    /// Build the handler set around a configured PDF cover renderer.
    pub fn new(pdf_cover: PdfCoverExtractor) -> Self {
        Self {
            epub: EpubHandler,
            pdf: PdfHandler::new(pdf_cover),
            cbz: CbzHandler,
            minimal: MinimalHandler,
        }
    }

    /// Get the appropriate handler for a book format.
    pub fn get(&self, format: BookFormat) -> &dyn FormatHandler {
        match format {
            BookFormat::Epub => &self.epub,
            BookFormat::Pdf => &self.pdf,
            BookFormat::Cbz => &self.cbz,
            BookFormat::Mobi | BookFormat::Azw3 | BookFormat::Fb2 => &self.minimal,
        }
    }
}

/// Open a zip-based container (EPUB, CBZ).
pub(crate) fn open_zip(path: &Path) -> Result<ZipArchive<File>> {
    let file = File::open(path)?;
    Ok(ZipArchive::new(file)?)
}

/// Read a whole archive entry by name.
pub(crate) fn read_entry(archive: &mut ZipArchive<File>, name: &str) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    archive.by_name(name)?.read_to_end(&mut data)?;
    Ok(data)
}

/// Write validated cover bytes to `<cover_dir>/cover<ext>`.
///
/// Returns `None` if the data is not an image or the file cannot be written.
pub(crate) fn save_cover(cover_dir: &Path, data: &[u8]) -> Option<PathBuf> {
    let kind = image::classify(data);
    if kind == image::ImageKind::Invalid {
        return None;
    }

    let cover_path = cover_dir.join(format!("cover{}", kind.cover_extension()));
    let written = std::fs::create_dir_all(cover_dir).and_then(|_| std::fs::write(&cover_path, data));

    match written {
        Ok(()) => Some(cover_path),
        Err(e) => {
            tracing::warn!(path = %cover_path.display(), error = %e, "Failed to write cover");
            None
        }
    }
}
