//! CBZ (Comic Book ZIP) format handler.

use crate::error::Result;
use crate::formats::{ExtractRequest, Extraction, FormatHandler, image, open_zip, read_entry};
use std::fs::File;
use std::path::{Path, PathBuf};
use zip::ZipArchive;

/// Handler for CBZ files.
pub struct CbzHandler;

impl CbzHandler {
    /// Check if a filename is an image.
    fn is_image_file(name: &str) -> bool {
        let lower = name.to_lowercase();
        lower.ends_with(".jpg")
            || lower.ends_with(".jpeg")
            || lower.ends_with(".png")
            || lower.ends_with(".webp")
    }

    /// Get image entries sorted by name (plain byte order).
    fn get_image_files(archive: &ZipArchive<File>) -> Vec<String> {
        let mut images: Vec<String> = archive
            .file_names()
            .filter(|name| Self::is_image_file(name))
            .map(String::from)
            .collect();

        images.sort();
        images
    }

    /// Read the first page and store it as the cover.
    fn extract_cover(path: &Path, cover_dir: &Path) -> Result<Option<PathBuf>> {
        let mut archive = open_zip(path)?;

        let images = Self::get_image_files(&archive);
        let Some(first_image) = images.first() else {
            return Ok(None);
        };

        let data = read_entry(&mut archive, first_image)?;
        if !image::is_valid_image(&data) {
            tracing::warn!(path = %path.display(), entry = %first_image, "First page is not a valid image");
            return Ok(None);
        }

        Ok(super::save_cover(cover_dir, &data))
    }
}

impl FormatHandler for CbzHandler {
    fn extract(&self, request: &ExtractRequest<'_>) -> Extraction {
        let cover_path = Self::extract_cover(request.path, request.cover_dir).unwrap_or_else(|e| {
            tracing::debug!(path = %request.path.display(), error = %e, "Failed to read CBZ");
            None
        });

        Extraction {
            cover_path,
            ..Extraction::fallback(request.fallback_title)
        }
    }
}
