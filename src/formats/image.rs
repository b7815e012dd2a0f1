//! Image type detection from magic bytes.

/// Image container recognised by [`classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// JPEG (`FF D8 FF`).
    Jpeg,
    /// PNG (`89 50 4E 47`).
    Png,
    /// GIF (`GIF8`).
    Gif,
    /// WebP (`RIFF....WEBP`).
    Webp,
    /// Anything else, including buffers too short to tell.
    Invalid,
}

impl ImageKind {
    /// File extension for a cover written from data of this kind.
    ///
    /// Extracted covers are either PNG or "JPEG-ish": everything that is not
    /// PNG is stored as `.jpg`.
    pub fn cover_extension(self) -> &'static str {
        match self {
            ImageKind::Png => ".png",
            _ => ".jpg",
        }
    }
}

/// Classify a byte buffer by its leading bytes.
pub fn classify(data: &[u8]) -> ImageKind {
    if data.len() < 8 {
        return ImageKind::Invalid;
    }

    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        ImageKind::Jpeg
    } else if data.starts_with(&[0x89, b'P', b'N', b'G']) {
        ImageKind::Png
    } else if data.starts_with(b"GIF8") {
        ImageKind::Gif
    } else if data.len() > 12 && data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
        ImageKind::Webp
    } else {
        ImageKind::Invalid
    }
}

/// Check whether `data` looks like one of the supported image formats.
pub fn is_valid_image(data: &[u8]) -> bool {
    classify(data) != ImageKind::Invalid
}
