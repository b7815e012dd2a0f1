//! PDF format handler.
//!
//! Metadata is read heuristically from the start of the file; the cover is
//! the first page rendered by an external rasterizer.

use crate::config::PdfConfig;
use crate::formats::{ExtractRequest, Extraction, FormatHandler, image};
use crate::process::{ProcessOutcome, ProcessRunner};
use std::ffi::OsString;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Bytes scanned for `/Title` and `/Author`.
const METADATA_WINDOW: u64 = 50_000;

/// Longest string accepted between `(` and `)`.
const MAX_STRING_LEN: usize = 200;

/// Page-number suffixes the rasterizer may append, depending on page count.
const PAGE_SUFFIXES: [&str; 5] = ["1", "01", "001", "0001", "00001"];

/// Handler for PDF files.
pub struct PdfHandler {
    cover: PdfCoverExtractor,
}

impl PdfHandler {
    /// Create a handler rendering covers with `cover`.
    pub fn new(cover: PdfCoverExtractor) -> Self {
        Self { cover }
    }

    /// Read title and author from the document info near the start of the file.
    pub fn extract_metadata(path: &Path, fallback_title: &str) -> (String, String) {
        let mut head = Vec::new();
        let read = File::open(path).and_then(|f| f.take(METADATA_WINDOW).read_to_end(&mut head));
        if let Err(e) = read {
            tracing::debug!(path = %path.display(), error = %e, "Failed to read PDF");
            return (fallback_title.to_string(), String::new());
        }

        Self::parse_metadata(&head, fallback_title)
    }

    /// Parse `/Title (..)` and `/Author (..)` out of raw PDF bytes.
    fn parse_metadata(content: &[u8], fallback_title: &str) -> (String, String) {
        let title = Self::literal_string(content, b"/Title")
            .filter(|t| t.len() > 2 && t.len() < MAX_STRING_LEN)
            .unwrap_or_else(|| fallback_title.to_string());

        let author = Self::literal_string(content, b"/Author")
            .filter(|a| !a.is_empty() && a.len() < MAX_STRING_LEN)
            .unwrap_or_default();

        (title, author)
    }

    /// The parenthesised string following the first occurrence of `key`.
    fn literal_string(content: &[u8], key: &[u8]) -> Option<String> {
        let key_pos = find(content, key)?;
        let start = key_pos + find(&content[key_pos..], b"(")? + 1;
        let len = find(&content[start..], b")")?;
        if len >= MAX_STRING_LEN {
            return None;
        }

        let raw = String::from_utf8_lossy(&content[start..start + len]);
        Some(raw.replace("\\(", "(").replace("\\)", ")").trim().to_string())
    }
}

impl FormatHandler for PdfHandler {
    fn extract(&self, request: &ExtractRequest<'_>) -> Extraction {
        let (title, author) = Self::extract_metadata(request.path, request.fallback_title);
        let cover_path = self
            .cover
            .extract(request.path, request.cover_dir, request.book_id);

        Extraction {
            title,
            author,
            cover_path,
        }
    }
}

/// Renders the first page of a PDF with an external tool.
pub struct PdfCoverExtractor {
    rasterizer: String,
    scale_to: u32,
    timeout: Duration,
    temp_dir: PathBuf,
    runner: Arc<dyn ProcessRunner>,
}

impl PdfCoverExtractor {
    /// Create an extractor from configuration.
    pub fn new(config: &PdfConfig, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            rasterizer: config.rasterizer.clone(),
            scale_to: config.scale_to,
            timeout: config.timeout(),
            temp_dir: std::env::temp_dir(),
            runner,
        }
    }

    /// Use `dir` for intermediate renders instead of the system temp dir.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    /// Render page 1 of `pdf_path` to `<cover_dir>/cover.jpg`.
    ///
    /// Any failure (tool missing, timeout, bad output) yields `None`.
    pub fn extract(&self, pdf_path: &Path, cover_dir: &Path, book_id: &str) -> Option<PathBuf> {
        let prefix = self.temp_dir.join(format!("bookland-pdf-{}", book_id));

        let mut args: Vec<OsString> = ["-jpeg", "-f", "1", "-l", "1", "-scale-to"]
            .into_iter()
            .map(OsString::from)
            .collect();
        args.push(self.scale_to.to_string().into());
        args.push(pdf_path.into());
        args.push(prefix.clone().into());

        match self.runner.run(&self.rasterizer, &args, self.timeout) {
            Ok(outcome) if outcome.success() => {}
            Ok(ProcessOutcome::TimedOut) => {
                tracing::warn!(path = %pdf_path.display(), "PDF cover extraction timed out");
                self.remove_renders(&prefix);
                return None;
            }
            Ok(ProcessOutcome::Exited { code }) => {
                tracing::warn!(path = %pdf_path.display(), ?code, "PDF rasterizer failed");
                self.remove_renders(&prefix);
                return None;
            }
            Err(e) => {
                tracing::warn!(
                    rasterizer = %self.rasterizer,
                    error = %e,
                    "Failed to run PDF rasterizer"
                );
                return None;
            }
        }

        let Some(rendered) = Self::render_paths(&prefix).into_iter().find(|p| p.is_file()) else {
            tracing::warn!(path = %pdf_path.display(), "PDF rasterizer produced no output");
            return None;
        };

        let cover = Self::store_cover(&rendered, cover_dir);
        self.remove_renders(&prefix);
        cover
    }

    fn store_cover(rendered: &Path, cover_dir: &Path) -> Option<PathBuf> {
        let data = std::fs::read(rendered).ok()?;
        if !image::is_valid_image(&data) {
            tracing::warn!(path = %rendered.display(), "Rendered PDF cover is not a valid image");
            return None;
        }

        let cover_path = cover_dir.join("cover.jpg");
        let written = std::fs::create_dir_all(cover_dir).and_then(|_| std::fs::write(&cover_path, &data));
        match written {
            Ok(()) => Some(cover_path),
            Err(e) => {
                tracing::warn!(path = %cover_path.display(), error = %e, "Failed to write cover");
                None
            }
        }
    }

    /// Candidate output files for page 1.
    fn render_paths(prefix: &Path) -> Vec<PathBuf> {
        PAGE_SUFFIXES
            .iter()
            .map(|suffix| {
                let mut name = prefix.as_os_str().to_owned();
                name.push(format!("-{}.jpg", suffix));
                PathBuf::from(name)
            })
            .collect()
    }

    fn remove_renders(&self, prefix: &Path) {
        for path in Self::render_paths(prefix) {
            if path.exists()
                && let Err(e) = std::fs::remove_file(&path)
            {
                tracing::debug!(path = %path.display(), error = %e, "Failed to remove rendered page");
            }
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{FakeRasterizer, JPEG_BYTES};

    fn parse(content: &[u8]) -> (String, String) {
        PdfHandler::parse_metadata(content, "fallback")
    }

    #[test]
    fn test_title_and_author() {
        let pdf = b"%PDF-1.4\n1 0 obj\n<< /Title (My Book) /Author (Jane Doe) >>\nendobj\n";
        assert_eq!(parse(pdf), ("My Book".to_string(), "Jane Doe".to_string()));
    }

    #[test]
    fn test_empty_title_falls_back() {
        let pdf = b"<< /Title () /Author () >>";
        assert_eq!(parse(pdf), ("fallback".to_string(), String::new()));
    }

    #[test]
    fn test_short_title_falls_back() {
        assert_eq!(parse(b"/Title (ab)").0, "fallback");
        assert_eq!(parse(b"/Title (abc)").0, "abc");
    }

    #[test]
    fn test_escaped_parentheses_and_whitespace() {
        let pdf = br"/Title (  Rust \(Second Edition\)) /Author ( A. Writer )";
        // The first `)` ends the string, even if escaped.
        assert_eq!(parse(pdf).0, r"Rust (Second Edition\");
        assert_eq!(parse(pdf).1, "A. Writer");

        let pdf = b"/Title (unterminated string";
        assert_eq!(parse(pdf).0, "fallback");
    }

    #[test]
    fn test_overlong_string_rejected() {
        let mut pdf = b"/Title (".to_vec();
        pdf.extend(std::iter::repeat_n(b'a', 250));
        pdf.extend(b") /Author (Someone)");
        assert_eq!(parse(&pdf), ("fallback".to_string(), "Someone".to_string()));
    }

    #[test]
    fn test_missing_markers() {
        assert_eq!(parse(b"%PDF-1.7 binary junk"), ("fallback".to_string(), String::new()));
        assert_eq!(parse(b"/Title without parens"), ("fallback".to_string(), String::new()));
    }

    #[test]
    fn test_metadata_beyond_window_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("late.pdf");
        let mut pdf = vec![b' '; METADATA_WINDOW as usize];
        pdf.extend(b"/Title (Too Late)");
        std::fs::write(&path, &pdf).unwrap();

        assert_eq!(PdfHandler::extract_metadata(&path, "late").0, "late");
        assert_eq!(
            PdfHandler::extract_metadata(&dir.path().join("missing.pdf"), "missing"),
            ("missing".to_string(), String::new())
        );
    }

    fn extractor(runner: FakeRasterizer, temp: &Path) -> PdfCoverExtractor {
        PdfCoverExtractor::new(&PdfConfig::default(), Arc::new(runner)).with_temp_dir(temp)
    }

    #[test]
    fn test_cover_rendered_and_moved() {
        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join("tmp");
        std::fs::create_dir(&temp).unwrap();
        let runner = FakeRasterizer::writing(JPEG_BYTES, "-1.jpg");
        let calls = runner.calls();

        let cover_dir = dir.path().join("books").join("abc");
        let cover = extractor(runner, &temp)
            .extract(Path::new("/books/doc.pdf"), &cover_dir, "abc")
            .unwrap();

        assert_eq!(cover, cover_dir.join("cover.jpg"));
        assert_eq!(std::fs::read(&cover).unwrap(), JPEG_BYTES);
        assert_eq!(std::fs::read_dir(&temp).unwrap().count(), 0);

        let calls = calls.lock();
        assert_eq!(calls.len(), 1);
        let (program, args) = &calls[0];
        assert_eq!(program, "pdftoppm");
        assert_eq!(args[..7], ["-jpeg", "-f", "1", "-l", "1", "-scale-to", "800"]);
        assert_eq!(args[7], "/books/doc.pdf");
        assert!(Path::new(&args[8]).ends_with("bookland-pdf-abc"));
    }

    #[test]
    fn test_cover_timeout_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        let cover_dir = dir.path().join("cover");
        let cover = extractor(FakeRasterizer::timing_out(), dir.path())
            .extract(Path::new("doc.pdf"), &cover_dir, "id");

        assert_eq!(cover, None);
        assert!(!cover_dir.exists());
    }

    #[test]
    fn test_cover_failure_modes() {
        let dir = tempfile::tempdir().unwrap();
        let cover_dir = dir.path().join("cover");

        let failing = extractor(FakeRasterizer::failing(1), dir.path());
        assert_eq!(failing.extract(Path::new("doc.pdf"), &cover_dir, "a"), None);

        let silent = extractor(FakeRasterizer::succeeding_without_output(), dir.path());
        assert_eq!(silent.extract(Path::new("doc.pdf"), &cover_dir, "b"), None);

        let garbage = extractor(FakeRasterizer::writing(b"not a jpeg at all", "-001.jpg"), dir.path());
        assert_eq!(garbage.extract(Path::new("doc.pdf"), &cover_dir, "c"), None);
        assert!(!dir.path().join("bookland-pdf-c-001.jpg").exists());

        let missing = PdfCoverExtractor::new(
            &PdfConfig {
                rasterizer: "bookland-no-such-rasterizer".to_string(),
                ..PdfConfig::default()
            },
            Arc::new(crate::process::SystemRunner::default()),
        );
        assert_eq!(missing.extract(Path::new("doc.pdf"), &cover_dir, "d"), None);
        assert!(!cover_dir.exists());
    }
}
