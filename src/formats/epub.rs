//! EPUB format handler.

use crate::error::{AppError, Result};
use crate::formats::{ExtractRequest, Extraction, FormatHandler, image, open_zip, read_entry};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::fs::File;
use zip::ZipArchive;

const CONTAINER_PATH: &str = "META-INF/container.xml";

/// Base names recognised by the last-resort cover lookup.
const COMMON_COVER_NAMES: [&str; 3] = ["cover.jpg", "cover.jpeg", "cover.png"];

/// Handler for EPUB files.
pub struct EpubHandler;

/// Fields read from the OPF package document.
#[derive(Debug, Default, PartialEq, Eq)]
struct Package {
    title: Option<String>,
    author: Option<String>,
    /// `href` of the first manifest item flagged `cover-image` (EPUB 3).
    cover_image_href: Option<String>,
    cover_image_seen: bool,
    /// `content` of the first `<meta name="cover">` (EPUB 2).
    cover_meta_id: Option<String>,
    manifest: Vec<ManifestItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Creator,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct ManifestItem {
    id: String,
    href: String,
    media_type: String,
}

/// Where the cover was found.
#[derive(Debug, PartialEq, Eq)]
enum CoverSource {
    /// An `href` relative to the OPF document.
    Manifest(String),
    /// A full archive path from the file name lookup.
    Archive(String),
}

impl EpubHandler {
    /// Find the OPF file path from container.xml.
    fn find_opf_path(archive: &mut ZipArchive<File>) -> Result<String> {
        let data = read_entry(archive, CONTAINER_PATH)?;
        let content = String::from_utf8_lossy(strip_bom(&data));

        let mut reader = lenient_reader(&content);

        loop {
            match reader.read_event() {
                Ok(Event::Start(e) | Event::Empty(e)) if e.local_name().as_ref() == b"rootfile" => {
                    if let Some(path) = attribute(&e, b"full-path").filter(|p| !p.is_empty()) {
                        return Ok(path);
                    }
                }
                Ok(Event::Eof) | Err(_) => break,
                _ => {}
            }
        }

        Err(AppError::InvalidFormat("No rootfile in container.xml".into()))
    }

    /// Parse the OPF document.
    ///
    /// Reading stops at the first syntax error; whatever was collected
    /// before it is kept.
    fn parse_package(content: &str) -> Package {
        let mut reader = lenient_reader(content);

        let mut package = Package::default();
        // Element whose text is being collected, with the buffer.
        let mut capture: Option<(Field, String)> = None;

        loop {
            let event = match reader.read_event() {
                Ok(Event::Eof) => break,
                Ok(event) => event,
                Err(e) => {
                    tracing::debug!(error = %e, "Malformed OPF, keeping partial metadata");
                    break;
                }
            };

            match event {
                Event::Start(e) => match e.name().as_ref() {
                    b"dc:title" if package.title.is_none() => {
                        capture = Some((Field::Title, String::new()));
                    }
                    b"dc:creator" if package.author.is_none() => {
                        capture = Some((Field::Creator, String::new()));
                    }
                    _ => package.read_element(&e),
                },
                Event::Empty(e) => package.read_element(&e),
                Event::Text(e) => {
                    if let Some((_, buf)) = capture.as_mut() {
                        buf.push_str(&String::from_utf8_lossy(e.as_ref()));
                    }
                }
                Event::CData(e) => {
                    if let Some((_, buf)) = capture.as_mut() {
                        buf.push_str(&String::from_utf8_lossy(&e.into_inner()));
                    }
                }
                Event::GeneralRef(e) => {
                    if let Some((_, buf)) = capture.as_mut() {
                        let entity = String::from_utf8_lossy(e.as_ref());
                        match resolve_entity(&entity) {
                            Some(c) => buf.push(c),
                            None => {
                                buf.push('&');
                                buf.push_str(&entity);
                                buf.push(';');
                            }
                        }
                    }
                }
                Event::End(e) => {
                    let closes_capture = matches!(
                        (capture.as_ref().map(|(field, _)| *field), e.name().as_ref()),
                        (Some(Field::Title), b"dc:title") | (Some(Field::Creator), b"dc:creator")
                    );
                    if closes_capture && let Some((field, text)) = capture.take() {
                        let text = text.trim();
                        if !text.is_empty() {
                            match field {
                                Field::Title => package.title = Some(text.to_string()),
                                Field::Creator => package.author = Some(text.to_string()),
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        package
    }

    /// Pick the cover location, trying each strategy in priority order.
    fn resolve_cover(archive: &ZipArchive<File>, package: &Package) -> Option<CoverSource> {
        package
            .cover_image_href
            .clone()
            .or_else(|| package.cover_from_meta())
            .map(CoverSource::Manifest)
            .or_else(|| Self::cover_by_file_name(archive).map(CoverSource::Archive))
    }

    /// Last resort: an entry literally named `cover.jpg` / `cover.jpeg` / `cover.png`.
    fn cover_by_file_name(archive: &ZipArchive<File>) -> Option<String> {
        archive
            .file_names()
            .find(|name: &&str| {
                let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
                COMMON_COVER_NAMES.contains(&base.to_lowercase().as_str())
            })
            .map(String::from)
    }

    /// Read and validate the cover image.
    fn read_cover(archive: &mut ZipArchive<File>, cover_path: &str) -> Option<Vec<u8>> {
        let name = archive
            .file_names()
            .find(|name| *name == cover_path || name.replace('\\', "/") == cover_path)
            .map(String::from)?;

        let data = match read_entry(archive, &name) {
            Ok(data) => data,
            Err(e) => {
                tracing::debug!(entry = %name, error = %e, "Failed to read cover entry");
                return None;
            }
        };

        if !image::is_valid_image(&data) {
            tracing::warn!(entry = %name, "Cover file is not a valid image");
            return None;
        }

        Some(data)
    }
}

impl Package {
    /// Record the attributes of manifest items and cover metadata.
    fn read_element(&mut self, e: &BytesStart<'_>) {
        match e.local_name().as_ref() {
            b"item" => {
                let item = ManifestItem {
                    id: attribute(e, b"id").unwrap_or_default(),
                    href: attribute(e, b"href").unwrap_or_default(),
                    media_type: attribute(e, b"media-type").unwrap_or_default(),
                };

                let is_cover_image = attribute(e, b"properties")
                    .is_some_and(|props| props.split_ascii_whitespace().any(|p| p == "cover-image"));

                // Only the first flagged item counts, even without an href.
                if is_cover_image && !self.cover_image_seen {
                    self.cover_image_seen = true;
                    self.cover_image_href = Some(item.href.clone()).filter(|h| !h.is_empty());
                }

                self.manifest.push(item);
            }
            b"meta" if self.cover_meta_id.is_none() => {
                if attribute(e, b"name").as_deref() == Some("cover") {
                    self.cover_meta_id = attribute(e, b"content").filter(|c| !c.is_empty());
                }
            }
            _ => {}
        }
    }

    /// EPUB 2: resolve `<meta name="cover" content="id">` against the manifest.
    fn cover_from_meta(&self) -> Option<String> {
        let id = self.cover_meta_id.as_deref()?;
        self.manifest
            .iter()
            .find(|item| item.id == id)
            .filter(|item| item.media_type.starts_with("image/"))
            .map(|item| item.href.clone())
            .filter(|href| !href.is_empty())
    }
}

impl CoverSource {
    /// Full path of the cover inside the archive.
    fn archive_path(&self, opf_path: &str) -> String {
        let path = match self {
            CoverSource::Manifest(href) => {
                let opf_dir = opf_path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
                join_path(opf_dir, href)
            }
            CoverSource::Archive(name) => name.replace('\\', "/"),
        };
        path.replace("%20", " ")
    }
}

impl FormatHandler for EpubHandler {
    fn extract(&self, request: &ExtractRequest<'_>) -> Extraction {
        let mut result = Extraction::fallback(request.fallback_title);

        let mut archive = match open_zip(request.path) {
            Ok(archive) => archive,
            Err(e) => {
                tracing::debug!(path = %request.path.display(), error = %e, "Failed to open EPUB");
                return result;
            }
        };

        let opf_path = match Self::find_opf_path(&mut archive) {
            Ok(path) => path,
            Err(e) => {
                tracing::debug!(path = %request.path.display(), error = %e, "No package document");
                return result;
            }
        };

        let package = read_entry(&mut archive, &opf_path)
            .map(|data| Self::parse_package(&String::from_utf8_lossy(strip_bom(&data))))
            .unwrap_or_default();

        if let Some(title) = package.title.clone() {
            result.title = title;
        }
        if let Some(author) = package.author.clone() {
            result.author = author;
        }

        result.cover_path = Self::resolve_cover(&archive, &package)
            .map(|source| source.archive_path(&opf_path))
            .and_then(|cover_path| Self::read_cover(&mut archive, &cover_path))
            .and_then(|data| super::save_cover(request.cover_dir, &data));

        result
    }
}

/// Reader that accepts the sloppy XML found in real packages: mismatched
/// or stray end tags and bare `&` in text.
fn lenient_reader(content: &str) -> Reader<&[u8]> {
    let mut reader = Reader::from_str(content);
    let config = reader.config_mut();
    config.check_end_names = false;
    config.allow_unmatched_ends = true;
    config.allow_dangling_amp = true;
    reader
}

/// Get an attribute value, unescaping entities where possible.
fn attribute(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    let attr = e
        .attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)?;
    let raw = String::from_utf8_lossy(&attr.value);
    Some(
        quick_xml::escape::unescape(&raw)
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| raw.into_owned()),
    )
}

/// Join an href onto a directory, resolving `.` and `..` segments.
fn join_path(dir: &str, href: &str) -> String {
    let href = href.replace('\\', "/");
    let mut parts: Vec<&str> = Vec::new();

    for segment in dir.split('/').chain(href.split('/')) {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }

    parts.join("/")
}

fn strip_bom(data: &[u8]) -> &[u8] {
    data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(data)
}

/// Resolve predefined and numeric XML entity references.
fn resolve_entity(entity: &str) -> Option<char> {
    match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => {
            let code = if let Some(hex) = entity.strip_prefix("#x") {
                u32::from_str_radix(hex, 16).ok()?
            } else {
                entity.strip_prefix('#')?.parse().ok()?
            };
            char::from_u32(code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{JPEG_BYTES, PNG_BYTES, write_zip};
    use std::path::Path;

    const CONTAINER: &str = r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

    fn extract(path: &Path, cover_dir: &Path) -> Extraction {
        EpubHandler.extract(&ExtractRequest {
            path,
            cover_dir,
            fallback_title: "fallback",
            book_id: "book-1",
        })
    }

    #[test]
    fn test_parse_package_epub3() {
        let package = EpubHandler::parse_package(
            r#"<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>Foo &amp; Bar</dc:title>
    <dc:creator id="creator01">  Jane Doe  </dc:creator>
    <dc:creator>Second Author</dc:creator>
  </metadata>
  <manifest>
    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
    <item id="img" href="images/cover.jpg" media-type="image/jpeg" properties="cover-image"/>
  </manifest>
</package>"#,
        );

        assert_eq!(package.title.as_deref(), Some("Foo & Bar"));
        assert_eq!(package.author.as_deref(), Some("Jane Doe"));
        assert_eq!(package.cover_image_href.as_deref(), Some("images/cover.jpg"));
        assert_eq!(package.cover_from_meta(), None);
    }

    #[test]
    fn test_parse_package_epub2_cover_meta() {
        let package = EpubHandler::parse_package(
            r#"<package version="2.0">
  <metadata>
    <dc:title>Old Book</dc:title>
    <meta name="cover" content="cover-id"/>
  </metadata>
  <manifest>
    <item id="cover-page" href="cover.xhtml" media-type="application/xhtml+xml"/>
    <item id="cover-id" href="cover.png" media-type="image/png"/>
  </manifest>
</package>"#,
        );

        assert_eq!(package.cover_image_href, None);
        assert_eq!(package.cover_from_meta().as_deref(), Some("cover.png"));
    }

    #[test]
    fn test_cover_meta_must_point_at_image() {
        let package = EpubHandler::parse_package(
            r#"<package><metadata><meta name="cover" content="c"/></metadata>
<manifest><item id="c" href="cover.xhtml" media-type="application/xhtml+xml"/></manifest></package>"#,
        );
        assert_eq!(package.cover_from_meta(), None);
    }

    #[test]
    fn test_first_cover_image_item_wins_even_without_href() {
        let package = EpubHandler::parse_package(
            r#"<package><manifest>
<item id="a" media-type="image/jpeg" properties="cover-image"/>
<item id="b" href="b.jpg" media-type="image/jpeg" properties="cover-image"/>
</manifest></package>"#,
        );
        assert_eq!(package.cover_image_href, None);
    }

    #[test]
    fn test_malformed_opf_keeps_partial_metadata() {
        let package = EpubHandler::parse_package(
            "<package><metadata><dc:title>Half</dc:title><dc:creator>Someone</dc:creator><<<",
        );
        assert_eq!(package.title.as_deref(), Some("Half"));
        assert_eq!(package.author.as_deref(), Some("Someone"));
    }

    #[test]
    fn test_bare_ampersands_and_stray_end_tags() {
        let package = EpubHandler::parse_package(
            r#"<package version="3.0"></spine><metadata>
<dc:title>Tom & Jerry</dc:title>
<dc:creator>Bar</dc:creator>
<dc:description>Q&A inside, R&D too</p></dc:description>
</metadata>
<manifest>
<item id="c" href="images/cover.jpg" media-type="image/jpeg" properties="cover-image"/>
<item id="n" href="nav.xhtml" media-type="application/xhtml+xml"/>
</manifest></package>"#,
        );

        assert_eq!(package.title.as_deref(), Some("Tom & Jerry"));
        assert_eq!(package.author.as_deref(), Some("Bar"));
        assert_eq!(package.cover_image_href.as_deref(), Some("images/cover.jpg"));
        assert_eq!(package.manifest.len(), 2);
    }

    #[test]
    fn test_extract_sloppy_package_keeps_manifest_cover() {
        let dir = tempfile::tempdir().unwrap();
        let epub = dir.path().join("sloppy.epub");
        let opf = r#"<package><metadata></div>
<dc:description>Fish & Chips</dc:description>
<dc:title>Salt & Vinegar</dc:title><dc:creator>A & B</dc:creator>
<meta name="cover" content="img"/></metadata>
<manifest><item id="img" href="art/front.png" media-type="image/png"/></manifest>
</package>"#;
        write_zip(
            &epub,
            &[
                (CONTAINER_PATH, CONTAINER.as_bytes()),
                ("OEBPS/content.opf", opf.as_bytes()),
                ("OEBPS/art/front.png", PNG_BYTES),
            ],
        );

        let cover_dir = dir.path().join("cover");
        let result = extract(&epub, &cover_dir);

        assert_eq!(result.title, "Salt & Vinegar");
        assert_eq!(result.author, "A & B");
        assert_eq!(result.cover_path, Some(cover_dir.join("cover.png")));
    }

    #[test]
    fn test_empty_title_is_ignored() {
        let package = EpubHandler::parse_package("<metadata><dc:title>  </dc:title></metadata>");
        assert_eq!(package.title, None);
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("OEBPS", "images/cover.jpg"), "OEBPS/images/cover.jpg");
        assert_eq!(join_path("OEBPS/text", "../images/c.png"), "OEBPS/images/c.png");
        assert_eq!(join_path("", "./cover.jpg"), "cover.jpg");
        assert_eq!(join_path("OPS", "img\\cover.jpg"), "OPS/img/cover.jpg");
    }

    #[test]
    fn test_archive_path_decodes_spaces() {
        let source = CoverSource::Manifest("my%20cover.jpg".to_string());
        assert_eq!(source.archive_path("OEBPS/content.opf"), "OEBPS/my cover.jpg");

        let source = CoverSource::Archive("Images\\Cover.JPG".to_string());
        assert_eq!(source.archive_path("OEBPS/content.opf"), "Images/Cover.JPG");

        let source = CoverSource::Manifest("cover.jpg".to_string());
        assert_eq!(source.archive_path("content.opf"), "cover.jpg");
    }

    #[test]
    fn test_extract_epub3_cover() {
        let dir = tempfile::tempdir().unwrap();
        let epub = dir.path().join("book.epub");
        let opf = r#"<package version="3.0"><metadata>
<dc:title>Foo</dc:title><dc:creator>Bar</dc:creator></metadata>
<manifest><item id="c" href="images/cover.jpg" media-type="image/jpeg" properties="cover-image"/></manifest>
</package>"#;
        write_zip(
            &epub,
            &[
                ("mimetype", b"application/epub+zip"),
                (CONTAINER_PATH, CONTAINER.as_bytes()),
                ("OEBPS/content.opf", opf.as_bytes()),
                ("OEBPS/images/cover.jpg", JPEG_BYTES),
            ],
        );

        let cover_dir = dir.path().join("covers").join("book-1");
        let result = extract(&epub, &cover_dir);

        assert_eq!(result.title, "Foo");
        assert_eq!(result.author, "Bar");
        let cover = result.cover_path.unwrap();
        assert_eq!(cover, cover_dir.join("cover.jpg"));
        assert_eq!(std::fs::read(cover).unwrap(), JPEG_BYTES);
    }

    #[test]
    fn test_extract_epub2_cover() {
        let dir = tempfile::tempdir().unwrap();
        let epub = dir.path().join("book.epub");
        let opf = r#"<package version="2.0"><metadata>
<dc:title>Legacy</dc:title><meta name="cover" content="cover-id"/></metadata>
<manifest><item id="cover-id" href="cover.png" media-type="image/png"/></manifest></package>"#;
        write_zip(
            &epub,
            &[
                (CONTAINER_PATH, CONTAINER.as_bytes()),
                ("OEBPS/content.opf", opf.as_bytes()),
                ("OEBPS/cover.png", PNG_BYTES),
            ],
        );

        let result = extract(&epub, dir.path());
        assert_eq!(result.title, "Legacy");
        assert_eq!(result.author, "");
        assert_eq!(result.cover_path, Some(dir.path().join("cover.png")));
    }

    #[test]
    fn test_extract_cover_by_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let epub = dir.path().join("book.epub");
        write_zip(
            &epub,
            &[
                (CONTAINER_PATH, CONTAINER.as_bytes()),
                ("OEBPS/content.opf", b"<package><metadata/></package>"),
                ("Images/Cover.JPG", JPEG_BYTES),
            ],
        );

        let result = extract(&epub, dir.path());
        assert_eq!(result.title, "fallback");
        assert_eq!(result.cover_path, Some(dir.path().join("cover.jpg")));
    }

    #[test]
    fn test_invalid_cover_does_not_fall_back() {
        let dir = tempfile::tempdir().unwrap();
        let epub = dir.path().join("book.epub");
        let opf = r#"<package><metadata><dc:title>Foo</dc:title><dc:creator>Bar</dc:creator></metadata>
<manifest><item id="c" href="cover.jpg" media-type="image/jpeg" properties="cover-image"/></manifest></package>"#;
        write_zip(
            &epub,
            &[
                (CONTAINER_PATH, CONTAINER.as_bytes()),
                ("OEBPS/content.opf", opf.as_bytes()),
                ("OEBPS/cover.jpg", b"this is plain text, not a JPEG"),
                ("cover.png", PNG_BYTES),
            ],
        );

        let cover_dir = dir.path().join("out");
        let result = extract(&epub, &cover_dir);
        assert_eq!(result.title, "Foo");
        assert_eq!(result.author, "Bar");
        assert_eq!(result.cover_path, None);
        assert!(!cover_dir.exists());
    }

    #[test]
    fn test_missing_container_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let epub = dir.path().join("book.epub");
        write_zip(&epub, &[("OEBPS/content.opf", b"<dc:title>Hidden</dc:title>"), ("cover.jpg", JPEG_BYTES)]);

        assert_eq!(extract(&epub, dir.path()), Extraction::fallback("fallback"));
    }

    #[test]
    fn test_missing_opf_still_finds_cover_file() {
        let dir = tempfile::tempdir().unwrap();
        let epub = dir.path().join("book.epub");
        write_zip(&epub, &[(CONTAINER_PATH, CONTAINER.as_bytes()), ("cover.jpeg", JPEG_BYTES)]);

        let result = extract(&epub, dir.path());
        assert_eq!(result.title, "fallback");
        assert_eq!(result.cover_path, Some(dir.path().join("cover.jpg")));
    }

    #[test]
    fn test_not_a_zip() {
        let dir = tempfile::tempdir().unwrap();
        let epub = dir.path().join("broken.epub");
        std::fs::write(&epub, b"definitely not a zip archive").unwrap();

        assert_eq!(extract(&epub, dir.path()), Extraction::fallback("fallback"));
    }
}
