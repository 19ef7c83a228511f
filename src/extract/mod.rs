//! Text extraction
//!
//! Turns a document into plain text for embedding. The index builder only
//! sees the [`Extractor`] trait; [`DocumentExtractor`] is the built-in
//! implementation, dispatching on file extension.

use crate::error::{Error, Result};
use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

/// Something that can pull plain text out of a file
pub trait Extractor: Send + Sync {
    /// Extract text from `path`. Unsupported formats yield empty text.
    fn extract(&self, path: &Path) -> Result<String>;
}

/// Extension-based extractor for common document formats
#[derive(Debug, Clone, Default)]
pub struct DocumentExtractor;

impl DocumentExtractor {
    pub fn new() -> Self {
        Self
    }
}

fn extraction_error(path: &Path, message: impl ToString) -> Error {
    Error::Extraction {
        path: path.display().to_string(),
        message: message.to_string(),
    }
}

impl Extractor for DocumentExtractor {
    fn extract(&self, path: &Path) -> Result<String> {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "txt" | "md" | "py" | "csv" | "log" | "rs" => read_lossy(path),
            "json" => extract_json(path),
            "html" | "htm" => read_lossy(path).map(|html| strip_html(&html)),
            "pdf" => pdf_extract::extract_text(path).map_err(|e| extraction_error(path, e)),
            "docx" => extract_docx(path),
            "xlsx" | "xls" | "ods" => extract_spreadsheet(path),
            _ => Ok(String::new()),
        }
    }
}

fn read_lossy(path: &Path) -> Result<String> {
    let bytes = fs::read(path).map_err(|e| extraction_error(path, e))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn extract_json(path: &Path) -> Result<String> {
    let raw = read_lossy(path)?;
    let value: serde_json::Value =
        serde_json::from_str(&raw).map_err(|e| extraction_error(path, e))?;
    serde_json::to_string_pretty(&value).map_err(|e| extraction_error(path, e))
}

/// Drop scripts, styles and tags, keeping visible text
pub fn strip_html(html: &str) -> String {
    static BLOCKS: OnceLock<Regex> = OnceLock::new();
    static TAGS: OnceLock<Regex> = OnceLock::new();

    let blocks = BLOCKS.get_or_init(|| {
        Regex::new(r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>|<!--.*?-->")
            .expect("valid regex")
    });
    let tags = TAGS.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"));

    let without_blocks = blocks.replace_all(html, " ");
    let text = tags.replace_all(&without_blocks, " ");

    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn extract_docx(path: &Path) -> Result<String> {
    use docx_rs::{DocumentChild, ParagraphChild, RunChild};

    let bytes = fs::read(path).map_err(|e| extraction_error(path, e))?;
    let docx = docx_rs::read_docx(&bytes).map_err(|e| extraction_error(path, e))?;

    let mut paragraphs = Vec::new();
    for child in &docx.document.children {
        if let DocumentChild::Paragraph(paragraph) = child {
            let mut line = String::new();
            for pc in &paragraph.children {
                if let ParagraphChild::Run(run) = pc {
                    for rc in &run.children {
                        if let RunChild::Text(t) = rc {
                            line.push_str(&t.text);
                        }
                    }
                }
            }
            paragraphs.push(line);
        }
    }

    Ok(paragraphs.join("\n"))
}

fn extract_spreadsheet(path: &Path) -> Result<String> {
    use calamine::{open_workbook_auto, Reader};

    let mut workbook = open_workbook_auto(path).map_err(|e| extraction_error(path, e))?;
    let mut text = String::new();

    for name in workbook.sheet_names() {
        let range = match workbook.worksheet_range(&name) {
            Ok(range) => range,
            Err(e) => {
                tracing::debug!("[Extractor] skipping sheet {} in {}: {}", name, path.display(), e);
                continue;
            }
        };
        for row in range.rows() {
            let cells: Vec<String> = row.iter().map(|cell| cell.to_string()).collect();
            text.push_str(&cells.join(" "));
            text.push('\n');
        }
    }

    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_plain_text_formats() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.md");
        fs::write(&path, "# Title\nbody").unwrap();

        assert_eq!(DocumentExtractor::new().extract(&path).unwrap(), "# Title\nbody");
    }

    #[test]
    fn test_unknown_extension_is_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("photo.heic");
        fs::write(&path, [0u8, 1, 2]).unwrap();

        assert_eq!(DocumentExtractor::new().extract(&path).unwrap(), "");
    }

    #[test]
    fn test_json_is_pretty_printed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.json");
        fs::write(&path, r#"{"k":[1,2]}"#).unwrap();

        let text = DocumentExtractor::new().extract(&path).unwrap();
        assert!(text.contains("\"k\": ["));
    }

    #[test]
    fn test_malformed_json_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{not json").unwrap();

        assert!(DocumentExtractor::new().extract(&path).is_err());
    }

    #[test]
    fn test_strip_html() {
        let html = "<html><head><style>p{}</style><script>var x = 1;</script></head>\
                    <body><p>Fish &amp; chips</p><!-- hidden --></body></html>";
        let text = clean(&strip_html(html));
        assert_eq!(text, "Fish & chips");
    }

    fn clean(s: &str) -> String {
        s.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = tempdir().unwrap();
        assert!(DocumentExtractor::new()
            .extract(&dir.path().join("gone.txt"))
            .is_err());
    }
}
