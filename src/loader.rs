//! Document loading and text extraction.
//!
//! Turns files on disk into [`LoadedDocument`]s ready for chunking. The
//! format is selected once by file extension via [`DocumentFormat`];
//! unrecognized extensions are skipped with a warning during directory
//! ingestion and are a hard error when a single file is loaded directly.

use std::io::Read;
use std::path::Path;

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::config::IngestionConfig;
use crate::models::LoadedDocument;

/// Supported document formats, dispatched by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Text,
    Markdown,
    Pdf,
    Docx,
    Html,
}

impl DocumentFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "txt" => Some(DocumentFormat::Text),
            "md" => Some(DocumentFormat::Markdown),
            "pdf" => Some(DocumentFormat::Pdf),
            "docx" => Some(DocumentFormat::Docx),
            "html" | "htm" => Some(DocumentFormat::Html),
            _ => None,
        }
    }
}

/// Maximum decompressed bytes read from a DOCX ZIP entry (zip-bomb guard).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Loading error. Directory ingestion skips the file on any of these;
/// the single-file API propagates them.
#[derive(Debug)]
pub enum LoadError {
    NotFound(String),
    UnsupportedFormat(String),
    Io(String),
    Pdf(String),
    Docx(String),
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::NotFound(p) => write!(f, "file not found: {}", p),
            LoadError::UnsupportedFormat(ext) => write!(f, "unsupported file format: .{}", ext),
            LoadError::Io(e) => write!(f, "read failed: {}", e),
            LoadError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
            LoadError::Docx(e) => write!(f, "DOCX extraction failed: {}", e),
        }
    }
}

impl std::error::Error for LoadError {}

/// Loads documents from disk, applying include/exclude glob patterns
/// during directory scans.
pub struct DocumentLoader {
    include_set: Option<GlobSet>,
    exclude_set: GlobSet,
}

impl DocumentLoader {
    pub fn new(config: &IngestionConfig) -> Result<Self> {
        let include_set = if config.include_globs.is_empty() {
            None
        } else {
            Some(build_globset(&config.include_globs)?)
        };

        let mut excludes = vec![
            "**/.git/**".to_string(),
            "**/node_modules/**".to_string(),
        ];
        excludes.extend(config.exclude_globs.clone());
        let exclude_set = build_globset(&excludes)?;

        Ok(Self {
            include_set,
            exclude_set,
        })
    }

    /// Load a single file into one or more pages.
    ///
    /// PDF content is split into pages on form feeds when present; every
    /// other format yields a single page with `page_number` 0.
    pub fn load_document(&self, path: &Path) -> std::result::Result<Vec<LoadedDocument>, LoadError> {
        if !path.exists() {
            return Err(LoadError::NotFound(path.display().to_string()));
        }

        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();

        let format = DocumentFormat::from_extension(&ext)
            .ok_or_else(|| LoadError::UnsupportedFormat(ext.clone()))?;

        let source_file = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let stem = path
            .file_stem()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| source_file.clone());

        let pages: Vec<(i32, String)> = match format {
            DocumentFormat::Text | DocumentFormat::Markdown => {
                let body = std::fs::read_to_string(path)
                    .map_err(|e| LoadError::Io(e.to_string()))?;
                vec![(0, body)]
            }
            DocumentFormat::Pdf => {
                let bytes = std::fs::read(path).map_err(|e| LoadError::Io(e.to_string()))?;
                let text = pdf_extract::extract_text_from_mem(&bytes)
                    .map_err(|e| LoadError::Pdf(e.to_string()))?;
                split_pdf_pages(&text)
            }
            DocumentFormat::Docx => {
                let bytes = std::fs::read(path).map_err(|e| LoadError::Io(e.to_string()))?;
                vec![(0, clean_text(&extract_docx(&bytes)?))]
            }
            DocumentFormat::Html => {
                let body = std::fs::read_to_string(path)
                    .map_err(|e| LoadError::Io(e.to_string()))?;
                vec![(0, clean_text(&strip_html(&body)))]
            }
        };

        let docs = pages
            .into_iter()
            .filter(|(_, content)| !content.trim().is_empty())
            .map(|(page_number, content)| {
                let title = derive_title(&content, &stem);
                LoadedDocument {
                    source_file: source_file.clone(),
                    page_number,
                    title,
                    content,
                }
            })
            .collect();

        Ok(docs)
    }

    /// Load every supported document under `dir`, recursively.
    ///
    /// A missing directory is an error; an unsupported or broken file is
    /// skipped with a warning on stderr. Results are sorted by path for
    /// deterministic ordering.
    pub fn load_directory(&self, dir: &Path) -> Result<Vec<LoadedDocument>> {
        if !dir.exists() {
            bail!("Documents folder not found: {}", dir.display());
        }

        let mut paths = Vec::new();
        for entry in WalkDir::new(dir) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(dir).unwrap_or(path);
            let rel_str = relative.to_string_lossy().to_string();

            if self.exclude_set.is_match(&rel_str) {
                continue;
            }
            if let Some(ref include) = self.include_set {
                if !include.is_match(&rel_str) {
                    continue;
                }
            }

            paths.push(path.to_path_buf());
        }

        paths.sort();

        let mut documents = Vec::new();
        for path in &paths {
            match self.load_document(path) {
                Ok(docs) => documents.extend(docs),
                Err(e) => {
                    eprintln!("Warning: skipping {}: {}", path.display(), e);
                }
            }
        }

        Ok(documents)
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Split PDF-extracted text into pages on form feeds. Without form feeds
/// the whole text is a single page 0.
fn split_pdf_pages(text: &str) -> Vec<(i32, String)> {
    if !text.contains('\u{c}') {
        return vec![(0, clean_text(text))];
    }
    text.split('\u{c}')
        .enumerate()
        .map(|(i, page)| (i as i32, clean_text(page)))
        .collect()
}

/// Normalize extracted text: collapse runs of spaces/tabs, cap blank-line
/// runs at one, trim the ends. Paragraph boundaries survive so the
/// chunker can still split on them.
pub fn clean_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;

    for line in text.lines() {
        let mut collapsed = String::with_capacity(line.len());
        let mut prev_space = false;
        for ch in line.chars() {
            if ch == ' ' || ch == '\t' {
                if !prev_space {
                    collapsed.push(' ');
                }
                prev_space = true;
            } else {
                collapsed.push(ch);
                prev_space = false;
            }
        }
        let trimmed = collapsed.trim();

        if trimmed.is_empty() {
            blank_run += 1;
            if blank_run == 1 && !out.is_empty() {
                out.push('\n');
            }
        } else {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(trimmed);
            blank_run = 0;
        }
    }

    out.trim().to_string()
}

/// First line if it looks like a title (under 100 chars), otherwise the
/// file stem.
fn derive_title(content: &str, stem: &str) -> String {
    let first_line = content.lines().next().unwrap_or("").trim();
    if !first_line.is_empty() && first_line.chars().count() < 100 {
        first_line.to_string()
    } else {
        stem.to_string()
    }
}

/// Extract paragraph text from a DOCX file (`word/document.xml` inside
/// the ZIP container). `<w:t>` runs are concatenated; paragraph ends
/// become newlines.
fn extract_docx(bytes: &[u8]) -> std::result::Result<String, LoadError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| LoadError::Docx(e.to_string()))?;

    let mut doc_xml = Vec::new();
    {
        let entry = archive
            .by_name("word/document.xml")
            .map_err(|_| LoadError::Docx("word/document.xml not found".to_string()))?;
        entry
            .take(MAX_XML_ENTRY_BYTES)
            .read_to_end(&mut doc_xml)
            .map_err(|e| LoadError::Docx(e.to_string()))?;
        if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
            return Err(LoadError::Docx(
                "word/document.xml exceeds size limit".to_string(),
            ));
        }
    }

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(doc_xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_t = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_t = true;
                }
            }
            Ok(quick_xml::events::Event::Text(te)) if in_t => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(quick_xml::events::Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"t" => in_t = false,
                    b"p" => out.push('\n'),
                    _ => {}
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(LoadError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}

/// Strip tags from HTML, dropping `<script>` and `<style>` content and
/// decoding the common entities. Block-level closing tags become
/// newlines so paragraph structure survives.
fn strip_html(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut chars = html.char_indices().peekable();
    let mut skip_until: Option<&str> = None;

    while let Some((idx, ch)) = chars.next() {
        if ch != '<' {
            if skip_until.is_none() {
                out.push(ch);
            }
            continue;
        }

        // Consume the tag.
        let rest = &html[idx..];
        let end = match rest.find('>') {
            Some(e) => e,
            None => break,
        };
        let tag = rest[1..end].trim().to_ascii_lowercase();
        // Advance past the tag body and the closing '>' ('<' was already
        // consumed).
        let to_consume = rest[1..=end].chars().count();
        for _ in 0..to_consume {
            chars.next();
        }

        if let Some(until) = skip_until {
            if tag.trim_start_matches('/').starts_with(until) && tag.starts_with('/') {
                skip_until = None;
            }
            continue;
        }

        if tag.starts_with("script") {
            skip_until = Some("script");
        } else if tag.starts_with("style") {
            skip_until = Some("style");
        } else if tag.starts_with('/')
            && ["p", "div", "h1", "h2", "h3", "h4", "li", "tr", "br"]
                .iter()
                .any(|t| tag[1..].starts_with(t))
        {
            out.push('\n');
        } else if tag.starts_with("br") {
            out.push('\n');
        }
    }

    decode_entities(&out)
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
