
use std::fs;
use std::path::Path;

use pulldown_cmark::{Event, Parser, TagEnd};
use tracing::{debug, warn};

use crate::{RagError, Result};

/// Document formats the loader can extract text from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    PlainText,
    Markdown,
}

impl DocumentFormat {
    /// Infer the format from a file extension (without the dot).
    #[inline]
    pub fn from_extension(extension: &str) -> Result<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "txt" => Ok(Self::PlainText),
            "md" | "markdown" => Ok(Self::Markdown),
            other => Err(RagError::UnsupportedFormat(format!(
                "unknown extension '.{}' (supported: .txt, .md, .markdown)",
                other
            ))),
        }
    }
}

/// A document with its text extracted, ready for chunking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedDocument {
    /// Stable identity, derived from the origin file name
    pub source_id: String,
    /// Human-readable label used for citations
    pub title: String,
    pub format: DocumentFormat,
    /// Extracted plain text
    pub text: String,
}

/// Extract text from raw document bytes of a known format.
#[inline]
pub fn load_bytes(
    bytes: &[u8],
    format: DocumentFormat,
    source_id: &str,
    title: &str,
) -> Result<LoadedDocument> {
    let raw = std::str::from_utf8(bytes).map_err(|e| {
        RagError::CorruptDocument(format!("{} is not valid UTF-8: {}", source_id, e))
    })?;

    let text = match format {
        DocumentFormat::PlainText => raw.to_string(),
        DocumentFormat::Markdown => markdown_to_text(raw),
    };

    Ok(LoadedDocument {
        source_id: source_id.to_string(),
        title: title.to_string(),
        format,
        text,
    })
}

/// Load a single document from disk. The source identity is the file name
/// and the title is the file stem.
#[inline]
pub fn load_path(path: &Path) -> Result<LoadedDocument> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| {
            RagError::UnsupportedFormat(format!("{} has no file extension", path.display()))
        })?;
    let format = DocumentFormat::from_extension(extension)?;

    let source_id = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            RagError::UnsupportedFormat(format!("{} has no usable file name", path.display()))
        })?
        .to_string();
    let title = path
        .file_stem()
        .and_then(|n| n.to_str())
        .unwrap_or(&source_id)
        .to_string();

    let bytes = fs::read(path)?;
    debug!("loaded {} ({} bytes)", path.display(), bytes.len());

    load_bytes(&bytes, format, &source_id, &title)
}

/// List every file in a directory with a supported extension, sorted by path.
#[inline]
pub fn list_supported_files(dir: &Path) -> Result<Vec<std::path::PathBuf>> {
    if !dir.is_dir() {
        return Err(RagError::InvalidConfiguration(format!(
            "{} is not a directory",
            dir.display()
        )));
    }

    let mut entries: Vec<_> = fs::read_dir(dir)?
        .filter_map(std::result::Result::ok)
        .map(|e| e.path())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| DocumentFormat::from_extension(e).is_ok())
        })
        .collect();
    entries.sort();
    Ok(entries)
}

/// Load every supported document in a directory. Documents that fail to load
/// are logged and skipped; the rest are unaffected.
#[inline]
pub fn load_directory(dir: &Path) -> Result<Vec<LoadedDocument>> {
    let entries = list_supported_files(dir)?;

    let mut documents = Vec::with_capacity(entries.len());
    for path in entries {
        match load_path(&path) {
            Ok(doc) => documents.push(doc),
            Err(e) => warn!("skipping {}: {}", path.display(), e),
        }
    }

    Ok(documents)
}

/// Flatten markdown to plain text, keeping block structure as blank lines
/// so the chunker's paragraph ladder still applies.
fn markdown_to_text(markdown: &str) -> String {
    let mut text = String::with_capacity(markdown.len());

    for event in Parser::new(markdown) {
        match event {
            Event::Text(t) | Event::Code(t) => text.push_str(&t),
            Event::SoftBreak | Event::HardBreak => text.push('\n'),
            Event::End(
                TagEnd::Paragraph
                | TagEnd::Heading(_)
                | TagEnd::CodeBlock
                | TagEnd::Item
                | TagEnd::BlockQuote(_),
            ) => text.push_str("\n\n"),
            _ => {}
        }
    }

    text.trim_end().to_string()
}
