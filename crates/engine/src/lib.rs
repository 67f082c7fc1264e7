//! Format normalization engine.
//!
//! Turns an uploaded PDF/DOCX/TXT file into a uniform page/chapter model:
//! plain text, optional HTML, optional binary payload, pre-chunked pages
//! and detected chapters. External engines (PDF text extraction, DOCX
//! conversion) are injected capability handles with per-session lifetime.

use std::path::Path;

use marginalia_core::{Chapter, SourceType};
use thiserror::Error;

pub mod chapters;
pub mod docx;
pub mod highlight;
pub mod paginate;
pub mod pdf;

pub use chapters::{detect_html_chapters, detect_pdf_chapters, detect_text_chapters};
pub use docx::{DocxConverter, PandocConverter, html_to_text};
pub use highlight::{Fragment, HighlightedLine, render_page};
pub use paginate::paginate;
pub use pdf::{PdfEngine, PdfTextEngine};

/// Nominal page size in characters. Used to chunk TXT/DOCX text into pages
/// and to convert character offsets into page indices during chapter
/// detection.
pub const PAGE_CHARS: usize = 3000;

/// The literal marker line inserted between extracted PDF pages.
pub fn page_marker(page_number: u32) -> String {
    format!("--- Page {page_number} ---")
}

#[derive(Debug, Error)]
pub enum IngestError {
    /// The display text is load-bearing: the UI surfaces it verbatim.
    #[error("Unsupported file type")]
    UnsupportedFileType { extension: String },
    #[error("{engine} is unavailable: {message}")]
    EngineUnavailable {
        engine: &'static str,
        message: String,
    },
    #[error("failed to extract {format} content: {message}")]
    Extraction {
        format: SourceType,
        message: String,
    },
    #[error("failed to read upload: {0}")]
    Io(#[from] std::io::Error),
}

/// The normalizer's output contract: everything the application needs to
/// build a `Document` and stock the blob store.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedUpload {
    pub title: String,
    pub source_type: SourceType,
    pub plain_text: String,
    pub html: Option<String>,
    /// Raw upload bytes to retain in the blob store (PDF only).
    pub payload: Option<Vec<u8>>,
    pub page_count: u32,
    pub chapters: Vec<Chapter>,
    /// Pre-chunked pages for TXT/DOCX; empty for PDF, whose pagination is
    /// page-native (readers re-split `plain_text` on the marker lines).
    pub pages: Vec<String>,
}

pub struct Normalizer {
    pdf: Box<dyn PdfTextEngine>,
    docx: Box<dyn DocxConverter>,
}

impl Normalizer {
    pub fn new(pdf: Box<dyn PdfTextEngine>, docx: Box<dyn DocxConverter>) -> Self {
        Self { pdf, docx }
    }

    pub fn with_default_engines() -> Self {
        Self::new(Box::new(PdfEngine::new()), Box::new(PandocConverter::new()))
    }

    /// Normalize an upload. The extension is checked before any engine is
    /// touched; engine failures abort the upload with no partial result.
    /// `progress` receives human-readable phase strings for UI feedback.
    pub fn normalize(
        &self,
        file_name: &str,
        bytes: &[u8],
        progress: &mut dyn FnMut(&str),
    ) -> Result<NormalizedUpload, IngestError> {
        let extension = Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("");
        let source_type = SourceType::from_extension(extension).ok_or_else(|| {
            IngestError::UnsupportedFileType {
                extension: extension.to_string(),
            }
        })?;

        let mut report = |message: &str| {
            tracing::debug!(file = file_name, "{message}");
            progress(message);
        };

        report(&format!("Reading {file_name}…"));
        let title = title_from_file_name(file_name);

        let upload = match source_type {
            SourceType::Pdf => self.normalize_pdf(title, bytes, &mut report)?,
            SourceType::Docx => self.normalize_docx(title, bytes, &mut report)?,
            SourceType::Txt => normalize_txt(title, bytes, &mut report),
        };

        report("Done");
        Ok(upload)
    }

    fn normalize_pdf(
        &self,
        title: String,
        bytes: &[u8],
        report: &mut dyn FnMut(&str),
    ) -> Result<NormalizedUpload, IngestError> {
        report("Extracting text from PDF…");
        let pages = self.pdf.extract_pages(bytes)?;
        report(&format!("Extracted {} pages", pages.len()));

        let mut plain_text = String::new();
        for (index, page) in pages.iter().enumerate() {
            if index > 0 {
                plain_text.push_str("\n\n");
                plain_text.push_str(&page_marker(index as u32 + 1));
                plain_text.push_str("\n\n");
            }
            plain_text.push_str(page);
        }

        report("Scanning for chapters…");
        let chapters = detect_pdf_chapters(&pages);

        Ok(NormalizedUpload {
            title,
            source_type: SourceType::Pdf,
            plain_text,
            html: None,
            payload: Some(bytes.to_vec()),
            page_count: pages.len().max(1) as u32,
            chapters,
            pages: Vec::new(),
        })
    }

    fn normalize_docx(
        &self,
        title: String,
        bytes: &[u8],
        report: &mut dyn FnMut(&str),
    ) -> Result<NormalizedUpload, IngestError> {
        report("Converting DOCX to HTML…");
        let html = self.docx.convert_to_html(bytes)?;

        report("Paginating text…");
        let plain_text = html_to_text(&html);
        let pages = paginate(&plain_text, PAGE_CHARS);

        report("Scanning for chapters…");
        let chapters = detect_html_chapters(&html, PAGE_CHARS);

        Ok(NormalizedUpload {
            title,
            source_type: SourceType::Docx,
            plain_text,
            html: Some(html),
            payload: None,
            page_count: pages.len() as u32,
            chapters,
            pages,
        })
    }
}

fn normalize_txt(title: String, bytes: &[u8], report: &mut dyn FnMut(&str)) -> NormalizedUpload {
    report("Paginating text…");
    let plain_text = String::from_utf8_lossy(bytes).into_owned();
    let pages = paginate(&plain_text, PAGE_CHARS);

    report("Scanning for chapters…");
    let chapters = detect_text_chapters(&plain_text, PAGE_CHARS);

    NormalizedUpload {
        title,
        source_type: SourceType::Txt,
        plain_text,
        html: None,
        payload: None,
        page_count: pages.len() as u32,
        chapters,
        pages,
    }
}

fn title_from_file_name(file_name: &str) -> String {
    Path::new(file_name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::trim)
        .filter(|stem| !stem.is_empty())
        .unwrap_or("untitled")
        .to_string()
}

/// Split PDF plain text back into its page-native pages by the marker
/// lines the normalizer inserted. Always yields at least one page.
pub fn split_pdf_pages(plain_text: &str) -> Vec<String> {
    let re = marker_pattern();
    re.split(plain_text).map(|page| page.to_string()).collect()
}

fn marker_pattern() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"\n\n--- Page \d+ ---\n\n").expect("static pattern"))
}
