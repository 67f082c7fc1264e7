//! Chapter detection over plain text, DOCX HTML and extracted PDF pages.
//!
//! TXT/DOCX start indices are an approximation: the character offset of the
//! heading divided by the nominal page size, which can be off by one page
//! relative to the paginator's actual paragraph-aware boundaries. PDF
//! indices are exact physical page numbers.

use std::sync::OnceLock;

use marginalia_core::Chapter;
use regex::Regex;

use crate::docx::html_to_text;

const MAX_TITLE_CHARS: usize = 80;
const MIN_HTML_TITLE_CHARS: usize = 3;

/// Scan plain text line by line for heading patterns.
pub fn detect_text_chapters(text: &str, page_chars: usize) -> Vec<Chapter> {
    let re = text_heading();
    let mut chapters = Vec::new();
    let mut offset_chars = 0usize;

    for line in text.split('\n') {
        let trimmed = line.trim();
        if re.is_match(trimmed) {
            chapters.push(Chapter {
                title: truncate_title(trimmed),
                page: (offset_chars / page_chars.max(1)) as u32,
            });
        }
        offset_chars += line.chars().count() + 1;
    }
    chapters
}

/// Scan raw DOCX HTML for `<h1>`–`<h3>` headings. The start index is the
/// plain-text length of the tag-stripped prefix divided by the page size.
pub fn detect_html_chapters(html: &str, page_chars: usize) -> Vec<Chapter> {
    let re = html_heading();
    let mut chapters = Vec::new();

    for capture in re.captures_iter(html) {
        let whole = capture.get(0).expect("capture 0 always present");
        let inner = capture.get(2).map(|m| m.as_str()).unwrap_or("");
        let title = html_to_text(inner);
        let title = title.trim();
        if title.chars().count() < MIN_HTML_TITLE_CHARS {
            continue;
        }

        let offset_chars = html_to_text(&html[..whole.start()]).chars().count();
        chapters.push(Chapter {
            title: truncate_title(title),
            page: (offset_chars / page_chars.max(1)) as u32,
        });
    }
    chapters
}

/// One chapter test per physical PDF page: the first heading-like line of a
/// page marks a chapter starting at that page. Exact, not an approximation.
pub fn detect_pdf_chapters(pages: &[String]) -> Vec<Chapter> {
    let re = pdf_heading();
    let mut chapters = Vec::new();

    for (index, page) in pages.iter().enumerate() {
        for line in page.split('\n') {
            let trimmed = line.trim();
            if re.is_match(trimmed) {
                chapters.push(Chapter {
                    title: truncate_title(trimmed),
                    page: index as u32,
                });
                break;
            }
        }
    }
    chapters
}

fn truncate_title(title: &str) -> String {
    title.chars().take(MAX_TITLE_CHARS).collect()
}

fn text_heading() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(chapter|part|section)\s+(\d+|[ivxlcdm]+|[a-z])\b").expect("static pattern")
    })
}

fn pdf_heading() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(chapter|part)\s+(\d+|[ivxlcdm]+)\b").expect("static pattern")
    })
}

fn html_heading() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<h([1-3])[^>]*>(.*?)</h[1-3]\s*>").expect("static pattern"))
}
