//! Core domain types for Marginalia.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod schema;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub String);

impl DocumentId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Pdf,
    Docx,
    Txt,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Pdf => "pdf",
            SourceType::Docx => "docx",
            SourceType::Txt => "txt",
        }
    }

    /// Recognized upload extensions. Anything else is unsupported input.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim().to_ascii_lowercase().as_str() {
            "pdf" => Some(SourceType::Pdf),
            "docx" => Some(SourceType::Docx),
            "txt" => Some(SourceType::Txt),
            _ => None,
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceType {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        SourceType::from_extension(value).ok_or("unknown source type")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HighlightColor {
    Yellow,
    Green,
    Blue,
    Pink,
}

impl HighlightColor {
    pub fn as_str(&self) -> &'static str {
        match self {
            HighlightColor::Yellow => "yellow",
            HighlightColor::Green => "green",
            HighlightColor::Blue => "blue",
            HighlightColor::Pink => "pink",
        }
    }

    pub fn next(self) -> Self {
        match self {
            HighlightColor::Yellow => HighlightColor::Green,
            HighlightColor::Green => HighlightColor::Blue,
            HighlightColor::Blue => HighlightColor::Pink,
            HighlightColor::Pink => HighlightColor::Yellow,
        }
    }
}

impl std::fmt::Display for HighlightColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HighlightColor {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "yellow" => Ok(HighlightColor::Yellow),
            "green" => Ok(HighlightColor::Green),
            "blue" => Ok(HighlightColor::Blue),
            "pink" => Ok(HighlightColor::Pink),
            _ => Err("unknown highlight color"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentColor {
    Red,
    Orange,
    Yellow,
    Green,
    Blue,
    Purple,
}

const DOCUMENT_PALETTE: [DocumentColor; 6] = [
    DocumentColor::Red,
    DocumentColor::Orange,
    DocumentColor::Yellow,
    DocumentColor::Green,
    DocumentColor::Blue,
    DocumentColor::Purple,
];

impl DocumentColor {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentColor::Red => "red",
            DocumentColor::Orange => "orange",
            DocumentColor::Yellow => "yellow",
            DocumentColor::Green => "green",
            DocumentColor::Blue => "blue",
            DocumentColor::Purple => "purple",
        }
    }

    /// Display color assigned round-robin by library position at upload time.
    pub fn for_index(index: usize) -> Self {
        DOCUMENT_PALETTE[index % DOCUMENT_PALETTE.len()]
    }
}

impl Default for DocumentColor {
    fn default() -> Self {
        DocumentColor::Blue
    }
}

/// A detected heading and the page index at which it begins.
///
/// Indices are non-decreasing in detection order and may collide when
/// several headings land on the same page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub title: String,
    pub page: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    pub file_name: String,
    pub source_type: SourceType,
    #[serde(default)]
    pub file_size: u64,
    /// Extracted plain text. For PDFs this is the per-page text joined by
    /// literal `--- Page N ---` marker lines.
    pub content: String,
    #[serde(default)]
    pub html_content: Option<String>,
    /// True when the raw upload bytes live in the blob store under this id.
    #[serde(default)]
    pub has_payload: bool,
    #[serde(default)]
    pub page_count: u32,
    #[serde(default)]
    pub chapters: Vec<Chapter>,
    /// Reading progress, 0–100.
    #[serde(default)]
    pub progress: f32,
    #[serde(default)]
    pub current_page: u32,
    #[serde(default)]
    pub bookmarks: BTreeSet<u32>,
    #[serde(default)]
    pub color: DocumentColor,
    #[serde(default = "Utc::now")]
    pub uploaded_at: DateTime<Utc>,
    #[serde(default)]
    pub last_read_at: Option<DateTime<Utc>>,
}

impl Document {
    /// Re-establish the record invariants: at least one page, the current
    /// page inside `[0, page_count - 1]`, progress derived from it, and
    /// bookmarks confined to existing pages.
    pub fn normalize(&mut self) {
        self.page_count = self.page_count.max(1);
        self.current_page = self.current_page.min(self.page_count - 1);
        self.progress = Self::progress_for(self.current_page, self.page_count);
        self.bookmarks.retain(|page| *page < self.page_count);
        self.title = self.title.trim().to_string();
        if self.title.is_empty() {
            self.title = "untitled".to_string();
        }
    }

    pub fn progress_for(current_page: u32, page_count: u32) -> f32 {
        if page_count == 0 {
            0.0
        } else {
            ((current_page + 1) as f32 / page_count as f32) * 100.0
        }
    }

    /// Clamp-and-set the reading position, updating progress and the
    /// last-read timestamp.
    pub fn set_current_page(&mut self, page: u32) {
        self.current_page = page.min(self.page_count.saturating_sub(1));
        self.progress = Self::progress_for(self.current_page, self.page_count);
        self.last_read_at = Some(Utc::now());
    }

    pub fn toggle_bookmark(&mut self, page: u32) {
        if !self.bookmarks.remove(&page) {
            self.bookmarks.insert(page);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Highlight {
    pub id: String,
    pub document_id: DocumentId,
    /// Verbatim substring of the page content at creation time. There is no
    /// persisted character offset; rendering re-locates this text by
    /// substring search, so a repeated substring can anchor elsewhere.
    pub text: String,
    pub color: HighlightColor,
    #[serde(default)]
    pub note: String,
    pub page: u32,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Highlight {
    pub fn new(
        document_id: DocumentId,
        text: impl Into<String>,
        color: HighlightColor,
        note: impl Into<String>,
        page: u32,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            document_id,
            text: text.into(),
            color,
            note: note.into(),
            page,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub followups: Vec<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::User,
            content: content.into(),
            sources: Vec::new(),
            followups: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn assistant(
        content: impl Into<String>,
        sources: Vec<String>,
        followups: Vec<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::Assistant,
            content: content.into(),
            sources,
            followups,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub agent_base_url: String,
    pub agent_id: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            agent_base_url: "http://localhost:8080".to_string(),
            agent_id: "library".to_string(),
        }
    }
}

impl Settings {
    pub fn normalize(&mut self) {
        self.agent_base_url = self.agent_base_url.trim().trim_end_matches('/').to_string();
        self.agent_id = self.agent_id.trim().to_string();
        let defaults = Settings::default();
        if self.agent_base_url.is_empty() {
            self.agent_base_url = defaults.agent_base_url;
        }
        if self.agent_id.is_empty() {
            self.agent_id = defaults.agent_id;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_document(page_count: u32) -> Document {
        Document {
            id: DocumentId::generate(),
            title: "A Book".to_string(),
            author: None,
            file_name: "a-book.txt".to_string(),
            source_type: SourceType::Txt,
            file_size: 10,
            content: "hello".to_string(),
            html_content: None,
            has_payload: false,
            page_count,
            chapters: Vec::new(),
            progress: 0.0,
            current_page: 0,
            bookmarks: BTreeSet::new(),
            color: DocumentColor::default(),
            uploaded_at: Utc::now(),
            last_read_at: None,
        }
    }

    #[test]
    fn source_type_from_extension() {
        assert_eq!(SourceType::from_extension("PDF"), Some(SourceType::Pdf));
        assert_eq!(SourceType::from_extension("docx"), Some(SourceType::Docx));
        assert_eq!(SourceType::from_extension(" txt "), Some(SourceType::Txt));
        assert_eq!(SourceType::from_extension("epub"), None);
    }

    #[test]
    fn highlight_color_cycles_through_all_four() {
        let mut color = HighlightColor::Yellow;
        for _ in 0..3 {
            let next = color.next();
            assert_ne!(next, HighlightColor::Yellow);
            color = next;
        }
        assert_eq!(color.next(), HighlightColor::Yellow);
    }

    #[test]
    fn set_current_page_clamps_and_updates_progress() {
        let mut doc = make_document(4);
        doc.set_current_page(99);
        assert_eq!(doc.current_page, 3);
        assert_eq!(doc.progress, 100.0);
        assert!(doc.last_read_at.is_some());

        doc.set_current_page(1);
        assert_eq!(doc.progress, 50.0);
    }

    #[test]
    fn progress_is_monotonic_in_current_page() {
        let mut doc = make_document(7);
        let mut last = -1.0f32;
        for page in 0..7 {
            doc.set_current_page(page);
            assert!(doc.progress > last);
            last = doc.progress;
        }
    }

    #[test]
    fn normalize_repairs_invariants() {
        let mut doc = make_document(0);
        doc.current_page = 5;
        doc.bookmarks.insert(3);
        doc.title = "  ".to_string();
        doc.normalize();
        assert_eq!(doc.page_count, 1);
        assert_eq!(doc.current_page, 0);
        assert!(doc.bookmarks.is_empty());
        assert_eq!(doc.title, "untitled");
    }

    #[test]
    fn toggle_bookmark_round_trips() {
        let mut doc = make_document(3);
        doc.toggle_bookmark(2);
        assert!(doc.bookmarks.contains(&2));
        doc.toggle_bookmark(2);
        assert!(!doc.bookmarks.contains(&2));
    }

    #[test]
    fn settings_normalize_fills_defaults() {
        let mut settings = Settings {
            agent_base_url: "  http://example.com/ ".to_string(),
            agent_id: "   ".to_string(),
        };
        settings.normalize();
        assert_eq!(settings.agent_base_url, "http://example.com");
        assert_eq!(settings.agent_id, "library");
    }

    #[test]
    fn document_palette_wraps() {
        assert_eq!(DocumentColor::for_index(0), DocumentColor::Red);
        assert_eq!(DocumentColor::for_index(6), DocumentColor::Red);
        assert_eq!(DocumentColor::for_index(8), DocumentColor::Yellow);
    }
}
