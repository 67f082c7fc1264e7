//! Application orchestration layer for Marginalia.
//!
//! `AppContext` owns the in-memory library, annotations and chat
//! transcript. Mutations go through whole-value replacement and are
//! tracked in dirty sets; the binary persists whatever is dirty after each
//! UI run.

use std::collections::HashSet;

use marginalia_core::{ChatMessage, Document, DocumentId, Highlight, Settings};

#[derive(Debug, Clone)]
pub struct AppContext {
    pub settings: Settings,
    pub documents: Vec<Document>,
    pub highlights: Vec<Highlight>,
    pub chat: Vec<ChatMessage>,
    pub selected: usize,
    pub status: Option<String>,
    pub dirty_documents: bool,
    pub removed_documents: HashSet<DocumentId>,
    pub dirty_highlights: bool,
    pub dirty_chat: bool,
    pub dirty_settings: bool,
}

impl AppContext {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            documents: Vec::new(),
            highlights: Vec::new(),
            chat: Vec::new(),
            selected: 0,
            status: None,
            dirty_documents: false,
            removed_documents: HashSet::new(),
            dirty_highlights: false,
            dirty_chat: false,
            dirty_settings: false,
        }
    }

    pub fn with_documents(mut self, documents: Vec<Document>) -> Self {
        self.documents = documents;
        self.selected = self.selected.min(self.documents.len().saturating_sub(1));
        self
    }

    pub fn with_highlights(mut self, highlights: Vec<Highlight>) -> Self {
        self.highlights = highlights;
        self
    }

    pub fn with_chat(mut self, chat: Vec<ChatMessage>) -> Self {
        self.chat = chat;
        self
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty_documents
            || !self.removed_documents.is_empty()
            || self.dirty_highlights
            || self.dirty_chat
            || self.dirty_settings
    }

    pub fn clear_dirty(&mut self) {
        self.dirty_documents = false;
        self.removed_documents.clear();
        self.dirty_highlights = false;
        self.dirty_chat = false;
        self.dirty_settings = false;
    }

    pub fn selected_document(&self) -> Option<&Document> {
        self.documents.get(self.selected)
    }

    pub fn document(&self, id: &DocumentId) -> Option<&Document> {
        self.documents.iter().find(|doc| doc.id == *id)
    }

    fn document_mut(&mut self, id: &DocumentId) -> Option<&mut Document> {
        self.documents.iter_mut().find(|doc| doc.id == *id)
    }

    pub fn add_document(&mut self, document: Document) {
        self.documents.push(document);
        self.selected = self.documents.len() - 1;
        self.dirty_documents = true;
    }

    /// Delete a document and everything it owns: its highlights and (via
    /// `removed_documents`, consumed by the binary) its blob-store entry.
    pub fn delete_document(&mut self, id: &DocumentId) -> bool {
        let before = self.documents.len();
        self.documents.retain(|doc| doc.id != *id);
        if self.documents.len() == before {
            return false;
        }

        let highlights_before = self.highlights.len();
        self.highlights.retain(|h| h.document_id != *id);
        if self.highlights.len() != highlights_before {
            self.dirty_highlights = true;
        }

        self.removed_documents.insert(id.clone());
        self.dirty_documents = true;
        self.selected = self.selected.min(self.documents.len().saturating_sub(1));
        true
    }

    pub fn set_current_page(&mut self, id: &DocumentId, page: u32) {
        if let Some(doc) = self.document_mut(id) {
            doc.set_current_page(page);
            self.dirty_documents = true;
        }
    }

    pub fn toggle_bookmark(&mut self, id: &DocumentId, page: u32) {
        if let Some(doc) = self.document_mut(id) {
            doc.toggle_bookmark(page);
            self.dirty_documents = true;
        }
    }

    /// Highlights recorded against this exact page, in creation order.
    pub fn highlights_for_page(&self, id: &DocumentId, page: u32) -> Vec<&Highlight> {
        self.highlights
            .iter()
            .filter(|h| h.document_id == *id && h.page == page)
            .collect()
    }

    pub fn highlights_for_document(&self, id: &DocumentId) -> Vec<&Highlight> {
        self.highlights
            .iter()
            .filter(|h| h.document_id == *id)
            .collect()
    }

    pub fn add_highlight(&mut self, highlight: Highlight) {
        self.highlights.push(highlight);
        self.dirty_highlights = true;
    }

    pub fn remove_highlight(&mut self, highlight_id: &str) -> bool {
        let before = self.highlights.len();
        self.highlights.retain(|h| h.id != highlight_id);
        let removed = self.highlights.len() != before;
        if removed {
            self.dirty_highlights = true;
        }
        removed
    }

    pub fn push_chat(&mut self, message: ChatMessage) {
        self.chat.push(message);
        self.dirty_chat = true;
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = Some(status.into());
    }

    /// Plain-text annotation export: one block per highlight, blocks
    /// separated by a literal `---` line.
    pub fn export_annotations(&self, id: &DocumentId) -> Option<String> {
        let document = self.document(id)?;
        let blocks: Vec<String> = self
            .highlights_for_document(id)
            .iter()
            .map(|highlight| {
                let mut block = format!(
                    "Book: {}\nColor: {}\nPage: {}\n\"{}\"\n",
                    document.title,
                    highlight.color,
                    highlight.page + 1,
                    highlight.text,
                );
                if !highlight.note.trim().is_empty() {
                    block.push_str(&format!("Note: {}\n", highlight.note));
                }
                block.push_str(&format!("Date: {}\n", highlight.created_at.to_rfc3339()));
                block
            })
            .collect();
        Some(blocks.join("---\n"))
    }
}
