//! Test fixtures shared across Marginalia's integration tests.

use marginalia_core::{Document, DocumentColor, DocumentId};
use marginalia_engine::{DocxConverter, IngestError, NormalizedUpload, PdfTextEngine};

/// PDF engine returning canned pages, no real PDF required.
pub struct FakePdfEngine(pub Vec<String>);

impl PdfTextEngine for FakePdfEngine {
    fn extract_pages(&self, _bytes: &[u8]) -> Result<Vec<String>, IngestError> {
        Ok(self.0.clone())
    }
}

/// DOCX converter returning canned HTML, no pandoc required.
pub struct FakeDocxConverter(pub String);

impl DocxConverter for FakeDocxConverter {
    fn convert_to_html(&self, _bytes: &[u8]) -> Result<String, IngestError> {
        Ok(self.0.clone())
    }
}

/// Build the document record an upload would produce, the way the binary
/// does it.
pub fn document_from_upload(
    upload: &NormalizedUpload,
    file_name: &str,
    file_size: u64,
    library_index: usize,
) -> Document {
    let mut document = Document {
        id: DocumentId::generate(),
        title: upload.title.clone(),
        author: None,
        file_name: file_name.to_string(),
        source_type: upload.source_type,
        file_size,
        content: upload.plain_text.clone(),
        html_content: upload.html.clone(),
        has_payload: upload.payload.is_some(),
        page_count: upload.page_count,
        chapters: upload.chapters.clone(),
        progress: 0.0,
        current_page: 0,
        bookmarks: Default::default(),
        color: DocumentColor::for_index(library_index),
        uploaded_at: chrono::Utc::now(),
        last_read_at: None,
    };
    document.normalize();
    document
}

#[cfg(test)]
mod tests {
    use super::*;
    use marginalia_engine::Normalizer;

    #[test]
    fn fixtures_build_a_document() {
        let normalizer = Normalizer::new(
            Box::new(FakePdfEngine(Vec::new())),
            Box::new(FakeDocxConverter(String::new())),
        );
        let upload = normalizer
            .normalize("fixture.txt", b"some text", &mut |_| {})
            .unwrap();
        let document = document_from_upload(&upload, "fixture.txt", 9, 0);
        assert_eq!(document.title, "fixture");
        assert_eq!(document.page_count, 1);
    }
}
