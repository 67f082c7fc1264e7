//! End-to-end flows: ingest → persist → read → highlight → export → delete.

use marginalia_application::AppContext;
use marginalia_core::{Highlight, HighlightColor, Settings, SourceType};
use marginalia_engine::{Normalizer, PAGE_CHARS, paginate, render_page, split_pdf_pages};
use marginalia_storage::Storage;
use marginalia_test::{FakeDocxConverter, FakePdfEngine, document_from_upload};

fn txt_normalizer() -> Normalizer {
    Normalizer::new(
        Box::new(FakePdfEngine(Vec::new())),
        Box::new(FakeDocxConverter(String::new())),
    )
}

#[test]
fn txt_upload_reads_back_through_storage() -> anyhow::Result<()> {
    let storage = Storage::open_in_memory()?;
    let mut ctx = AppContext::new(Settings::default());

    let text = "Chapter 1: Intro\n\nHello world.\n\nChapter 2: Body\n\nMore text.";
    let upload = txt_normalizer().normalize("novel.txt", text.as_bytes(), &mut |_| {})?;
    assert_eq!(upload.chapters.len(), 2);

    let document = document_from_upload(&upload, "novel.txt", text.len() as u64, 0);
    ctx.add_document(document);
    storage.save_documents(&ctx.documents)?;

    let reloaded = storage.load_documents()?;
    assert_eq!(reloaded.len(), 1);
    assert_eq!(reloaded[0].content, text);
    assert_eq!(reloaded[0].chapters, ctx.documents[0].chapters);

    // Re-derived pages match the upload's pagination.
    let pages = paginate(&reloaded[0].content, PAGE_CHARS);
    assert_eq!(pages, upload.pages);
    Ok(())
}

#[test]
fn highlight_round_trip_wraps_exactly_once() -> anyhow::Result<()> {
    let mut ctx = AppContext::new(Settings::default());
    let text = "The opening line.\n\nA sentence worth keeping forever.\n\nThe closing line.";
    let upload = txt_normalizer().normalize("keeper.txt", text.as_bytes(), &mut |_| {})?;
    let document = document_from_upload(&upload, "keeper.txt", text.len() as u64, 0);
    let id = document.id.clone();
    ctx.add_document(document);

    // The selection is a verbatim substring of the rendered page.
    let pages = paginate(&ctx.documents[0].content, PAGE_CHARS);
    let selection = "worth keeping";
    assert!(pages[0].contains(selection));
    ctx.add_highlight(Highlight::new(
        id.clone(),
        selection,
        HighlightColor::Green,
        "",
        0,
    ));

    let highlights = ctx.highlights_for_page(&id, 0);
    let lines = render_page(&pages[0], &highlights);
    let marked: Vec<&str> = lines
        .iter()
        .flat_map(|line| line.fragments.iter())
        .filter(|fragment| fragment.highlight.is_some())
        .map(|fragment| fragment.text.as_str())
        .collect();
    assert_eq!(marked, vec![selection]);

    // Highlights on other pages never leak into this one.
    assert!(ctx.highlights_for_page(&id, 1).is_empty());
    Ok(())
}

#[test]
fn delete_removes_highlights_and_blob() -> anyhow::Result<()> {
    let storage = Storage::open_in_memory()?;
    let mut ctx = AppContext::new(Settings::default());

    let normalizer = Normalizer::new(
        Box::new(FakePdfEngine(vec![
            "Chapter 1 Beginnings\nfirst page".to_string(),
            "second page".to_string(),
        ])),
        Box::new(FakeDocxConverter(String::new())),
    );
    let upload = normalizer.normalize("scan.pdf", b"%PDF-1.7", &mut |_| {})?;
    let mut document = document_from_upload(&upload, "scan.pdf", 8, 0);
    let id = document.id.clone();

    let payload = upload.payload.expect("pdf keeps its payload");
    storage.put_blob(&id, &payload)?;
    document.has_payload = true;
    ctx.add_document(document);
    ctx.add_highlight(Highlight::new(
        id.clone(),
        "first page",
        HighlightColor::Yellow,
        "note",
        0,
    ));
    storage.save_documents(&ctx.documents)?;
    storage.save_highlights(&ctx.highlights)?;
    assert!(storage.get_blob(&id)?.is_some());

    assert!(ctx.delete_document(&id));
    storage.save_documents(&ctx.documents)?;
    storage.save_highlights(&ctx.highlights)?;
    for removed in &ctx.removed_documents {
        storage.delete_blob(removed)?;
    }

    assert!(storage.load_documents()?.is_empty());
    assert!(storage.load_highlights()?.is_empty());
    assert_eq!(storage.get_blob(&id)?, None);
    Ok(())
}

#[test]
fn pdf_pages_round_trip_through_markers() -> anyhow::Result<()> {
    let pages = vec![
        "Page one text".to_string(),
        "Page two text".to_string(),
        "Page three text".to_string(),
    ];
    let normalizer = Normalizer::new(
        Box::new(FakePdfEngine(pages.clone())),
        Box::new(FakeDocxConverter(String::new())),
    );
    let upload = normalizer.normalize("book.pdf", b"%PDF-1.4", &mut |_| {})?;

    assert!(upload.pages.is_empty());
    assert_eq!(upload.page_count, 3);
    assert_eq!(split_pdf_pages(&upload.plain_text), pages);
    Ok(())
}

#[test]
fn docx_flow_detects_chapters_and_paginates() -> anyhow::Result<()> {
    let body = "lorem ipsum ".repeat(400);
    let html = format!(
        "<h1>First Movement</h1><p>{body}</p><h2>Second Movement</h2><p>{body}</p>"
    );
    let normalizer = Normalizer::new(
        Box::new(FakePdfEngine(Vec::new())),
        Box::new(FakeDocxConverter(html)),
    );
    let upload = normalizer.normalize("suite.docx", b"PK", &mut |_| {})?;

    assert_eq!(upload.source_type, SourceType::Docx);
    assert!(upload.page_count >= 2, "two long bodies should not fit one page");
    assert_eq!(upload.chapters.len(), 2);
    assert_eq!(upload.chapters[0].title, "First Movement");
    assert!(upload.chapters[0].page <= upload.chapters[1].page);
    Ok(())
}

#[test]
fn unsupported_upload_adds_nothing_to_the_library() -> anyhow::Result<()> {
    let mut ctx = AppContext::new(Settings::default());
    let err = txt_normalizer()
        .normalize("notes.epub", b"data", &mut |_| {})
        .unwrap_err();
    assert_eq!(err.to_string(), "Unsupported file type");
    assert!(ctx.documents.is_empty());
    ctx.set_status(err.to_string());
    assert_eq!(ctx.status.as_deref(), Some("Unsupported file type"));
    Ok(())
}
