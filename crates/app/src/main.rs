use std::fs;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Context as _;
use directories::ProjectDirs;
use marginalia_application::AppContext;
use marginalia_chat::{AgentClient, AgentConfig};
use marginalia_core::{Document, DocumentColor, DocumentId, Settings};
use marginalia_engine::Normalizer;
use marginalia_storage::Storage;
use marginalia_ui::{Ui, UiExit};
use tracing_subscriber::EnvFilter;

/// DOCX HTML longer than this moves to the blob store instead of the
/// structured document record.
const OVERSIZED_HTML_CHARS: usize = 100_000;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let project_dirs =
        ProjectDirs::from("dev", "marginalia", "marginalia").context("resolve project dirs")?;
    let data_dir = project_dirs.data_dir();
    fs::create_dir_all(data_dir)
        .with_context(|| format!("create data dir {}", data_dir.display()))?;
    init_logging(data_dir)?;

    let storage = Storage::open(data_dir.join("marginalia.db"))?;
    let mut settings = storage.load_settings()?;
    apply_env_overrides(&mut settings);

    let mut ctx = AppContext::new(settings)
        .with_documents(storage.load_documents()?)
        .with_highlights(storage.load_highlights()?)
        .with_chat(storage.load_chat()?);

    let normalizer = Normalizer::with_default_engines();

    // Files given on the command line are imported before the first UI run.
    for path in std::env::args().skip(1) {
        import_file(&normalizer, &storage, &mut ctx, &path);
    }
    persist_dirty(&storage, &mut ctx)?;

    loop {
        let mut ui = Ui::new(ctx);
        let outcome = ui.run()?;
        ctx = outcome.ctx;
        persist_dirty(&storage, &mut ctx)?;

        match outcome.exit {
            UiExit::Quit => break,
            UiExit::Import { path } => {
                import_file(&normalizer, &storage, &mut ctx, &path);
                persist_dirty(&storage, &mut ctx)?;
            }
        }
    }

    Ok(())
}

fn persist_dirty(storage: &Storage, ctx: &mut AppContext) -> anyhow::Result<()> {
    if ctx.dirty_settings {
        storage.save_settings(&ctx.settings)?;
    }
    if ctx.dirty_documents || !ctx.removed_documents.is_empty() {
        storage.save_documents(&ctx.documents)?;
    }
    for id in &ctx.removed_documents {
        storage.delete_blob(id)?;
    }
    if ctx.dirty_highlights {
        storage.save_highlights(&ctx.highlights)?;
    }
    if ctx.dirty_chat {
        storage.save_chat(&ctx.chat)?;
    }
    ctx.clear_dirty();
    Ok(())
}

fn import_file(normalizer: &Normalizer, storage: &Storage, ctx: &mut AppContext, path: &str) {
    match ingest(normalizer, storage, ctx, path) {
        Ok(title) => {
            tracing::info!(path, title = %title, "document added");
            ctx.set_status(format!("Added \"{title}\""));
        }
        Err(err) => {
            tracing::warn!(path, error = %err, "import failed");
            ctx.set_status(err.to_string());
        }
    }
}

fn ingest(
    normalizer: &Normalizer,
    storage: &Storage,
    ctx: &mut AppContext,
    path: &str,
) -> anyhow::Result<String> {
    let file_name = Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string());

    let bytes = fs::read(path).with_context(|| format!("Could not read {path}"))?;

    let upload = normalizer.normalize(&file_name, &bytes, &mut |phase| {
        tracing::info!(file = file_name.as_str(), "{phase}");
    })?;

    let id = DocumentId::generate();
    let mut document = Document {
        id: id.clone(),
        title: upload.title.clone(),
        author: None,
        file_name,
        source_type: upload.source_type,
        file_size: bytes.len() as u64,
        content: upload.plain_text,
        html_content: upload.html,
        has_payload: false,
        page_count: upload.page_count,
        chapters: upload.chapters,
        progress: 0.0,
        current_page: 0,
        bookmarks: Default::default(),
        color: DocumentColor::for_index(ctx.documents.len()),
        uploaded_at: chrono::Utc::now(),
        last_read_at: None,
    };

    if let Some(payload) = upload.payload {
        storage
            .put_blob(&id, &payload)
            .context("store document payload")?;
        document.has_payload = true;
    } else if let Some(html) = document
        .html_content
        .as_ref()
        .filter(|html| html.chars().count() > OVERSIZED_HTML_CHARS)
    {
        storage
            .put_blob(&id, html.as_bytes())
            .context("store oversized html")?;
        document.html_content = None;
        document.has_payload = true;
    }

    document.normalize();
    let title = document.title.clone();
    ctx.add_document(document);

    // Fire-and-forget: indexing failures are swallowed inside the client.
    let agent = AgentClient::new(AgentConfig::from_settings(&ctx.settings));
    if let Some(document) = ctx.documents.last() {
        agent.index_document(document);
    }

    Ok(title)
}

fn apply_env_overrides(settings: &mut Settings) {
    if let Ok(url) = std::env::var("MARGINALIA_AGENT_URL") {
        settings.agent_base_url = url;
    }
    if let Ok(agent_id) = std::env::var("MARGINALIA_AGENT_ID") {
        settings.agent_id = agent_id;
    }
    settings.normalize();
}

/// Logging goes to a file under the data dir so the TUI screen stays clean.
fn init_logging(data_dir: &Path) -> anyhow::Result<()> {
    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(data_dir.join("marginalia.log"))
        .context("open log file")?;
    let filter = EnvFilter::try_from_env("MARGINALIA_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(log_file))
        .with_ansi(false)
        .init();
    Ok(())
}
