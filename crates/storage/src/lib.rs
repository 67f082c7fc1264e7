//! Sqlite-backed persistence.
//!
//! Two collaborators behind one connection: a structured store holding JSON
//! envelopes under fixed keys, with a per-value size budget and a degraded
//! retry for oversized document saves; and a blob store keyed by document
//! id for large payloads that must never enter the structured side.

use std::path::Path;

use anyhow::Context as _;
use marginalia_core::schema;
use marginalia_core::{ChatMessage, Document, DocumentId, Highlight, Settings};
use rusqlite::{Connection, OptionalExtension as _};
use thiserror::Error;

pub const DOCUMENTS_KEY: &str = "documents";
pub const HIGHLIGHTS_KEY: &str = "highlights";
pub const CHAT_KEY: &str = "chat_history";
pub const SETTINGS_KEY: &str = "settings";

/// Budget for a single structured value.
pub const DEFAULT_VALUE_LIMIT: usize = 5_000_000;
/// Degraded-save truncation applied to document text on quota failure.
pub const TRUNCATED_CONTENT_CHARS: usize = 100_000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("value for `{key}` exceeds the structured-store budget ({size} > {limit} bytes)")]
    QuotaExceeded {
        key: String,
        size: usize,
        limit: usize,
    },
    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}

#[derive(Debug)]
pub struct Storage {
    conn: Connection,
    value_limit: usize,
}

impl Storage {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("open sqlite db at {}", path.as_ref().display()))?;
        let storage = Self {
            conn,
            value_limit: DEFAULT_VALUE_LIMIT,
        };
        storage.migrate()?;
        Ok(storage)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let storage = Self {
            conn: Connection::open_in_memory()?,
            value_limit: DEFAULT_VALUE_LIMIT,
        };
        storage.migrate()?;
        Ok(storage)
    }

    pub fn with_value_limit(mut self, value_limit: usize) -> Self {
        self.value_limit = value_limit;
        self
    }

    fn migrate(&self) -> anyhow::Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL DEFAULT (unixepoch())
            );

            CREATE TABLE IF NOT EXISTS blobs (
                id TEXT PRIMARY KEY,
                data BLOB NOT NULL,
                updated_at INTEGER NOT NULL DEFAULT (unixepoch())
            );
            "#,
        )?;
        Ok(())
    }

    fn put_value(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if value.len() > self.value_limit {
            return Err(StoreError::QuotaExceeded {
                key: key.to_string(),
                size: value.len(),
                limit: self.value_limit,
            });
        }
        self.conn.execute(
            r#"
            INSERT INTO kv (key, value, updated_at) VALUES (?, ?, unixepoch())
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
            (key, value),
        )?;
        Ok(())
    }

    fn get_value(&self, key: &str) -> anyhow::Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?", [key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn load_documents(&self) -> anyhow::Result<Vec<Document>> {
        let Some(raw) = self.get_value(DOCUMENTS_KEY)? else {
            return Ok(Vec::new());
        };
        let migrated = schema::migrate_documents(&raw);
        if migrated.dropped > 0 {
            tracing::warn!(
                dropped = migrated.dropped,
                from_version = migrated.from_version,
                "dropped unreadable document records during migration"
            );
        }
        Ok(migrated.records)
    }

    /// Save all documents. On quota failure the save is retried with
    /// `content`/`html_content` truncated and the payload flag cleared; if
    /// that still does not fit, the write is dropped silently.
    pub fn save_documents(&self, documents: &[Document]) -> anyhow::Result<()> {
        let raw = schema::encode(&documents).context("serialize documents")?;
        match self.put_value(DOCUMENTS_KEY, &raw) {
            Ok(()) => return Ok(()),
            Err(StoreError::QuotaExceeded { size, limit, .. }) => {
                tracing::warn!(size, limit, "document save over budget; retrying truncated");
            }
            Err(err) => return Err(err.into()),
        }

        let degraded: Vec<Document> = documents.iter().map(degrade_document).collect();
        let raw = schema::encode(&degraded).context("serialize truncated documents")?;
        match self.put_value(DOCUMENTS_KEY, &raw) {
            Ok(()) => Ok(()),
            Err(StoreError::QuotaExceeded { size, limit, .. }) => {
                tracing::warn!(size, limit, "truncated document save still over budget; dropped");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn load_highlights(&self) -> anyhow::Result<Vec<Highlight>> {
        let Some(raw) = self.get_value(HIGHLIGHTS_KEY)? else {
            return Ok(Vec::new());
        };
        let migrated = schema::migrate_highlights(&raw);
        if migrated.dropped > 0 {
            tracing::warn!(dropped = migrated.dropped, "dropped unreadable highlights");
        }
        Ok(migrated.records)
    }

    pub fn save_highlights(&self, highlights: &[Highlight]) -> anyhow::Result<()> {
        let raw = schema::encode(&highlights).context("serialize highlights")?;
        self.put_value(HIGHLIGHTS_KEY, &raw)?;
        Ok(())
    }

    pub fn load_chat(&self) -> anyhow::Result<Vec<ChatMessage>> {
        let Some(raw) = self.get_value(CHAT_KEY)? else {
            return Ok(Vec::new());
        };
        Ok(schema::migrate_chat(&raw).records)
    }

    pub fn save_chat(&self, messages: &[ChatMessage]) -> anyhow::Result<()> {
        let raw = schema::encode(&messages).context("serialize chat history")?;
        self.put_value(CHAT_KEY, &raw)?;
        Ok(())
    }

    pub fn load_settings(&self) -> anyhow::Result<Settings> {
        let Some(raw) = self.get_value(SETTINGS_KEY)? else {
            return Ok(Settings::default());
        };
        Ok(schema::migrate_settings(&raw))
    }

    pub fn save_settings(&self, settings: &Settings) -> anyhow::Result<()> {
        let mut settings = settings.clone();
        settings.normalize();
        let raw = schema::encode(&settings).context("serialize settings")?;
        self.put_value(SETTINGS_KEY, &raw)?;
        Ok(())
    }

    pub fn put_blob(&self, id: &DocumentId, data: &[u8]) -> anyhow::Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO blobs (id, data, updated_at) VALUES (?, ?, unixepoch())
            ON CONFLICT(id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at
            "#,
            (id.as_str(), data),
        )?;
        Ok(())
    }

    pub fn get_blob(&self, id: &DocumentId) -> anyhow::Result<Option<Vec<u8>>> {
        let data = self
            .conn
            .query_row("SELECT data FROM blobs WHERE id = ?", [id.as_str()], |row| {
                row.get::<_, Vec<u8>>(0)
            })
            .optional()?;
        Ok(data)
    }

    pub fn delete_blob(&self, id: &DocumentId) -> anyhow::Result<()> {
        self.conn
            .execute("DELETE FROM blobs WHERE id = ?", [id.as_str()])?;
        Ok(())
    }
}

fn degrade_document(document: &Document) -> Document {
    let mut degraded = document.clone();
    degraded.content = truncate_chars(&degraded.content, TRUNCATED_CONTENT_CHARS);
    degraded.html_content = degraded
        .html_content
        .as_deref()
        .map(|html| truncate_chars(html, TRUNCATED_CONTENT_CHARS));
    degraded.has_payload = false;
    degraded
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use marginalia_core::SourceType;

    fn make_document(content: String) -> Document {
        let mut doc = Document {
            id: DocumentId::generate(),
            title: "Stored".to_string(),
            author: None,
            file_name: "stored.txt".to_string(),
            source_type: SourceType::Txt,
            file_size: content.len() as u64,
            content,
            html_content: None,
            has_payload: true,
            page_count: 4,
            chapters: Vec::new(),
            progress: 0.0,
            current_page: 0,
            bookmarks: Default::default(),
            color: Default::default(),
            uploaded_at: chrono_now(),
            last_read_at: None,
        };
        doc.normalize();
        doc
    }

    fn chrono_now() -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now()
    }

    #[test]
    fn documents_round_trip() -> anyhow::Result<()> {
        let storage = Storage::open_in_memory()?;
        let doc = make_document("hello".to_string());
        storage.save_documents(std::slice::from_ref(&doc))?;
        assert_eq!(storage.load_documents()?, vec![doc]);
        Ok(())
    }

    #[test]
    fn missing_keys_load_as_empty_state() -> anyhow::Result<()> {
        let storage = Storage::open_in_memory()?;
        assert!(storage.load_documents()?.is_empty());
        assert!(storage.load_highlights()?.is_empty());
        assert!(storage.load_chat()?.is_empty());
        assert_eq!(storage.load_settings()?, Settings::default());
        Ok(())
    }

    #[test]
    fn quota_failure_retries_with_truncated_content() -> anyhow::Result<()> {
        let storage = Storage::open_in_memory()?.with_value_limit(150_000);
        let doc = make_document("x".repeat(200_000));
        storage.save_documents(std::slice::from_ref(&doc))?;

        let loaded = storage.load_documents()?;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].content.chars().count(), TRUNCATED_CONTENT_CHARS);
        assert!(!loaded[0].has_payload);
        Ok(())
    }

    #[test]
    fn hopeless_quota_failure_drops_the_write_silently() -> anyhow::Result<()> {
        let storage = Storage::open_in_memory()?.with_value_limit(64);
        let doc = make_document("y".repeat(10_000));
        // Not an error: the final failure mode is a silent drop.
        storage.save_documents(std::slice::from_ref(&doc))?;
        assert!(storage.load_documents()?.is_empty());
        Ok(())
    }

    #[test]
    fn highlights_round_trip() -> anyhow::Result<()> {
        let storage = Storage::open_in_memory()?;
        let doc = make_document("text".to_string());
        let highlight = Highlight::new(
            doc.id.clone(),
            "text",
            marginalia_core::HighlightColor::Green,
            "a note",
            0,
        );
        storage.save_highlights(std::slice::from_ref(&highlight))?;
        assert_eq!(storage.load_highlights()?, vec![highlight]);
        Ok(())
    }

    #[test]
    fn chat_round_trips_in_order() -> anyhow::Result<()> {
        let storage = Storage::open_in_memory()?;
        let messages = vec![
            ChatMessage::user("What is this book about?"),
            ChatMessage::assistant("It is about storage.", vec!["p. 3".to_string()], Vec::new()),
        ];
        storage.save_chat(&messages)?;
        assert_eq!(storage.load_chat()?, messages);
        Ok(())
    }

    #[test]
    fn settings_round_trip() -> anyhow::Result<()> {
        let storage = Storage::open_in_memory()?;
        let mut settings = Settings::default();
        settings.agent_base_url = "http://reader.local:9000".to_string();
        settings.agent_id = "my-shelf".to_string();
        storage.save_settings(&settings)?;
        assert_eq!(storage.load_settings()?, settings);
        Ok(())
    }

    #[test]
    fn blobs_round_trip_and_delete() -> anyhow::Result<()> {
        let storage = Storage::open_in_memory()?;
        let id = DocumentId::generate();
        storage.put_blob(&id, b"%PDF-1.7 payload")?;
        assert_eq!(
            storage.get_blob(&id)?.as_deref(),
            Some(b"%PDF-1.7 payload".as_slice())
        );
        storage.delete_blob(&id)?;
        assert_eq!(storage.get_blob(&id)?, None);
        Ok(())
    }

    #[test]
    fn legacy_payload_migrates_on_load() -> anyhow::Result<()> {
        let storage = Storage::open_in_memory()?;
        storage.put_value(
            DOCUMENTS_KEY,
            r#"[{
                "id": "legacy-1",
                "title": "Old",
                "file_name": "old.txt",
                "source_type": "txt",
                "content": "old text",
                "page_count": 2,
                "current_page": 7
            }]"#,
        )?;
        let docs = storage.load_documents()?;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].current_page, 1);
        Ok(())
    }
}
