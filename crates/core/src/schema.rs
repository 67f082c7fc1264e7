//! Versioned persistence schema.
//!
//! Every stored collection is wrapped in a `{version, data}` envelope.
//! Loading runs a one-shot migration that accepts bare legacy arrays
//! (version 0), defaults missing fields, drops entries that no longer
//! parse, and re-establishes record invariants.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{ChatMessage, Document, Highlight, Settings};

pub const SCHEMA_VERSION: u32 = 1;

/// Wrap a collection in the current envelope for storage.
pub fn encode<T: Serialize>(data: &T) -> serde_json::Result<String> {
    serde_json::to_string(&serde_json::json!({
        "version": SCHEMA_VERSION,
        "data": data,
    }))
}

/// Outcome of migrating one stored collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Migrated<T> {
    pub records: Vec<T>,
    /// Entries present in the raw payload that no longer parse.
    pub dropped: usize,
    pub from_version: u32,
}

pub fn migrate_documents(raw: &str) -> Migrated<Document> {
    let mut migrated = migrate_collection::<Document>(raw);
    for doc in &mut migrated.records {
        doc.normalize();
    }
    migrated.records.retain(|doc| !doc.id.as_str().is_empty());
    migrated
}

pub fn migrate_highlights(raw: &str) -> Migrated<Highlight> {
    let mut migrated = migrate_collection::<Highlight>(raw);
    migrated
        .records
        .retain(|h| !h.id.is_empty() && !h.text.is_empty());
    migrated
}

pub fn migrate_chat(raw: &str) -> Migrated<ChatMessage> {
    migrate_collection::<ChatMessage>(raw)
}

/// Settings are a single object, not a collection; a payload that fails to
/// parse falls back to defaults.
pub fn migrate_settings(raw: &str) -> Settings {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(_) => return Settings::default(),
    };
    let (_, data) = unwrap_envelope(value);
    let mut settings: Settings = serde_json::from_value(data).unwrap_or_default();
    settings.normalize();
    settings
}

fn migrate_collection<T: DeserializeOwned>(raw: &str) -> Migrated<T> {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(_) => {
            return Migrated {
                records: Vec::new(),
                dropped: 0,
                from_version: 0,
            };
        }
    };

    let (from_version, data) = unwrap_envelope(value);
    let entries = match data {
        Value::Array(entries) => entries,
        _ => Vec::new(),
    };

    let total = entries.len();
    let records: Vec<T> = entries
        .into_iter()
        .filter_map(|entry| serde_json::from_value(entry).ok())
        .collect();
    let dropped = total - records.len();

    Migrated {
        records,
        dropped,
        from_version,
    }
}

/// A `{version, data}` object is the current envelope; anything else is a
/// legacy version-0 payload used as-is.
fn unwrap_envelope(value: Value) -> (u32, Value) {
    if let Value::Object(mut map) = value {
        if let (Some(version), Some(data)) = (
            map.get("version").and_then(Value::as_u64),
            map.remove("data"),
        ) {
            return (version as u32, data);
        }
        return (0, Value::Object(map));
    }
    (0, value)
}
