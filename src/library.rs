//! Client-side document list.
//!
//! Not mounted on the HTTP router: the server never reads or writes this list.
//!
//! The scanner UI remembers every PDF it produced as `{id, name, url, date}`.
//! The list lives entirely on the client; this store takes its persistence
//! as an injected [`KeyValueStorage`] instead of reaching for a global.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::warn;

pub const STORAGE_KEY: &str = "ricpdf_docs";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentRecord {
    /// Creation time in unix milliseconds.
    pub id: i64,
    pub name: String,
    pub url: String,
    pub date: DateTime<Utc>,
}

/// String key/value persistence (browser local storage, a directory, memory).
pub trait KeyValueStorage {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: String) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: HashMap<String, String>,
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) -> anyhow::Result<()> {
        self.inner.insert(key.to_string(), value);
        Ok(())
    }
}

/// One `<key>.json` file per key inside `dir`.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl KeyValueStorage for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        std::fs::read_to_string(self.path(key)).ok()
    }

    fn set(&mut self, key: &str, value: String) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.path(key), value)?;
        Ok(())
    }
}

pub struct DocumentLibrary<S: KeyValueStorage> {
    storage: S,
    documents: Vec<DocumentRecord>,
}

impl<S: KeyValueStorage> DocumentLibrary<S> {
    /// Load the saved list; a missing or unreadable value starts empty.
    pub fn load(storage: S) -> Self {
        let documents = match storage.get(STORAGE_KEY) {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("Discarding corrupt document list: {}", e);
                Vec::new()
            }),
            None => Vec::new(),
        };
        Self { storage, documents }
    }

    /// Append a record for a freshly created PDF and persist the list.
    pub fn record(&mut self, url: impl Into<String>, now: DateTime<Utc>) -> anyhow::Result<&DocumentRecord> {
        let doc = DocumentRecord {
            id: now.timestamp_millis(),
            name: format!("Dokumen_{}.pdf", now.format("%-d-%-m-%Y")),
            url: url.into(),
            date: now,
        };
        self.documents.push(doc);
        self.storage
            .set(STORAGE_KEY, serde_json::to_string(&self.documents)?)?;

        Ok(&self.documents[self.documents.len() - 1])
    }

    /// Newest first.
    pub fn recent(&self) -> impl Iterator<Item = &DocumentRecord> {
        self.documents.iter().rev()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn into_storage(self) -> S {
        self.storage
    }
}
