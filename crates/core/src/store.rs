//! Interfaces to the external media storage and record store.
//!
//! The pipeline only assumes that a record has an id and a set of named
//! fields, and that attachments are `{url}` objects. Concrete backends
//! live in the `genbatch-store` crate.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::RecordId;

// ---------------------------------------------------------------------------
// Field values
// ---------------------------------------------------------------------------

/// A file attachment, referenced by its public URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
}

/// A value written to a record field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Attachments(Vec<Attachment>),
}

impl FieldValue {
    pub fn attachment(url: impl Into<String>) -> Self {
        Self::Attachments(vec![Attachment { url: url.into() }])
    }

    /// An empty attachment list, which clears the field when written.
    pub fn cleared() -> Self {
        Self::Attachments(Vec::new())
    }
}

/// Ordered field map, so the same update always serializes identically.
pub type FieldMap = BTreeMap<String, FieldValue>;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A record as returned by the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreRecord {
    pub id: RecordId,
    #[serde(default)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl StoreRecord {
    /// A non-blank text field.
    pub fn text(&self, field: &str) -> Option<&str> {
        self.fields
            .get(field)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// URLs of every attachment in a field, in order. Entries without a
    /// URL are ignored.
    pub fn attachment_urls(&self, field: &str) -> Vec<String> {
        self.fields
            .get(field)
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get("url").and_then(|u| u.as_str()))
                    .filter(|u| !u.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from a media storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Storage misconfigured: {0}")]
    Config(String),
}

/// Errors from the record store.
#[derive(Debug, thiserror::Error)]
pub enum RecordStoreError {
    /// The request never produced a response (network, DNS, TLS).
    #[error("Record store request failed: {0}")]
    Request(String),

    /// The store answered with a non-2xx status.
    #[error("Record store error ({status}): {body}")]
    Api { status: u16, body: String },

    /// The response body did not have the expected shape.
    #[error("Unexpected record store response: {0}")]
    Decode(String),
}

impl RecordStoreError {
    /// Whether repeating the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request(_) => true,
            Self::Api { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            Self::Decode(_) => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Durable media storage returning public URLs.
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Store `bytes` and return the URL they are served from.
    async fn store(&self, bytes: Vec<u8>, suggested_name: &str) -> Result<String, StorageError>;

    /// Fetch bytes from a remote URL so they can be re-hosted.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, StorageError>;
}

/// External record store holding per-record business status.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Records that are ready for generation, as selected by the store's
    /// configured filter.
    async fn fetch_ready(&self) -> Result<Vec<StoreRecord>, RecordStoreError>;

    /// Overwrite the given fields on one record. Fields not named are left
    /// untouched, so repeating an update is idempotent.
    async fn update_record(&self, id: &str, fields: &FieldMap) -> Result<(), RecordStoreError>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
