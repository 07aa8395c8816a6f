//! Conversion of record-store records into batch inputs.

use genbatch_core::report::SkippedRecord;
use genbatch_core::store::StoreRecord;
use genbatch_core::types::RecordId;

use crate::config::RecordFields;

const UNTITLED: &str = "untitled";

/// One input record, ready for planning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRecord {
    pub id: RecordId,
    pub name: String,
    pub prompt: String,
    /// Per-record model, internal or display name.
    pub model_override: Option<String>,
    /// Start frame first (video), then reference images.
    pub reference_urls: Vec<String>,
}

impl BatchRecord {
    /// Read a store record. A record without a prompt yields a
    /// [`SkippedRecord`] instead.
    pub fn from_store_record(record: &StoreRecord, fields: &RecordFields) -> Result<Self, SkippedRecord> {
        let name = record.text(&fields.name).unwrap_or(UNTITLED).to_string();
        let Some(prompt) = record.text(&fields.prompt) else {
            return Err(SkippedRecord {
                record_id: record.id.clone(),
                name,
                reason: format!("no {} set", fields.prompt),
            });
        };

        let mut reference_urls = Vec::new();
        if let Some(field) = &fields.start_frame {
            reference_urls.extend(record.attachment_urls(field).into_iter().take(1));
        }
        reference_urls.extend(record.attachment_urls(&fields.references));

        Ok(Self {
            id: record.id.clone(),
            name,
            prompt: prompt.to_string(),
            model_override: record.text(&fields.model).map(str::to_string),
            reference_urls,
        })
    }
}

/// Split store records into batch inputs and skipped records, keeping the
/// store's order.
pub fn ingest(records: &[StoreRecord], fields: &RecordFields) -> (Vec<BatchRecord>, Vec<SkippedRecord>) {
    let mut ready = Vec::with_capacity(records.len());
    let mut skipped = Vec::new();
    for record in records {
        match BatchRecord::from_store_record(record, fields) {
            Ok(r) => ready.push(r),
            Err(s) => skipped.push(s),
        }
    }
    (ready, skipped)
}
