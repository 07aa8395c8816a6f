//! Writing record-level results back to the record store.
//!
//! [`build_update`] merges every variation of one record into a single
//! field map; a [`ResultPublisher`] writes it. The store overwrites only
//! the named fields, so publishing the same map twice leaves the same
//! stored state.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use genbatch_core::job::Outcome;
use genbatch_core::report::RecordStatus;
use genbatch_core::store::{FieldMap, FieldValue, RecordStore, RecordStoreError};

use crate::config::RecordFields;

/// Retry delays for transient store failures (exponential backoff: 1s, 2s, 4s).
const RETRY_DELAYS_SECS: [u64; 3] = [1, 2, 4];

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("record {record_id}: {source}")]
    Store {
        record_id: String,
        #[source]
        source: RecordStoreError,
    },
}

// ---------------------------------------------------------------------------
// Field map
// ---------------------------------------------------------------------------

/// Merge the outcomes of one record's variations into one update.
///
/// `variations` pairs each variation index with its outcome. Attachment
/// fields of failed variations, and masked fields of unmasked ones, are
/// written empty so results from an earlier run do not linger.
pub fn build_update(
    fields: &RecordFields,
    model_display_name: &str,
    status: RecordStatus,
    variations: &[(u32, &Outcome)],
) -> FieldMap {
    let mut update = FieldMap::new();
    update.insert(fields.status.clone(), FieldValue::Text(status.label().to_string()));
    update.insert(fields.model.clone(), FieldValue::Text(model_display_name.to_string()));

    for (variation, outcome) in variations {
        let (generated, masked) = match outcome {
            Outcome::Success {
                original_url,
                masked_url,
            } => (
                FieldValue::attachment(original_url),
                masked_url.as_deref().map_or_else(FieldValue::cleared, FieldValue::attachment),
            ),
            _ => (FieldValue::cleared(), FieldValue::cleared()),
        };
        update.insert(fields.generated_field(*variation), generated);
        update.insert(fields.masked_field(*variation), masked);
    }
    update
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

/// Writes one record's merged results.
#[async_trait]
pub trait ResultPublisher: Send + Sync {
    async fn publish(&self, record_id: &str, fields: &FieldMap) -> Result<(), PublishError>;
}

/// Publishes through a [`RecordStore`], retrying transient failures.
pub struct StorePublisher {
    store: Arc<dyn RecordStore>,
    retry_delays: Vec<Duration>,
}

impl StorePublisher {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            retry_delays: RETRY_DELAYS_SECS.iter().map(|s| Duration::from_secs(*s)).collect(),
        }
    }

    /// Replace the backoff schedule (tests use millisecond delays).
    pub fn with_retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.retry_delays = delays;
        self
    }
}

#[async_trait]
impl ResultPublisher for StorePublisher {
    async fn publish(&self, record_id: &str, fields: &FieldMap) -> Result<(), PublishError> {
        let mut delays = self.retry_delays.iter();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.store.update_record(record_id, fields).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() => match delays.next() {
                    Some(delay) => {
                        tracing::warn!(
                            record_id,
                            attempt,
                            error = %e,
                            "Record update failed, retrying"
                        );
                        tokio::time::sleep(*delay).await;
                    }
                    None => {
                        tracing::error!(record_id, error = %e, "Record update failed after all retries");
                        return Err(PublishError::Store {
                            record_id: record_id.to_string(),
                            source: e,
                        });
                    }
                },
                Err(e) => {
                    tracing::error!(record_id, error = %e, "Record update rejected");
                    return Err(PublishError::Store {
                        record_id: record_id.to_string(),
                        source: e,
                    });
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
